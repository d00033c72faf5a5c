use bytes::Bytes;
use reaper_common::CommandError;

use crate::{Frame, Parse};

pub const FIELD_IDLE_THRESHOLD: &str = "idle-threshold-ms";
pub const FIELD_SWEEP_INTERVAL: &str = "sweep-interval-ms";
pub const FIELD_EXEMPT_PROTECTED: &str = "exempt-protected";
pub const FIELD_ENABLED: &str = "enabled";

/// Atualização parcial da política. Campos `None` ficam como estão.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyUpdate {
    pub idle_threshold_ms: Option<u64>,
    pub sweep_interval_ms: Option<u64>,
    pub exempt_protected: Option<bool>,
    pub enabled: Option<bool>,
}

impl PolicyUpdate {
    pub fn is_empty(&self) -> bool {
        *self == PolicyUpdate::default()
    }

    /// Pares campo/valor presentes, na ordem canônica.
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        let mut out = Vec::new();
        if let Some(ms) = self.idle_threshold_ms {
            out.push((FIELD_IDLE_THRESHOLD, ms.to_string()));
        }
        if let Some(ms) = self.sweep_interval_ms {
            out.push((FIELD_SWEEP_INTERVAL, ms.to_string()));
        }
        if let Some(b) = self.exempt_protected {
            out.push((FIELD_EXEMPT_PROTECTED, b.to_string()));
        }
        if let Some(b) = self.enabled {
            out.push((FIELD_ENABLED, b.to_string()));
        }
        out
    }
}

/// Enum com todos os comandos suportados.
///
/// Os eventos de ciclo de vida vêm do host; os de consulta/controle vêm da
/// superfície de apresentação. `List` e `Destroy` trafegam no sentido
/// inverso, do servidor para o host conectado via `HOST`.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Ping(Option<Bytes>),
    Created {
        id: String,
        protected: bool,
        at: Option<i64>,
    },
    Activated {
        id: String,
        at: Option<i64>,
    },
    Updated {
        id: String,
        at: Option<i64>,
    },
    Removed(String),
    GetSettings,
    SetSettings(PolicyUpdate),
    Count,
    Sweep,
    Entries,
    DryRun,
    Reconcile,
    Status,
    Host,
    List,
    Destroy(String),
    Unknown(String),
}

impl Command {
    /// Faz o parse de um Frame em um Command.
    pub fn from_frame(frame: Frame) -> Result<Command, CommandError> {
        let mut parse = Parse::new(frame)?;
        let cmd_name = parse.next_string()?.to_uppercase();

        let cmd = match cmd_name.as_str() {
            "PING" => {
                let msg = if parse.has_remaining() {
                    Some(parse.next_bytes()?)
                } else {
                    None
                };
                parse.finish()?;
                Command::Ping(msg)
            }
            "CREATED" => parse_created(&mut parse)?,
            "ACTIVATED" => {
                let (id, at) = parse_activity(&mut parse, "ACTIVATED")?;
                Command::Activated { id, at }
            }
            "UPDATED" => {
                let (id, at) = parse_activity(&mut parse, "UPDATED")?;
                Command::Updated { id, at }
            }
            "REMOVED" => Command::Removed(single_id(&mut parse, "REMOVED")?),
            "DESTROY" => Command::Destroy(single_id(&mut parse, "DESTROY")?),
            "SETSETTINGS" => parse_settings(&mut parse)?,
            "GETSETTINGS" | "COUNT" | "SWEEP" | "ENTRIES" | "DRYRUN" | "RECONCILE" | "STATUS"
            | "HOST" | "LIST" => {
                if parse.has_remaining() {
                    return Err(CommandError::WrongArity(cmd_name.clone()));
                }
                match cmd_name.as_str() {
                    "GETSETTINGS" => Command::GetSettings,
                    "COUNT" => Command::Count,
                    "SWEEP" => Command::Sweep,
                    "ENTRIES" => Command::Entries,
                    "DRYRUN" => Command::DryRun,
                    "RECONCILE" => Command::Reconcile,
                    "STATUS" => Command::Status,
                    "HOST" => Command::Host,
                    _ => Command::List,
                }
            }
            _ => Command::Unknown(cmd_name),
        };

        Ok(cmd)
    }

    /// Encoda o comando como Frame para envio via RESP.
    pub fn to_frame(&self) -> Frame {
        let mut parts = vec![Frame::bulk(self.name())];
        match self {
            Command::Ping(Some(msg)) => parts.push(Frame::Bulk(msg.clone())),
            Command::Created { id, protected, at } => {
                parts.push(Frame::bulk(id));
                if *protected {
                    parts.push(Frame::bulk("PROTECTED"));
                }
                push_at(&mut parts, *at);
            }
            Command::Activated { id, at } | Command::Updated { id, at } => {
                parts.push(Frame::bulk(id));
                push_at(&mut parts, *at);
            }
            Command::Removed(id) | Command::Destroy(id) => parts.push(Frame::bulk(id)),
            Command::SetSettings(update) => {
                for (field, value) in update.fields() {
                    parts.push(Frame::bulk(field));
                    parts.push(Frame::bulk(&value));
                }
            }
            _ => {}
        }
        Frame::Array(parts)
    }

    /// Nome do comando no protocolo.
    pub fn name(&self) -> &str {
        match self {
            Command::Ping(_) => "PING",
            Command::Created { .. } => "CREATED",
            Command::Activated { .. } => "ACTIVATED",
            Command::Updated { .. } => "UPDATED",
            Command::Removed(_) => "REMOVED",
            Command::GetSettings => "GETSETTINGS",
            Command::SetSettings(_) => "SETSETTINGS",
            Command::Count => "COUNT",
            Command::Sweep => "SWEEP",
            Command::Entries => "ENTRIES",
            Command::DryRun => "DRYRUN",
            Command::Reconcile => "RECONCILE",
            Command::Status => "STATUS",
            Command::Host => "HOST",
            Command::List => "LIST",
            Command::Destroy(_) => "DESTROY",
            Command::Unknown(name) => name,
        }
    }
}

fn push_at(parts: &mut Vec<Frame>, at: Option<i64>) {
    if let Some(ts) = at {
        parts.push(Frame::bulk("AT"));
        parts.push(Frame::bulk(&ts.to_string()));
    }
}

fn single_id(parse: &mut Parse, name: &str) -> Result<String, CommandError> {
    if parse.remaining() != 1 {
        return Err(CommandError::WrongArity(name.into()));
    }
    non_empty_id(parse.next_string()?)
}

fn non_empty_id(id: String) -> Result<String, CommandError> {
    if id.is_empty() {
        return Err(CommandError::InvalidArgument("id vazio".into()));
    }
    Ok(id)
}

fn parse_created(parse: &mut Parse) -> Result<Command, CommandError> {
    if !parse.has_remaining() {
        return Err(CommandError::WrongArity("CREATED".into()));
    }
    let id = non_empty_id(parse.next_string()?)?;
    let mut protected = false;
    let mut at = None;

    while parse.has_remaining() {
        let opt = parse.next_string()?.to_uppercase();
        match opt.as_str() {
            "PROTECTED" | "PINNED" => protected = true,
            "AT" => at = Some(parse.next_int()?),
            other => {
                return Err(CommandError::InvalidArgument(format!(
                    "opção inválida para CREATED: {other}"
                )));
            }
        }
    }

    Ok(Command::Created { id, protected, at })
}

fn parse_activity(parse: &mut Parse, name: &str) -> Result<(String, Option<i64>), CommandError> {
    if !parse.has_remaining() {
        return Err(CommandError::WrongArity(name.into()));
    }
    let id = non_empty_id(parse.next_string()?)?;
    let at = if parse.has_remaining() {
        let opt = parse.next_string()?.to_uppercase();
        if opt != "AT" {
            return Err(CommandError::InvalidArgument(format!(
                "opção inválida para {name}: {opt}"
            )));
        }
        Some(parse.next_int()?)
    } else {
        None
    };
    parse.finish()?;
    Ok((id, at))
}

fn parse_settings(parse: &mut Parse) -> Result<Command, CommandError> {
    if !parse.has_remaining() || parse.remaining() % 2 != 0 {
        return Err(CommandError::WrongArity("SETSETTINGS".into()));
    }

    let mut update = PolicyUpdate::default();
    while parse.has_remaining() {
        let field = parse.next_string()?.to_lowercase();
        match field.as_str() {
            FIELD_IDLE_THRESHOLD => update.idle_threshold_ms = Some(parse.next_u64()?),
            FIELD_SWEEP_INTERVAL => update.sweep_interval_ms = Some(parse.next_u64()?),
            FIELD_EXEMPT_PROTECTED => update.exempt_protected = Some(parse.next_bool()?),
            FIELD_ENABLED => update.enabled = Some(parse.next_bool()?),
            _ => return Err(CommandError::UnknownSetting(field)),
        }
    }

    Ok(Command::SetSettings(update))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Command, CommandError> {
        Command::from_frame(Frame::array_from_strs(args))
    }

    #[test]
    fn parse_ping() {
        assert_eq!(parse(&["PING"]).unwrap(), Command::Ping(None));
        assert_eq!(
            parse(&["PING", "hello"]).unwrap(),
            Command::Ping(Some(Bytes::from("hello")))
        );
    }

    #[test]
    fn parse_created_plain() {
        assert_eq!(
            parse(&["CREATED", "42"]).unwrap(),
            Command::Created {
                id: "42".into(),
                protected: false,
                at: None,
            }
        );
    }

    #[test]
    fn parse_created_protected_with_timestamp() {
        assert_eq!(
            parse(&["CREATED", "42", "AT", "1000", "PROTECTED"]).unwrap(),
            Command::Created {
                id: "42".into(),
                protected: true,
                at: Some(1000),
            }
        );
    }

    #[test]
    fn parse_created_accepts_pinned_alias() {
        match parse(&["created", "7", "pinned"]).unwrap() {
            Command::Created { protected, .. } => assert!(protected),
            other => panic!("expected Created, got {other:?}"),
        }
    }

    #[test]
    fn parse_created_rejects_empty_id() {
        assert!(parse(&["CREATED", ""]).is_err());
    }

    #[test]
    fn parse_created_rejects_unknown_option() {
        assert!(parse(&["CREATED", "1", "FOREVER"]).is_err());
    }

    #[test]
    fn parse_activity_events() {
        assert_eq!(
            parse(&["ACTIVATED", "9"]).unwrap(),
            Command::Activated {
                id: "9".into(),
                at: None,
            }
        );
        assert_eq!(
            parse(&["UPDATED", "9", "AT", "55"]).unwrap(),
            Command::Updated {
                id: "9".into(),
                at: Some(55),
            }
        );
        assert!(parse(&["ACTIVATED", "9", "WHEN", "55"]).is_err());
    }

    #[test]
    fn parse_removed_arity() {
        assert_eq!(parse(&["REMOVED", "3"]).unwrap(), Command::Removed("3".into()));
        assert!(matches!(
            parse(&["REMOVED"]),
            Err(CommandError::WrongArity(_))
        ));
        assert!(parse(&["REMOVED", "3", "4"]).is_err());
    }

    #[test]
    fn parse_set_settings() {
        let cmd = parse(&[
            "SETSETTINGS",
            "idle-threshold-ms",
            "60000",
            "enabled",
            "false",
        ])
        .unwrap();
        assert_eq!(
            cmd,
            Command::SetSettings(PolicyUpdate {
                idle_threshold_ms: Some(60_000),
                enabled: Some(false),
                ..Default::default()
            })
        );
    }

    #[test]
    fn parse_set_settings_errors() {
        assert!(matches!(
            parse(&["SETSETTINGS", "color", "red"]),
            Err(CommandError::UnknownSetting(_))
        ));
        assert!(matches!(
            parse(&["SETSETTINGS", "enabled"]),
            Err(CommandError::WrongArity(_))
        ));
        assert!(parse(&["SETSETTINGS", "sweep-interval-ms", "-1"]).is_err());
    }

    #[test]
    fn parse_nullary_commands() {
        assert_eq!(parse(&["count"]).unwrap(), Command::Count);
        assert_eq!(parse(&["SWEEP"]).unwrap(), Command::Sweep);
        assert_eq!(parse(&["HOST"]).unwrap(), Command::Host);
        assert_eq!(parse(&["LIST"]).unwrap(), Command::List);
        assert!(parse(&["COUNT", "x"]).is_err());
    }

    #[test]
    fn parse_unknown_command() {
        assert_eq!(
            parse(&["FOOBAR"]).unwrap(),
            Command::Unknown("FOOBAR".into())
        );
    }

    #[test]
    fn to_frame_matches_wire_form() {
        let cmd = Command::Created {
            id: "5".into(),
            protected: true,
            at: Some(10),
        };
        assert_eq!(
            cmd.to_frame(),
            Frame::array_from_strs(&["CREATED", "5", "PROTECTED", "AT", "10"])
        );
        assert_eq!(
            Command::Destroy("5".into()).to_frame(),
            Frame::array_from_strs(&["DESTROY", "5"])
        );
    }

    #[test]
    fn set_settings_frame_parses_back() {
        let update = PolicyUpdate {
            sweep_interval_ms: Some(60_000),
            exempt_protected: Some(false),
            ..Default::default()
        };
        let frame = Command::SetSettings(update.clone()).to_frame();
        assert_eq!(
            Command::from_frame(frame).unwrap(),
            Command::SetSettings(update)
        );
    }
}
