use tokio::sync::broadcast;
use tracing::{debug, warn};

use reaper_common::ConnectionError;
use reaper_engine::{EngineStatus, Evaluation, SchedulerState, SweepReport};
use reaper_protocol::{
    Command, FIELD_ENABLED, FIELD_EXEMPT_PROTECTED, FIELD_IDLE_THRESHOLD, FIELD_SWEEP_INTERVAL,
    Frame,
};
use reaper_storage::{PolicyConfig, now_ms};

use crate::host::handle_host_stream;
use crate::{Connection, ReaperEngine};

/// Loop principal de tratamento de uma conexão.
pub async fn handle_connection(
    mut conn: Connection,
    engine: ReaperEngine,
    shutdown: &mut broadcast::Receiver<()>,
) -> Result<(), ConnectionError> {
    loop {
        let frame = tokio::select! {
            result = conn.read_frame() => result?,
            _ = shutdown.recv() => {
                return Ok(());
            }
        };

        let frame = match frame {
            Some(f) => f,
            None => return Ok(()), // EOF
        };

        let cmd = match Command::from_frame(frame) {
            Ok(cmd) => cmd,
            Err(e) => {
                conn.write_frame(&Frame::err(e)).await?;
                continue;
            }
        };

        debug!("comando recebido: {cmd:?}");

        if let Command::Host = cmd {
            // Upgrade: a conexão passa a ser o gerenciador de recursos
            let (generation, requests) = engine.resources().attach();
            conn.write_frame(&Frame::ok()).await?;

            let seeding = engine.clone();
            tokio::spawn(async move {
                if let Err(e) = seeding.seed_from_host().await {
                    warn!("falha ao semear entradas a partir do host: {e}");
                }
            });

            let result =
                handle_host_stream(conn, requests, shutdown, engine.removal_timeout()).await;
            engine.resources().detach(generation);
            return result;
        }

        let response = execute_command(&cmd, &engine).await;
        conn.write_frame(&response).await?;
    }
}

/// Executa um comando e retorna o Frame de resposta.
async fn execute_command(cmd: &Command, engine: &ReaperEngine) -> Frame {
    match cmd {
        Command::Ping(msg) => match msg {
            Some(m) => Frame::Bulk(m.clone()),
            None => Frame::Simple("PONG".into()),
        },
        Command::Created { id, protected, at } => {
            match engine.on_resource_created(id, *protected, *at).await {
                Ok(()) => Frame::ok(),
                Err(e) => Frame::err(e),
            }
        }
        Command::Activated { id, at } | Command::Updated { id, at } => {
            match engine.on_resource_activity(id, *at).await {
                Ok(tracked) => Frame::Integer(tracked as i64),
                Err(e) => Frame::err(e),
            }
        }
        Command::Removed(id) => match engine.on_resource_removed(id).await {
            Ok(removed) => Frame::Integer(removed as i64),
            Err(e) => Frame::err(e),
        },
        Command::GetSettings => settings_frame(&engine.settings().await),
        Command::SetSettings(update) => match engine.update_settings(update).await {
            Ok(_) => Frame::ok(),
            Err(e) => Frame::err(e),
        },
        Command::Count => Frame::Integer(engine.entry_count() as i64),
        Command::Sweep => report_frame(&engine.trigger_sweep().await),
        Command::Entries => {
            let now = now_ms();
            let mut entries = engine.store().list_all();
            entries.sort_by(|a, b| a.id.cmp(&b.id));
            Frame::Array(
                entries
                    .iter()
                    .map(|e| {
                        let mut fields = Vec::with_capacity(10);
                        fields.extend(Frame::field("id", Frame::bulk(&e.id)));
                        fields.extend(Frame::field("protected", flag(e.protected)));
                        fields.extend(Frame::field("created-at", Frame::Integer(e.created_at)));
                        fields.extend(Frame::field(
                            "last-active-at",
                            Frame::Integer(e.last_active_at),
                        ));
                        fields.extend(Frame::field(
                            "idle-minutes",
                            Frame::Integer(e.idle_minutes(now)),
                        ));
                        Frame::Array(fields)
                    })
                    .collect(),
            )
        }
        Command::DryRun => {
            let evaluations = engine.dry_run().await;
            Frame::Array(evaluations.iter().map(evaluation_frame).collect())
        }
        Command::Reconcile => match engine.reconcile().await {
            Ok(report) => {
                let mut fields = Vec::with_capacity(4);
                fields.extend(Frame::field("orphaned", ids_frame(&report.orphaned)));
                fields.extend(Frame::field(
                    "untracked",
                    Frame::Integer(report.untracked.len() as i64),
                ));
                Frame::Array(fields)
            }
            Err(e) => Frame::err(e),
        },
        Command::Status => status_frame(&engine.status().await, engine.resources().is_attached()),
        Command::Host => Frame::err("HOST só é aceito como primeiro passo do link"),
        Command::List | Command::Destroy(_) => {
            Frame::err(format!("'{}' é enviado pelo servidor ao host", cmd.name()))
        }
        Command::Unknown(name) => Frame::err(format!("comando desconhecido '{name}'")),
    }
}

fn flag(value: bool) -> Frame {
    Frame::Integer(value as i64)
}

fn ids_frame(ids: &[String]) -> Frame {
    Frame::Array(ids.iter().map(|id| Frame::bulk(id)).collect())
}

fn settings_frame(config: &PolicyConfig) -> Frame {
    let mut fields = Vec::with_capacity(8);
    fields.extend(Frame::field(
        FIELD_IDLE_THRESHOLD,
        Frame::Integer(config.idle_threshold_ms as i64),
    ));
    fields.extend(Frame::field(
        FIELD_SWEEP_INTERVAL,
        Frame::Integer(config.sweep_interval_ms as i64),
    ));
    fields.extend(Frame::field(FIELD_EXEMPT_PROTECTED, flag(config.exempt_protected)));
    fields.extend(Frame::field(FIELD_ENABLED, flag(config.enabled)));
    Frame::Array(fields)
}

fn report_frame(report: &SweepReport) -> Frame {
    let mut fields = Vec::with_capacity(10);
    fields.extend(Frame::field(
        "considered",
        Frame::Integer(report.considered_count as i64),
    ));
    fields.extend(Frame::field(
        "protected-skipped",
        Frame::Integer(report.protected_skipped_count as i64),
    ));
    fields.extend(Frame::field("closed", ids_frame(&report.closed_ids)));
    fields.extend(Frame::field("reconciled", ids_frame(&report.reconciled_ids)));
    fields.extend(Frame::field("failed", ids_frame(&report.failed_ids)));
    Frame::Array(fields)
}

fn evaluation_frame(eval: &Evaluation) -> Frame {
    let mut fields = Vec::with_capacity(6);
    fields.extend(Frame::field("id", Frame::bulk(&eval.entry.id)));
    fields.extend(Frame::field("verdict", Frame::bulk(eval.verdict.as_str())));
    fields.extend(Frame::field("idle-minutes", Frame::Integer(eval.idle_minutes)));
    Frame::Array(fields)
}

fn status_frame(status: &EngineStatus, host_attached: bool) -> Frame {
    let (state, period) = match status.scheduler {
        SchedulerState::Idle => ("idle", Frame::Null),
        SchedulerState::Scheduled(p) => ("scheduled", Frame::Integer(p.as_millis() as i64)),
        SchedulerState::Sweeping => ("sweeping", Frame::Null),
    };

    let mut fields = Vec::with_capacity(12);
    fields.extend(Frame::field("scheduler", Frame::bulk(state)));
    fields.extend(Frame::field("period-ms", period));
    fields.extend(Frame::field(
        "sweeps-completed",
        Frame::Integer(status.sweeps_completed as i64),
    ));
    fields.extend(Frame::field(
        "entries",
        Frame::Integer(status.entry_count as i64),
    ));
    fields.extend(Frame::field(
        "last-sweep",
        status.last_report.as_ref().map_or(Frame::Null, report_frame),
    ));
    fields.extend(Frame::field("host-attached", flag(host_attached)));
    Frame::Array(fields)
}
