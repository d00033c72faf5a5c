use bytes::Bytes;
use reaper_common::CommandError;

use crate::Frame;

/// Cursor sobre um Frame::Array para extrair argumentos sequencialmente.
pub struct Parse {
    parts: std::vec::IntoIter<Frame>,
}

impl Parse {
    /// Cria um Parse a partir de um Frame. O frame deve ser Array.
    pub fn new(frame: Frame) -> Result<Parse, CommandError> {
        match frame {
            Frame::Array(parts) => Ok(Parse {
                parts: parts.into_iter(),
            }),
            _ => Err(CommandError::InvalidArgument("esperado array".into())),
        }
    }

    /// Retorna o próximo elemento como String (de Bulk ou Simple).
    pub fn next_string(&mut self) -> Result<String, CommandError> {
        match self.next()? {
            Frame::Simple(s) => Ok(s),
            Frame::Bulk(data) => String::from_utf8(data.to_vec())
                .map_err(|_| CommandError::InvalidArgument("string UTF-8 inválida".into())),
            _ => Err(CommandError::InvalidArgument(
                "esperado string ou bulk".into(),
            )),
        }
    }

    /// Retorna o próximo elemento como Bytes (de Bulk).
    pub fn next_bytes(&mut self) -> Result<Bytes, CommandError> {
        match self.next()? {
            Frame::Bulk(data) => Ok(data),
            Frame::Simple(s) => Ok(Bytes::from(s)),
            _ => Err(CommandError::InvalidArgument("esperado bulk".into())),
        }
    }

    /// Retorna o próximo elemento como i64.
    pub fn next_int(&mut self) -> Result<i64, CommandError> {
        match self.next()? {
            Frame::Integer(n) => Ok(n),
            frame => {
                let s = frame
                    .as_str()
                    .ok_or_else(|| CommandError::InvalidArgument("esperado inteiro".into()))?;
                s.parse::<i64>()
                    .map_err(|_| CommandError::InvalidArgument(format!("'{s}' não é um inteiro")))
            }
        }
    }

    /// Retorna o próximo elemento como inteiro não negativo.
    pub fn next_u64(&mut self) -> Result<u64, CommandError> {
        let n = self.next_int()?;
        u64::try_from(n)
            .map_err(|_| CommandError::InvalidArgument(format!("'{n}' não pode ser negativo")))
    }

    /// Retorna o próximo elemento como booleano (`true|false|1|0|yes|no`).
    pub fn next_bool(&mut self) -> Result<bool, CommandError> {
        let s = self.next_string()?;
        parse_bool(&s)
            .ok_or_else(|| CommandError::InvalidArgument(format!("'{s}' não é booleano")))
    }

    /// Verifica se todos os argumentos foram consumidos.
    pub fn finish(&self) -> Result<(), CommandError> {
        if self.has_remaining() {
            Err(CommandError::InvalidArgument(
                "argumentos extras não esperados".into(),
            ))
        } else {
            Ok(())
        }
    }

    /// Verifica se ainda há argumentos restantes.
    pub fn has_remaining(&self) -> bool {
        self.remaining() > 0
    }

    /// Retorna o número de argumentos restantes.
    pub fn remaining(&self) -> usize {
        self.parts.len()
    }

    fn next(&mut self) -> Result<Frame, CommandError> {
        self.parts
            .next()
            .ok_or_else(|| CommandError::InvalidArgument("argumentos insuficientes".into()))
    }
}

pub fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_extracts_strings() {
        let frame = Frame::array_from_strs(&["CREATED", "tab-1", "PROTECTED"]);
        let mut parse = Parse::new(frame).unwrap();
        assert_eq!(parse.next_string().unwrap(), "CREATED");
        assert_eq!(parse.next_string().unwrap(), "tab-1");
        assert_eq!(parse.next_string().unwrap(), "PROTECTED");
        parse.finish().unwrap();
    }

    #[test]
    fn parse_timestamp_from_bulk() {
        let frame = Frame::array_from_strs(&["AT", "1700000000000"]);
        let mut parse = Parse::new(frame).unwrap();
        parse.next_string().unwrap();
        assert_eq!(parse.next_int().unwrap(), 1_700_000_000_000);
    }

    #[test]
    fn parse_u64_rejects_negative() {
        let frame = Frame::Array(vec![Frame::Integer(-5)]);
        let mut parse = Parse::new(frame).unwrap();
        assert!(parse.next_u64().is_err());
    }

    #[test]
    fn parse_bool_variants() {
        let frame = Frame::array_from_strs(&["yes", "0", "TRUE", "maybe"]);
        let mut parse = Parse::new(frame).unwrap();
        assert!(parse.next_bool().unwrap());
        assert!(!parse.next_bool().unwrap());
        assert!(parse.next_bool().unwrap());
        assert!(parse.next_bool().is_err());
    }

    #[test]
    fn parse_not_array_fails() {
        let frame = Frame::Simple("OK".into());
        assert!(Parse::new(frame).is_err());
    }

    #[test]
    fn parse_extra_args_fails_finish() {
        let frame = Frame::array_from_strs(&["COUNT", "extra"]);
        let mut parse = Parse::new(frame).unwrap();
        parse.next_string().unwrap();
        assert!(parse.finish().is_err());
    }

    #[test]
    fn parse_insufficient_args() {
        let frame = Frame::array_from_strs(&["REMOVED"]);
        let mut parse = Parse::new(frame).unwrap();
        parse.next_string().unwrap();
        assert!(parse.next_string().is_err());
        assert_eq!(parse.remaining(), 0);
    }
}
