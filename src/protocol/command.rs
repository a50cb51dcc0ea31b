//! Request parsing.
//!
//! A request frame is resolved into a closed [`Command`] enum up front, so
//! the connection handler dispatches with a single `match` and never looks at
//! raw frames.

use super::Value;
use crate::core::error::{LivelockError, LivelockResult, ProtocolError};
use bytes::Bytes;
use std::time::Duration;

/// A parsed client request.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// `ACQUIRE name [ttl]`
    Acquire { name: Bytes, ttl: Option<Duration> },
    /// `RELEASE name`
    Release { name: Bytes },
    /// `EXTEND name ttl`
    Extend { name: Bytes, ttl: Duration },
    /// `PING [message]`
    Ping { message: Option<Bytes> },
    /// `HELLO [session_id]`
    Hello { session: Option<Bytes> },
    /// `QUIT`
    Quit,
}

impl Command {
    /// Resolve a decoded frame into a command.
    ///
    /// A frame that is not an array of bulk strings is a protocol error and
    /// fatal for the connection. Unknown commands and bad arguments are
    /// ordinary errors answered with an error line.
    pub fn from_frame(frame: Value) -> LivelockResult<Self> {
        let items = match frame {
            Value::Array(items) if !items.is_empty() => items,
            _ => return Err(ProtocolError::ExpectedCommandArray.into()),
        };

        let mut args = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Value::BulkString(b) => args.push(b),
                _ => return Err(ProtocolError::ExpectedCommandArray.into()),
            }
        }

        let mut args = args.into_iter();
        let Some(name) = args.next() else {
            return Err(ProtocolError::ExpectedCommandArray.into());
        };
        let args: Vec<Bytes> = args.collect();
        let command = String::from_utf8_lossy(&name).to_ascii_uppercase();

        match command.as_str() {
            "ACQUIRE" => {
                require_argc(&command, &args, 1, 2)?;
                let ttl = args.get(1).map(|raw| parse_ttl(raw)).transpose()?;
                Ok(Self::Acquire {
                    name: args[0].clone(),
                    ttl,
                })
            }
            "RELEASE" => {
                require_argc(&command, &args, 1, 1)?;
                Ok(Self::Release {
                    name: args[0].clone(),
                })
            }
            "EXTEND" => {
                require_argc(&command, &args, 2, 2)?;
                Ok(Self::Extend {
                    name: args[0].clone(),
                    ttl: parse_ttl(&args[1])?,
                })
            }
            "PING" => {
                require_argc(&command, &args, 0, 1)?;
                Ok(Self::Ping {
                    message: args.first().cloned(),
                })
            }
            "HELLO" => {
                require_argc(&command, &args, 0, 1)?;
                Ok(Self::Hello {
                    session: args.first().cloned(),
                })
            }
            "QUIT" => {
                require_argc(&command, &args, 0, 0)?;
                Ok(Self::Quit)
            }
            _ => Err(LivelockError::UnknownCommand { name: command }),
        }
    }

    /// Command name, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Acquire { .. } => "ACQUIRE",
            Self::Release { .. } => "RELEASE",
            Self::Extend { .. } => "EXTEND",
            Self::Ping { .. } => "PING",
            Self::Hello { .. } => "HELLO",
            Self::Quit => "QUIT",
        }
    }
}

fn require_argc(command: &str, args: &[Bytes], min: usize, max: usize) -> LivelockResult<()> {
    if args.len() < min || args.len() > max {
        return Err(LivelockError::WrongArity {
            command: command.to_ascii_lowercase(),
        });
    }
    Ok(())
}

/// Parse a TTL given in decimal seconds.
pub fn parse_ttl(raw: &[u8]) -> LivelockResult<Duration> {
    let secs = std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.trim().parse::<f64>().ok())
        .ok_or(LivelockError::InvalidTtl)?;
    if !secs.is_finite() || secs <= 0.0 {
        return Err(LivelockError::InvalidTtl);
    }
    match Duration::try_from_secs_f64(secs) {
        Ok(ttl) if !ttl.is_zero() => Ok(ttl),
        _ => Err(LivelockError::InvalidTtl),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(parts: &[&'static str]) -> Value {
        Value::Array(parts.iter().map(|p| Value::bulk(*p)).collect())
    }

    #[test]
    fn test_acquire_variants() {
        assert_eq!(
            Command::from_frame(frame(&["ACQUIRE", "job-42"])).unwrap(),
            Command::Acquire {
                name: Bytes::from_static(b"job-42"),
                ttl: None
            }
        );
        assert_eq!(
            Command::from_frame(frame(&["acquire", "job-42", "0.25"])).unwrap(),
            Command::Acquire {
                name: Bytes::from_static(b"job-42"),
                ttl: Some(Duration::from_millis(250))
            }
        );
    }

    #[test]
    fn test_other_commands() {
        assert_eq!(
            Command::from_frame(frame(&["Release", "x"])).unwrap(),
            Command::Release {
                name: Bytes::from_static(b"x")
            }
        );
        assert_eq!(
            Command::from_frame(frame(&["EXTEND", "x", "10"])).unwrap(),
            Command::Extend {
                name: Bytes::from_static(b"x"),
                ttl: Duration::from_secs(10)
            }
        );
        assert_eq!(
            Command::from_frame(frame(&["PING"])).unwrap(),
            Command::Ping { message: None }
        );
        assert_eq!(
            Command::from_frame(frame(&["hello"])).unwrap(),
            Command::Hello { session: None }
        );
        assert_eq!(Command::from_frame(frame(&["QUIT"])).unwrap(), Command::Quit);
    }

    #[test]
    fn test_invalid_ttls() {
        for bad in ["0", "-1", "abc", "inf", "NaN", "1e400", ""] {
            let err = Command::from_frame(frame(&["ACQUIRE", "x", bad])).unwrap_err();
            assert!(matches!(err, LivelockError::InvalidTtl), "ttl {:?}", bad);
        }
    }

    #[test]
    fn test_wrong_arity() {
        let err = Command::from_frame(frame(&["RELEASE"])).unwrap_err();
        assert_eq!(
            err.to_string(),
            "wrong number of arguments for 'release' command"
        );
        assert!(!err.is_fatal());

        let err = Command::from_frame(frame(&["EXTEND", "x"])).unwrap_err();
        assert!(matches!(err, LivelockError::WrongArity { .. }));
    }

    #[test]
    fn test_unknown_command_is_not_fatal() {
        let err = Command::from_frame(frame(&["GET", "x"])).unwrap_err();
        assert!(matches!(err, LivelockError::UnknownCommand { ref name } if name == "GET"));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_non_array_frames_are_fatal() {
        for bad in [
            Value::bulk("PING"),
            Value::Array(vec![]),
            Value::Array(vec![Value::bulk("PING"), Value::Integer(1)]),
            Value::Null,
        ] {
            let err = Command::from_frame(bad).unwrap_err();
            assert!(err.is_fatal());
        }
    }
}
