//! Error types and wire mapping.
//!
//! Two layers of errors exist. [`ProtocolError`] describes a byte stream that
//! cannot be decoded; it always ends the connection. [`LivelockError`] is the
//! crate-wide error and covers everything a command can run into, from lock
//! contention to invalid arguments. [`RespErrorMapping`] turns the latter into
//! RESP error lines.

use thiserror::Error;

/// Wire-level decoding failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Frame starts with a byte that is not a known type prefix.
    #[error("invalid type prefix 0x{0:02x}")]
    InvalidTypePrefix(u8),

    /// Length header is not a valid decimal or is out of range.
    #[error("invalid length '{0}'")]
    InvalidLength(String),

    /// Integer frame body is not a valid i64.
    #[error("invalid integer '{0}'")]
    InvalidInteger(String),

    /// Float frame body is not a valid f64.
    #[error("invalid float '{0}'")]
    InvalidFloat(String),

    /// Bulk payload is not terminated by CRLF.
    #[error("expected CRLF after bulk payload")]
    MissingCrlf,

    /// A frame (or the unparsed remainder of one) exceeds the payload ceiling.
    #[error("frame of {size} bytes exceeds max_payload {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// Arrays nested deeper than the decoder accepts.
    #[error("nesting deeper than {max} levels")]
    NestingTooDeep { max: usize },

    /// Request was not an array of bulk strings.
    #[error("expected array of bulk strings")]
    ExpectedCommandArray,
}

/// Common Livelock error conditions.
#[derive(Debug, Error)]
pub enum LivelockError {
    /// Undecodable input; fatal for the connection.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Another live session holds the lock.
    #[error("lock '{name}' is held by another session")]
    AlreadyHeld { name: String },

    /// Caller does not hold the lock (or it has expired).
    #[error("lock '{name}' is not held by this session")]
    NotHolder { name: String },

    /// Command name not recognised.
    #[error("unknown command '{name}'")]
    UnknownCommand { name: String },

    /// Command recognised but called with the wrong number of arguments.
    #[error("wrong number of arguments for '{command}' command")]
    WrongArity { command: String },

    /// TTL argument is not a positive finite number of seconds.
    #[error("invalid ttl")]
    InvalidTtl,

    /// Lock name longer than the configured limit.
    #[error("lock name too long ({len} > {max})")]
    LockNameTooLong { len: usize, max: usize },

    /// Session id does not name a resumable session.
    #[error("session {session} is unknown or not resumable")]
    UnknownSession { session: String },

    /// Invalid request.
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    /// Transport failure on the connection.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl LivelockError {
    /// Create an AlreadyHeld error.
    pub fn already_held(name: &[u8]) -> Self {
        Self::AlreadyHeld {
            name: String::from_utf8_lossy(name).into_owned(),
        }
    }

    /// Create a NotHolder error.
    pub fn not_holder(name: &[u8]) -> Self {
        Self::NotHolder {
            name: String::from_utf8_lossy(name).into_owned(),
        }
    }

    /// Create an InvalidRequest error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Create an Internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Check if this error must close the connection that produced it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Protocol(_) | Self::Io(_))
    }

    /// Check if this error is an expected outcome of lock contention.
    pub fn is_contention(&self) -> bool {
        matches!(self, Self::AlreadyHeld { .. } | Self::NotHolder { .. })
    }
}

/// Result type using LivelockError.
pub type LivelockResult<T> = Result<T, LivelockError>;

// ============================================================================
// RESP error mapping
// ============================================================================

/// Maps errors to RESP error lines.
pub struct RespErrorMapping;

impl RespErrorMapping {
    /// Map a LivelockError to a RESP error prefix.
    pub fn to_error_prefix(error: &LivelockError) -> &'static str {
        match error {
            LivelockError::UnknownSession { .. } => "NOSESSION",
            LivelockError::AlreadyHeld { .. } | LivelockError::NotHolder { .. } => "LOCKED",
            _ => "ERR",
        }
    }

    /// Render the full error line payload (`<PREFIX> <message>`).
    pub fn to_error_line(error: &LivelockError) -> (&'static str, String) {
        (Self::to_error_prefix(error), error.to_string())
    }
}
