//! Wire protocol.
//!
//! Livelock speaks a subset of RESP: requests are arrays of bulk strings,
//! replies use integers, bulk strings, floats, arrays, simple strings, error
//! lines and the null bulk string. This module owns the value model; framing
//! lives in [`resp`], request parsing in [`command`] and the per-connection
//! glue in [`codec`].

pub mod codec;
pub mod command;
pub mod resp;

pub use codec::LockCodec;
pub use command::Command;
pub use resp::{RespDecoder, RespEncoder};

use crate::core::error::{LivelockError, ProtocolError, RespErrorMapping};
use bytes::{Bytes, BytesMut};

/// Maximum nesting depth for arrays.
pub const MAX_NESTING_DEPTH: usize = 32;

/// RESP type byte prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RespType {
    /// Simple string (+)
    SimpleString,
    /// Error (-)
    Error,
    /// Integer (:)
    Integer,
    /// Bulk string ($)
    BulkString,
    /// Array (*)
    Array,
    /// Double (,)
    Double,
}

impl RespType {
    /// Get the type from a prefix byte.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            b'+' => Some(Self::SimpleString),
            b'-' => Some(Self::Error),
            b':' => Some(Self::Integer),
            b'$' => Some(Self::BulkString),
            b'*' => Some(Self::Array),
            b',' => Some(Self::Double),
            _ => None,
        }
    }

    /// Get the prefix byte for this type.
    pub fn prefix(&self) -> u8 {
        match self {
            Self::SimpleString => b'+',
            Self::Error => b'-',
            Self::Integer => b':',
            Self::BulkString => b'$',
            Self::Array => b'*',
            Self::Double => b',',
        }
    }
}

/// An error line (`-KIND message`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RespError {
    /// Error kind (e.g. "ERR", "NOSESSION").
    pub kind: String,
    /// Human-readable message.
    pub message: String,
}

impl std::fmt::Display for RespError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{} {}", self.kind, self.message)
        }
    }
}

/// A decoded or to-be-encoded RESP value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Simple string.
    SimpleString(String),
    /// Error line.
    Error(RespError),
    /// Integer.
    Integer(i64),
    /// Bulk string.
    BulkString(Bytes),
    /// Double.
    Float(f64),
    /// Array of values.
    Array(Vec<Value>),
    /// Null (`$-1`).
    Null,
}

impl Value {
    /// `+OK`
    pub fn ok() -> Self {
        Self::SimpleString("OK".to_string())
    }

    /// `+PONG`
    pub fn pong() -> Self {
        Self::SimpleString("PONG".to_string())
    }

    /// Error line with an explicit kind.
    pub fn err(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error(RespError {
            kind: kind.into(),
            message: message.into(),
        })
    }

    /// Error line for a command failure.
    pub fn from_error(error: &LivelockError) -> Self {
        let (kind, message) = RespErrorMapping::to_error_line(error);
        Self::err(kind, message)
    }

    /// Bulk string.
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Self::BulkString(data.into())
    }

    /// Borrow the payload of a bulk string.
    pub fn as_bulk(&self) -> Option<&Bytes> {
        match self {
            Self::BulkString(b) => Some(b),
            _ => None,
        }
    }

    /// Check for the null value.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

/// Outcome of trying to decode one frame from a buffer.
#[derive(Debug)]
pub enum DecodeResult<T> {
    /// A full frame was decoded and consumed from the buffer.
    Complete(T),
    /// More bytes are needed; nothing was consumed.
    Incomplete,
    /// The buffer cannot be decoded.
    Invalid(ProtocolError),
}

/// `$<len>\r\n<bytes>\r\n`
pub fn encode_bulk_string(data: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(data.len() + 16);
    resp::put_bulk_string(&mut buf, data);
    buf.freeze()
}

/// `$-1\r\n`
pub fn encode_null() -> Bytes {
    Bytes::from_static(b"$-1\r\n")
}

/// `:<i>\r\n`
pub fn encode_integer(n: i64) -> Bytes {
    let mut buf = BytesMut::with_capacity(24);
    resp::put_integer(&mut buf, n);
    buf.freeze()
}

/// `,<f>\r\n`
pub fn encode_float(f: f64) -> Bytes {
    let mut buf = BytesMut::with_capacity(32);
    resp::put_float(&mut buf, f);
    buf.freeze()
}

/// `*<n>\r\n` followed by each element.
pub fn encode_array(items: &[Value]) -> Bytes {
    let mut buf = BytesMut::new();
    RespEncoder::encode_into(&Value::Array(items.to_vec()), &mut buf);
    buf.freeze()
}
