//! Per-connection codec.
//!
//! Combines RESP framing with command resolution: the connection handler
//! feeds it the read buffer and gets back commands, and hands it reply values
//! to append to the write buffer.

use super::{Command, DecodeResult, RespDecoder, RespEncoder, Value};
use crate::core::error::LivelockResult;
use bytes::BytesMut;

/// Lock protocol codec.
#[derive(Debug, Clone, Copy)]
pub struct LockCodec {
    decoder: RespDecoder,
}

impl LockCodec {
    /// Create a codec enforcing `max_payload` bytes per request frame.
    pub fn new(max_payload: usize) -> Self {
        Self {
            decoder: RespDecoder::new(max_payload),
        }
    }

    /// Decode one request from `buffer`.
    ///
    /// `Complete(Err(_))` carries a request that was framed correctly but
    /// could not be resolved; whether it ends the connection is up to
    /// [`LivelockError::is_fatal`](crate::core::error::LivelockError::is_fatal).
    /// The frame is consumed either way.
    pub fn decode(&self, buffer: &mut BytesMut) -> DecodeResult<LivelockResult<Command>> {
        if buffer.is_empty() {
            return DecodeResult::Incomplete;
        }
        match self.decoder.decode_next(buffer) {
            DecodeResult::Complete(frame) => DecodeResult::Complete(Command::from_frame(frame)),
            DecodeResult::Incomplete => DecodeResult::Incomplete,
            DecodeResult::Invalid(e) => DecodeResult::Invalid(e),
        }
    }

    /// Append an encoded reply to `buffer`.
    pub fn encode(&self, reply: &Value, buffer: &mut BytesMut) {
        RespEncoder::encode_into(reply, buffer);
    }

    /// Get the protocol name.
    pub fn protocol_name(&self) -> &'static str {
        "resp"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::LivelockError;

    #[test]
    fn test_decode_pipelined_requests() {
        let codec = LockCodec::new(1024);
        let mut buf = BytesMut::from(
            &b"*1\r\n$4\r\nPING\r\n*2\r\n$3\r\nGET\r\n$1\r\nx\r\n*1\r\n$4\r\nQUIT\r\n"[..],
        );

        assert!(matches!(
            codec.decode(&mut buf),
            DecodeResult::Complete(Ok(Command::Ping { message: None }))
        ));
        assert!(matches!(
            codec.decode(&mut buf),
            DecodeResult::Complete(Err(LivelockError::UnknownCommand { .. }))
        ));
        assert!(matches!(
            codec.decode(&mut buf),
            DecodeResult::Complete(Ok(Command::Quit))
        ));
        assert!(matches!(codec.decode(&mut buf), DecodeResult::Incomplete));
    }

    #[test]
    fn test_oversize_request_is_invalid() {
        let codec = LockCodec::new(16);
        let mut buf = BytesMut::from(&b"*2\r\n$7\r\nACQUIRE\r\n$9\r\nlong-name\r\n"[..]);
        assert!(matches!(codec.decode(&mut buf), DecodeResult::Invalid(_)));
    }

    #[test]
    fn test_encode_reply() {
        let codec = LockCodec::new(1024);
        let mut buf = BytesMut::new();
        codec.encode(&Value::Integer(1), &mut buf);
        codec.encode(&Value::Null, &mut buf);
        assert_eq!(&buf[..], b":1\r\n$-1\r\n");
    }
}
