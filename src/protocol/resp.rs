//! RESP framing.
//!
//! The decoder is purely functional over its input: [`RespDecoder::parse`]
//! reports how many bytes one complete frame occupies without touching the
//! buffer, and [`RespDecoder::decode_next`] advances the buffer only after a
//! whole frame is available. Partial frames are never consumed.

use super::{DecodeResult, RespError, RespType, Value, MAX_NESTING_DEPTH};
use crate::core::error::ProtocolError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// A parsed value and the number of bytes it occupied, or `None` when the
/// input ends mid-frame.
pub type Parsed = Option<(Value, usize)>;

/// Streaming RESP decoder with a per-frame size ceiling.
#[derive(Debug, Clone, Copy)]
pub struct RespDecoder {
    max_frame: usize,
}

impl RespDecoder {
    /// Create a decoder rejecting frames larger than `max_frame` bytes.
    pub fn new(max_frame: usize) -> Self {
        Self { max_frame }
    }

    /// Frame size ceiling in bytes.
    pub fn max_frame(&self) -> usize {
        self.max_frame
    }

    /// Parse one frame from the start of `data` without consuming anything.
    pub fn parse(&self, data: &[u8]) -> Result<Parsed, ProtocolError> {
        self.parse_value(data, 0)
    }

    /// Decode and consume exactly one frame from `buf`.
    pub fn decode_next(&self, buf: &mut BytesMut) -> DecodeResult<Value> {
        match self.parse(buf) {
            Ok(Some((_, consumed))) if consumed > self.max_frame => {
                DecodeResult::Invalid(ProtocolError::FrameTooLarge {
                    size: consumed,
                    max: self.max_frame,
                })
            }
            Ok(Some((value, consumed))) => {
                buf.advance(consumed);
                DecodeResult::Complete(value)
            }
            // The pending frame already exceeds the ceiling; waiting for the
            // rest would only buffer more.
            Ok(None) if buf.len() > self.max_frame => {
                DecodeResult::Invalid(ProtocolError::FrameTooLarge {
                    size: buf.len(),
                    max: self.max_frame,
                })
            }
            Ok(None) => DecodeResult::Incomplete,
            Err(e) => DecodeResult::Invalid(e),
        }
    }

    fn parse_value(&self, data: &[u8], depth: usize) -> Result<Parsed, ProtocolError> {
        let Some(&type_byte) = data.first() else {
            return Ok(None);
        };
        let body = &data[1..];

        let parsed = match RespType::from_byte(type_byte) {
            Some(RespType::SimpleString) => read_line(body).map(|(line, n)| {
                (
                    Value::SimpleString(String::from_utf8_lossy(line).into_owned()),
                    n,
                )
            }),
            Some(RespType::Error) => {
                read_line(body).map(|(line, n)| (Value::Error(parse_error_line(line)), n))
            }
            Some(RespType::Integer) => match read_line(body) {
                Some((line, n)) => Some((Value::Integer(parse_integer(line)?), n)),
                None => None,
            },
            Some(RespType::Double) => match read_line(body) {
                Some((line, n)) => Some((Value::Float(parse_float(line)?), n)),
                None => None,
            },
            Some(RespType::BulkString) => self.parse_bulk_string(body)?,
            Some(RespType::Array) => self.parse_array(body, depth)?,
            None => return Err(ProtocolError::InvalidTypePrefix(type_byte)),
        };

        // +1 for the type prefix.
        Ok(parsed.map(|(value, n)| (value, n + 1)))
    }

    /// Parse a bulk string ($6\r\nfoobar\r\n).
    fn parse_bulk_string(&self, data: &[u8]) -> Result<Parsed, ProtocolError> {
        let Some((line, header)) = read_line(data) else {
            return Ok(None);
        };
        let len = match parse_length(line)? {
            -1 => return Ok(Some((Value::Null, header))),
            len if len < 0 => return Err(invalid_length(line)),
            len => len as usize,
        };
        if len > self.max_frame {
            return Err(ProtocolError::FrameTooLarge {
                size: len,
                max: self.max_frame,
            });
        }

        let end = header + len;
        if data.len() < end + 2 {
            return Ok(None);
        }
        if &data[end..end + 2] != b"\r\n" {
            return Err(ProtocolError::MissingCrlf);
        }

        let payload = Bytes::copy_from_slice(&data[header..end]);
        Ok(Some((Value::BulkString(payload), end + 2)))
    }

    /// Parse an array (*2\r\n...).
    fn parse_array(&self, data: &[u8], depth: usize) -> Result<Parsed, ProtocolError> {
        if depth >= MAX_NESTING_DEPTH {
            return Err(ProtocolError::NestingTooDeep {
                max: MAX_NESTING_DEPTH,
            });
        }

        let Some((line, header)) = read_line(data) else {
            return Ok(None);
        };
        let len = match parse_length(line)? {
            -1 => return Ok(Some((Value::Null, header))),
            len if len < 0 => return Err(invalid_length(line)),
            len => len as usize,
        };
        // Every element takes at least three bytes.
        if len.saturating_mul(3) > self.max_frame {
            return Err(ProtocolError::FrameTooLarge {
                size: len.saturating_mul(3),
                max: self.max_frame,
            });
        }

        let mut items = Vec::with_capacity(len);
        let mut offset = header;
        for _ in 0..len {
            match self.parse_value(&data[offset..], depth + 1)? {
                Some((value, n)) => {
                    items.push(value);
                    offset += n;
                }
                None => return Ok(None),
            }
        }

        Ok(Some((Value::Array(items), offset)))
    }
}

/// Position of the first CRLF.
pub fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(2).position(|window| window == b"\r\n")
}

/// Split off one CRLF-terminated line, returning it and the bytes it spans.
fn read_line(data: &[u8]) -> Option<(&[u8], usize)> {
    find_crlf(data).map(|pos| (&data[..pos], pos + 2))
}

fn invalid_length(line: &[u8]) -> ProtocolError {
    ProtocolError::InvalidLength(String::from_utf8_lossy(line).into_owned())
}

fn parse_length(line: &[u8]) -> Result<i64, ProtocolError> {
    std::str::from_utf8(line)
        .ok()
        .filter(|s| !s.is_empty() && !s.starts_with('+'))
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| invalid_length(line))
}

fn parse_integer(line: &[u8]) -> Result<i64, ProtocolError> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| ProtocolError::InvalidInteger(String::from_utf8_lossy(line).into_owned()))
}

fn parse_float(line: &[u8]) -> Result<f64, ProtocolError> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| ProtocolError::InvalidFloat(String::from_utf8_lossy(line).into_owned()))
}

fn parse_error_line(line: &[u8]) -> RespError {
    let s = String::from_utf8_lossy(line);
    match s.split_once(' ') {
        Some((kind, message)) => RespError {
            kind: kind.to_string(),
            message: message.to_string(),
        },
        None => RespError {
            kind: s.into_owned(),
            message: String::new(),
        },
    }
}

// ============================================================================
// Encoding
// ============================================================================

/// RESP encoder.
pub struct RespEncoder;

impl RespEncoder {
    /// Encode a value to a fresh buffer.
    pub fn encode(value: &Value) -> Vec<u8> {
        let mut buf = BytesMut::new();
        Self::encode_into(value, &mut buf);
        buf.to_vec()
    }

    /// Append the encoding of `value` to `buf`.
    pub fn encode_into(value: &Value, buf: &mut BytesMut) {
        match value {
            Value::SimpleString(s) => put_line(buf, RespType::SimpleString, s),
            Value::Error(e) => put_line(buf, RespType::Error, &e.to_string()),
            Value::Integer(n) => put_integer(buf, *n),
            Value::BulkString(data) => put_bulk_string(buf, data),
            Value::Float(f) => put_float(buf, *f),
            Value::Array(items) => {
                put_header(buf, RespType::Array, items.len() as i64);
                for item in items {
                    Self::encode_into(item, buf);
                }
            }
            Value::Null => buf.extend_from_slice(b"$-1\r\n"),
        }
    }
}

fn put_header(buf: &mut BytesMut, kind: RespType, n: i64) {
    buf.put_u8(kind.prefix());
    buf.extend_from_slice(n.to_string().as_bytes());
    buf.extend_from_slice(b"\r\n");
}

// Simple strings and error lines cannot carry CR or LF.
fn put_line(buf: &mut BytesMut, kind: RespType, text: &str) {
    buf.put_u8(kind.prefix());
    buf.extend(
        text.bytes()
            .map(|b| if b == b'\r' || b == b'\n' { b' ' } else { b }),
    );
    buf.extend_from_slice(b"\r\n");
}

pub(crate) fn put_bulk_string(buf: &mut BytesMut, data: &[u8]) {
    put_header(buf, RespType::BulkString, data.len() as i64);
    buf.extend_from_slice(data);
    buf.extend_from_slice(b"\r\n");
}

pub(crate) fn put_integer(buf: &mut BytesMut, n: i64) {
    put_header(buf, RespType::Integer, n);
}

pub(crate) fn put_float(buf: &mut BytesMut, f: f64) {
    let text = if f.is_nan() {
        "nan".to_string()
    } else if f.is_infinite() {
        let sign = if f > 0.0 { "" } else { "-" };
        format!("{}inf", sign)
    } else {
        f.to_string()
    };
    buf.put_u8(RespType::Double.prefix());
    buf.extend_from_slice(text.as_bytes());
    buf.extend_from_slice(b"\r\n");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoder() -> RespDecoder {
        RespDecoder::new(1024)
    }

    #[test]
    fn test_parse_command_array() {
        let data = b"*2\r\n$7\r\nRELEASE\r\n$6\r\njob-42\r\n";
        let (value, consumed) = decoder().parse(data).unwrap().unwrap();
        assert_eq!(consumed, data.len());
        assert_eq!(
            value,
            Value::Array(vec![Value::bulk("RELEASE"), Value::bulk("job-42")])
        );
    }

    #[test]
    fn test_parse_scalars() {
        let d = decoder();
        assert_eq!(
            d.parse(b"+OK\r\n").unwrap(),
            Some((Value::SimpleString("OK".into()), 5))
        );
        assert_eq!(d.parse(b":-12\r\n").unwrap(), Some((Value::Integer(-12), 6)));
        assert_eq!(d.parse(b",2.5\r\n").unwrap(), Some((Value::Float(2.5), 6)));
        assert_eq!(d.parse(b"$-1\r\n").unwrap(), Some((Value::Null, 5)));
        assert_eq!(d.parse(b"*-1\r\n").unwrap(), Some((Value::Null, 5)));
        assert_eq!(
            d.parse(b"-ERR bad thing\r\n").unwrap(),
            Some((Value::err("ERR", "bad thing"), 16))
        );
    }

    #[test]
    fn test_parse_special_floats() {
        let d = decoder();
        assert!(matches!(
            d.parse(b",inf\r\n").unwrap(),
            Some((Value::Float(f), _)) if f.is_infinite() && f > 0.0
        ));
        assert!(matches!(
            d.parse(b",-inf\r\n").unwrap(),
            Some((Value::Float(f), _)) if f.is_infinite() && f < 0.0
        ));
        assert!(matches!(
            d.parse(b",nan\r\n").unwrap(),
            Some((Value::Float(f), _)) if f.is_nan()
        ));
    }

    #[test]
    fn test_every_prefix_is_incomplete() {
        let data = b"*3\r\n$7\r\nACQUIRE\r\n$6\r\njob-42\r\n$2\r\n10\r\n";
        for cut in 0..data.len() {
            assert_eq!(decoder().parse(&data[..cut]).unwrap(), None, "cut at {}", cut);
        }
        assert!(decoder().parse(data).unwrap().is_some());
    }

    #[test]
    fn test_decode_next_consumes_one_frame() {
        let mut buf = BytesMut::from(&b"*1\r\n$4\r\nPING\r\n*1\r\n$4\r\nPI"[..]);
        let d = decoder();

        assert!(matches!(d.decode_next(&mut buf), DecodeResult::Complete(_)));
        assert_eq!(&buf[..], b"*1\r\n$4\r\nPI");
        assert!(matches!(d.decode_next(&mut buf), DecodeResult::Incomplete));
        assert_eq!(buf.len(), 10);

        buf.extend_from_slice(b"NG\r\n");
        assert!(matches!(d.decode_next(&mut buf), DecodeResult::Complete(_)));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_invalid_prefix() {
        let mut buf = BytesMut::from(&b"GET foo\r\n"[..]);
        assert!(matches!(
            decoder().decode_next(&mut buf),
            DecodeResult::Invalid(ProtocolError::InvalidTypePrefix(b'G'))
        ));
    }

    #[test]
    fn test_invalid_lengths() {
        let d = decoder();
        assert!(matches!(
            d.parse(b"$abc\r\n"),
            Err(ProtocolError::InvalidLength(_))
        ));
        assert!(matches!(
            d.parse(b"*-2\r\n"),
            Err(ProtocolError::InvalidLength(_))
        ));
        assert!(matches!(
            d.parse(b"$\r\n"),
            Err(ProtocolError::InvalidLength(_))
        ));
        assert!(matches!(
            d.parse(b":12x\r\n"),
            Err(ProtocolError::InvalidInteger(_))
        ));
    }

    #[test]
    fn test_missing_crlf_after_bulk() {
        assert!(matches!(
            decoder().parse(b"$3\r\nabcXY"),
            Err(ProtocolError::MissingCrlf)
        ));
    }

    #[test]
    fn test_declared_bulk_too_large() {
        assert!(matches!(
            decoder().parse(b"$4096\r\n"),
            Err(ProtocolError::FrameTooLarge { size: 4096, max: 1024 })
        ));
    }

    #[test]
    fn test_complete_frame_too_large() {
        let d = RespDecoder::new(32);
        let mut buf = BytesMut::new();
        RespEncoder::encode_into(
            &Value::Array(vec![Value::bulk("ACQUIRE"), Value::bulk("a-rather-long-lock")]),
            &mut buf,
        );
        assert!(matches!(
            d.decode_next(&mut buf),
            DecodeResult::Invalid(ProtocolError::FrameTooLarge { max: 32, .. })
        ));
    }

    #[test]
    fn test_partial_frame_too_large() {
        let d = RespDecoder::new(32);
        let mut buf = BytesMut::from(&b"*1\r\n$1"[..]);
        buf.extend_from_slice(&[b'0'; 40]);
        assert!(matches!(
            d.decode_next(&mut buf),
            DecodeResult::Invalid(ProtocolError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_nesting_limit() {
        let mut data = Vec::new();
        for _ in 0..=MAX_NESTING_DEPTH {
            data.extend_from_slice(b"*1\r\n");
        }
        data.extend_from_slice(b":1\r\n");
        assert!(matches!(
            decoder().parse(&data),
            Err(ProtocolError::NestingTooDeep { .. })
        ));
    }

    #[test]
    fn test_encode_values() {
        assert_eq!(RespEncoder::encode(&Value::ok()), b"+OK\r\n");
        assert_eq!(
            RespEncoder::encode(&Value::err("ERR", "invalid ttl")),
            b"-ERR invalid ttl\r\n"
        );
        assert_eq!(
            RespEncoder::encode(&Value::Array(vec![
                Value::Integer(1),
                Value::Float(1700000010.0)
            ])),
            b"*2\r\n:1\r\n,1700000010\r\n"
        );
        assert_eq!(RespEncoder::encode(&Value::Float(f64::INFINITY)), b",inf\r\n");
        assert_eq!(RespEncoder::encode(&Value::Float(f64::NAN)), b",nan\r\n");
    }

    #[test]
    fn test_encode_strips_newlines_from_lines() {
        assert_eq!(
            RespEncoder::encode(&Value::err("ERR", "line\r\nbreak")),
            b"-ERR line  break\r\n"
        );
    }

    #[test]
    fn test_nested_roundtrip() {
        let value = Value::Array(vec![
            Value::Array(vec![Value::Integer(1), Value::Null]),
            Value::bulk(&b"\x00\xff\r\n"[..]),
            Value::Float(-0.25),
        ]);
        let encoded = RespEncoder::encode(&value);
        let (decoded, consumed) = decoder().parse(&encoded).unwrap().unwrap();
        assert_eq!(decoded, value);
        assert_eq!(consumed, encoded.len());
    }
}
