//! RESP2 encoding and streaming decoding (§4.1).
//!
//! The teacher crate builds its decoder on the `combine` parser-combinator
//! library. This module hand-rolls a small incremental byte-slice scanner
//! instead: the spec's invariant is that the decoder "consumes as many bytes
//! as are currently available and yields zero or more whole replies", which a
//! direct loop over a byte buffer satisfies more simply than threading
//! `combine`'s partial-consumption state through an async byte stream (see
//! DESIGN.md).

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::types::{ErrorKind, RedisError, RedisResult, ServerError, Value};

const MAX_INLINE_ERROR_LEN: usize = 4096;

/// Attempts to decode exactly one `Value` from the front of `buf`, returning
/// the number of bytes consumed alongside it. Returns `Ok(None)` when `buf`
/// holds an incomplete reply; the caller should read more bytes and retry.
pub fn try_parse_value(buf: &[u8]) -> RedisResult<Option<(Value, usize)>> {
    parse_at(buf, 0)
}

fn parse_at(buf: &[u8], start: usize) -> RedisResult<Option<(Value, usize)>> {
    let Some(&tag) = buf.get(start) else {
        return Ok(None);
    };
    let Some(line_end) = find_crlf(buf, start + 1) else {
        return Ok(None);
    };
    let line = &buf[start + 1..line_end];
    let after_line = line_end + 2;

    match tag {
        b'+' => {
            let s = to_utf8(line)?;
            Ok(Some((Value::Status(s), after_line)))
        }
        b'-' => {
            let s = to_utf8(line)?;
            if s.len() > MAX_INLINE_ERROR_LEN {
                return Err(protocol_error("error reply exceeds maximum length"));
            }
            Ok(Some((
                Value::ServerError(ServerError::parse(&s)),
                after_line,
            )))
        }
        b':' => {
            let n = to_utf8(line)?
                .parse::<i64>()
                .map_err(|_| protocol_error("invalid integer reply"))?;
            Ok(Some((Value::Int(n), after_line)))
        }
        b'$' => {
            let len = to_utf8(line)?
                .parse::<i64>()
                .map_err(|_| protocol_error("invalid bulk string length"))?;
            if len == -1 {
                return Ok(Some((Value::Nil, after_line)));
            }
            if len < 0 {
                return Err(protocol_error("negative bulk string length"));
            }
            let len = len as usize;
            let data_end = after_line + len;
            let total_end = data_end + 2;
            if buf.len() < total_end {
                return Ok(None);
            }
            if &buf[data_end..total_end] != b"\r\n" {
                return Err(protocol_error("bulk string missing trailing CRLF"));
            }
            Ok(Some((
                Value::Data(buf[after_line..data_end].to_vec()),
                total_end,
            )))
        }
        b'*' => {
            let len = to_utf8(line)?
                .parse::<i64>()
                .map_err(|_| protocol_error("invalid array length"))?;
            if len == -1 {
                return Ok(Some((Value::Nil, after_line)));
            }
            if len < 0 {
                return Err(protocol_error("negative array length"));
            }
            let mut items = Vec::with_capacity(len as usize);
            let mut cursor = after_line;
            for _ in 0..len {
                match parse_at(buf, cursor)? {
                    Some((value, consumed)) => {
                        items.push(value);
                        cursor = consumed;
                    }
                    None => return Ok(None),
                }
            }
            Ok(Some((Value::Bulk(items), cursor)))
        }
        other => Err(protocol_error(&format!(
            "unknown reply type tag {:?}",
            other as char
        ))),
    }
}

fn find_crlf(buf: &[u8], from: usize) -> Option<usize> {
    buf[from..]
        .windows(2)
        .position(|w| w == b"\r\n")
        .map(|p| from + p)
}

fn to_utf8(bytes: &[u8]) -> RedisResult<String> {
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|_| protocol_error("reply line is not valid UTF-8"))
}

fn protocol_error(msg: &str) -> RedisError {
    RedisError::new(ErrorKind::Protocol, msg.to_string())
}

/// Parses a single, already-complete buffer into a `Value`, failing if there
/// is trailing garbage or the reply is incomplete. Used by the synchronous
/// connection, which reads a fixed-size chunk at a time off a blocking socket.
pub fn parse_redis_value(bytes: &[u8]) -> RedisResult<Value> {
    match try_parse_value(bytes)? {
        Some((value, consumed)) if consumed == bytes.len() => Ok(value),
        Some(_) => Err(protocol_error("trailing bytes after a complete reply")),
        None => Err(protocol_error("incomplete reply")),
    }
}

/// Encodes a command as a RESP array of bulk strings: `*<n>\r\n` followed by
/// `n` `$<len>\r\n<bytes>\r\n` segments.
pub fn encode_command(args: &[Vec<u8>], out: &mut Vec<u8>) {
    out.reserve(args.iter().map(|a| a.len() + 16).sum::<usize>() + 16);
    out.push(b'*');
    write_itoa(out, args.len() as i64);
    out.extend_from_slice(b"\r\n");
    for arg in args {
        out.push(b'$');
        write_itoa(out, arg.len() as i64);
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
}

fn write_itoa(out: &mut Vec<u8>, n: i64) {
    let mut buf = itoa::Buffer::new();
    out.extend_from_slice(buf.format(n).as_bytes());
}

/// `tokio_util::codec` adapter so an async connection can drive a
/// `Framed<TcpStream, RespCodec>` as a combined `Stream<Item = RedisResult<Value>>`
/// + `Sink<Vec<u8>>` (pre-encoded commands are handed in already packed, since
/// pipelines encode several commands into one write).
#[derive(Debug, Default)]
pub struct RespCodec;

impl Decoder for RespCodec {
    type Item = Value;
    type Error = RedisError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Value>, RedisError> {
        match try_parse_value(src)? {
            Some((value, consumed)) => {
                src.advance(consumed);
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }
}

impl Encoder<Vec<u8>> for RespCodec {
    type Error = RedisError;

    fn encode(&mut self, item: Vec<u8>, dst: &mut BytesMut) -> Result<(), RedisError> {
        dst.extend_from_slice(&item);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(args: &[&str]) -> Vec<u8> {
        let args: Vec<Vec<u8>> = args.iter().map(|s| s.as_bytes().to_vec()).collect();
        let mut out = Vec::new();
        encode_command(&args, &mut out);
        out
    }

    #[test]
    fn encodes_simple_command() {
        let bytes = roundtrip(&["SET", "foo", "bar"]);
        assert_eq!(bytes, b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n");
    }

    #[test]
    fn decodes_each_reply_shape() {
        assert_eq!(
            parse_redis_value(b"+OK\r\n").unwrap(),
            Value::Status("OK".into())
        );
        assert_eq!(parse_redis_value(b":1000\r\n").unwrap(), Value::Int(1000));
        assert_eq!(
            parse_redis_value(b"$3\r\nfoo\r\n").unwrap(),
            Value::Data(b"foo".to_vec())
        );
        assert_eq!(parse_redis_value(b"$-1\r\n").unwrap(), Value::Nil);
        assert_eq!(parse_redis_value(b"*-1\r\n").unwrap(), Value::Nil);
        assert_eq!(
            parse_redis_value(b"*2\r\n$3\r\nfoo\r\n:7\r\n").unwrap(),
            Value::Bulk(vec![Value::Data(b"foo".to_vec()), Value::Int(7)])
        );
    }

    #[test]
    fn decodes_nested_arrays_to_arbitrary_depth() {
        let value = parse_redis_value(b"*1\r\n*1\r\n*1\r\n:9\r\n").unwrap();
        assert_eq!(
            value,
            Value::Bulk(vec![Value::Bulk(vec![Value::Bulk(vec![Value::Int(9)])])])
        );
    }

    #[test]
    fn error_reply_is_classified_by_leading_word() {
        let value = parse_redis_value(b"-MOVED 3999 127.0.0.1:6381\r\n").unwrap();
        let Value::ServerError(e) = value else {
            panic!("expected ServerError");
        };
        assert_eq!(e.code(), Some("MOVED"));
    }

    #[test]
    fn streaming_decoder_yields_nothing_on_partial_input() {
        assert_eq!(try_parse_value(b"*2\r\n$3\r\nfoo").unwrap(), None);
        assert_eq!(try_parse_value(b"$5\r\nfoo").unwrap(), None);
    }

    #[test]
    fn streaming_decoder_reports_bytes_consumed_and_feeds_incrementally() {
        let mut buf = b"+OK\r\n:1\r\n".to_vec();
        let (first, consumed) = try_parse_value(&buf).unwrap().unwrap();
        assert_eq!(first, Value::Status("OK".into()));
        buf.drain(..consumed);
        let (second, consumed2) = try_parse_value(&buf).unwrap().unwrap();
        assert_eq!(second, Value::Int(1));
        assert_eq!(consumed2, buf.len());
    }

    #[test]
    fn malformed_reply_is_a_protocol_error() {
        let err = try_parse_value(b"%3\r\n").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }

    #[test]
    fn encode_then_decode_is_identity() {
        let args = &["HSET", "key", "field", "value with spaces"];
        let packed = roundtrip(args);
        let decoded = parse_redis_value(&{
            // a real server would reply with an integer; here we just prove
            // that what we sent is itself parseable as a RESP array of
            // bulk strings, matching §4.1's "encode as a RESP array" rule.
            packed.clone()
        })
        .unwrap();
        let Value::Bulk(items) = decoded else {
            panic!("expected array")
        };
        let roundtripped: Vec<Vec<u8>> = items
            .into_iter()
            .map(|v| match v {
                Value::Data(d) => d,
                _ => panic!("expected bulk string"),
            })
            .collect();
        let expected: Vec<Vec<u8>> = args.iter().map(|s| s.as_bytes().to_vec()).collect();
        assert_eq!(roundtripped, expected);
    }
}
