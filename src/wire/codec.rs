//! Request framing/parsing and tagged response serialization.

use crate::errors::{DispatchError, ProtocolError};

use super::value::Value;

const TAG_NIL: u8 = 0;
const TAG_ERR: u8 = 1;
const TAG_STR: u8 = 2;
const TAG_INT: u8 = 3;
const TAG_DBL: u8 = 4;
const TAG_ARR: u8 = 5;
const TAG_KV: u8 = 6;

/// Maximum serialized response body, per the protocol (§4.6/§4.7). A larger
/// body is replaced with `ERR TOO_BIG` before the frame is sent.
pub(crate) const MAX_RESPONSE_BODY: usize = 4092;

pub(crate) enum ParseOutcome {
    /// Not enough bytes buffered yet for a full frame.
    Incomplete,
    Complete { args: Vec<Vec<u8>>, consumed: usize },
}

/// Attempts to parse one request frame from the front of `buf`. `max_body`
/// and `max_args` are the configured frame-size and argument-count limits.
pub(crate) fn parse_request(
    buf: &[u8],
    max_body: usize,
    max_args: usize,
) -> Result<ParseOutcome, ProtocolError> {
    if buf.len() < 4 {
        return Ok(ParseOutcome::Incomplete);
    }
    let body_len = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
    if body_len > max_body {
        return Err(ProtocolError::FrameTooBig);
    }
    if buf.len() < 4 + body_len {
        return Ok(ParseOutcome::Incomplete);
    }
    let body = &buf[4..4 + body_len];

    if body.len() < 4 {
        return Err(ProtocolError::MalformedArgs);
    }
    let n = u32::from_le_bytes(body[0..4].try_into().unwrap()) as usize;
    if n > max_args {
        return Err(ProtocolError::TooManyArgs);
    }
    let mut pos = 4;
    let mut args = Vec::with_capacity(n.min(max_args));
    for _ in 0..n {
        if body.len() < pos + 4 {
            return Err(ProtocolError::MalformedArgs);
        }
        let arg_len = u32::from_le_bytes(body[pos..pos + 4].try_into().unwrap()) as usize;
        pos += 4;
        if body.len() < pos + arg_len {
            return Err(ProtocolError::MalformedArgs);
        }
        args.push(body[pos..pos + arg_len].to_vec());
        pos += arg_len;
    }
    if pos != body.len() {
        return Err(ProtocolError::TrailingBytes);
    }
    Ok(ParseOutcome::Complete {
        args,
        consumed: 4 + body_len,
    })
}

fn write_value(buf: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Nil => buf.push(TAG_NIL),
        Value::Err(err) => {
            buf.push(TAG_ERR);
            buf.extend_from_slice(&err.code().to_le_bytes());
            let msg = err.to_string();
            buf.extend_from_slice(&(msg.len() as u32).to_le_bytes());
            buf.extend_from_slice(msg.as_bytes());
        }
        Value::Str(s) => {
            buf.push(TAG_STR);
            buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
            buf.extend_from_slice(s);
        }
        Value::Int(i) => {
            buf.push(TAG_INT);
            buf.extend_from_slice(&i.to_le_bytes());
        }
        Value::Dbl(d) => {
            buf.push(TAG_DBL);
            buf.extend_from_slice(&d.to_le_bytes());
        }
        Value::Arr(items) => {
            buf.push(TAG_ARR);
            buf.extend_from_slice(&(items.len() as u32).to_le_bytes());
            for item in items {
                write_value(buf, item);
            }
        }
        Value::Kv(key, val) => {
            buf.push(TAG_KV);
            let total = 4 + key.len() + 4 + val.len();
            buf.extend_from_slice(&(total as u32).to_le_bytes());
            buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
            buf.extend_from_slice(key);
            buf.extend_from_slice(&(val.len() as u32).to_le_bytes());
            buf.extend_from_slice(val);
        }
    }
}

/// Serializes `value` into a full length-prefixed frame, replacing an
/// oversize body with `ERR TOO_BIG`.
pub(crate) fn serialize_response(value: &Value) -> Vec<u8> {
    let mut body = Vec::new();
    write_value(&mut body, value);
    if body.len() > MAX_RESPONSE_BODY {
        body.clear();
        write_value(&mut body, &Value::Err(DispatchError::TooBig));
    }
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(&body);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(args: &[&[u8]]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&(args.len() as u32).to_le_bytes());
        for a in args {
            body.extend_from_slice(&(a.len() as u32).to_le_bytes());
            body.extend_from_slice(a);
        }
        let mut out = Vec::new();
        out.extend_from_slice(&(body.len() as u32).to_le_bytes());
        out.extend_from_slice(&body);
        out
    }

    #[test]
    fn round_trips_a_valid_request() {
        let raw = frame(&[b"set", b"foo", b"bar"]);
        match parse_request(&raw, 4096, 1024).unwrap() {
            ParseOutcome::Complete { args, consumed } => {
                assert_eq!(consumed, raw.len());
                assert_eq!(args, vec![b"set".to_vec(), b"foo".to_vec(), b"bar".to_vec()]);
            }
            ParseOutcome::Incomplete => panic!("expected a complete frame"),
        }
    }

    #[test]
    fn incomplete_frame_requests_more_bytes() {
        let raw = frame(&[b"get", b"foo"]);
        let partial = &raw[..raw.len() - 1];
        assert!(matches!(
            parse_request(partial, 4096, 1024).unwrap(),
            ParseOutcome::Incomplete
        ));
    }

    #[test]
    fn oversize_body_is_rejected() {
        let raw = frame(&[b"x"]);
        assert_eq!(
            parse_request(&raw, 2, 1024).unwrap_err(),
            ProtocolError::FrameTooBig
        );
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut raw = frame(&[b"get", b"foo"]);
        let body_len = u32::from_le_bytes(raw[0..4].try_into().unwrap());
        raw[0..4].copy_from_slice(&(body_len + 1).to_le_bytes());
        raw.push(0); // garbage byte beyond what the args actually consume
        assert_eq!(
            parse_request(&raw, 4096, 1024).unwrap_err(),
            ProtocolError::TrailingBytes
        );
    }

    #[test]
    fn too_many_args_is_rejected() {
        let args: Vec<&[u8]> = vec![b"a"; 5];
        let raw = frame(&args);
        assert_eq!(
            parse_request(&raw, 4096, 2).unwrap_err(),
            ProtocolError::TooManyArgs
        );
    }

    #[test]
    fn oversize_response_becomes_too_big() {
        let huge = Value::Str(vec![0u8; MAX_RESPONSE_BODY + 1]);
        let frame = serialize_response(&huge);
        let body_len = u32::from_le_bytes(frame[0..4].try_into().unwrap()) as usize;
        assert_eq!(body_len, frame.len() - 4);
        assert_eq!(frame[4], TAG_ERR);
        let code = i32::from_le_bytes(frame[5..9].try_into().unwrap());
        assert_eq!(code, DispatchError::TooBig.code());
    }

    #[test]
    fn small_response_round_trips_tag_and_payload() {
        let frame = serialize_response(&Value::Int(-7));
        let body_len = u32::from_le_bytes(frame[0..4].try_into().unwrap()) as usize;
        assert_eq!(body_len, 9);
        assert_eq!(frame[4], TAG_INT);
        assert_eq!(i64::from_le_bytes(frame[5..13].try_into().unwrap()), -7);
    }
}
