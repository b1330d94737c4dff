//! Firehose frame decoding
//!
//! Each WebSocket binary message is two concatenated CBOR values: a header map
//! (`op`, and `t` for messages) and a body map whose shape depends on `t`.

use crate::cbor::{decode_value, find_value_end, CborValue};
use crate::error::{IngesterError, Result};

/// Header operation code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOp {
    /// `op = 1`
    Message,
    /// `op = -1`
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameHeader {
    pub op: FrameOp,
    /// Message type, e.g. `#commit`; absent on error frames
    pub t: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub header: FrameHeader,
    pub body: CborValue,
}

impl Frame {
    pub fn is_message(&self, t: &str) -> bool {
        self.header.op == FrameOp::Message && self.header.t.as_deref() == Some(t)
    }
}

/// Split a message buffer into its header and body values.
///
/// Fails if either value is malformed or truncated, or if the header is not a
/// map with a known `op`. Bytes after the body are ignored.
pub fn decode_frame(data: &[u8]) -> Result<Frame> {
    let header_end = find_value_end(data, 0)?;
    let body_end = find_value_end(data, header_end)?;

    let (header, _) = decode_value(&data[..header_end], 0)?;
    let (body, _) = decode_value(&data[..body_end], header_end)?;

    if !header.is_map() {
        return Err(IngesterError::InvalidFrame("header is not a map".to_string()));
    }
    let op = match header.get("op").and_then(CborValue::as_i64) {
        Some(1) => FrameOp::Message,
        Some(-1) => FrameOp::Error,
        Some(other) => {
            return Err(IngesterError::InvalidFrame(format!("unknown op {}", other)));
        }
        None => return Err(IngesterError::InvalidFrame("header has no op".to_string())),
    };
    let t = header.get("t").and_then(CborValue::as_str).map(str::to_string);

    if op == FrameOp::Message && t.is_none() {
        return Err(IngesterError::InvalidFrame("message header has no type".to_string()));
    }
    if !body.is_map() {
        return Err(IngesterError::InvalidFrame("body is not a map".to_string()));
    }

    Ok(Frame {
        header: FrameHeader { op, t },
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// {"op": 1, "t": "#info"} {"name": "OutdatedCursor"}
    fn info_frame() -> Vec<u8> {
        let mut data = vec![0xa2, 0x62, b'o', b'p', 0x01, 0x61, b't', 0x65];
        data.extend(b"#info");
        data.extend([0xa1, 0x64]);
        data.extend(b"name");
        data.push(0x6e);
        data.extend(b"OutdatedCursor");
        data
    }

    #[test]
    fn test_decode_info_frame() {
        let frame = decode_frame(&info_frame()).unwrap();
        assert_eq!(frame.header.op, FrameOp::Message);
        assert_eq!(frame.header.t.as_deref(), Some("#info"));
        assert!(frame.is_message("#info"));
        assert_eq!(
            frame.body.get("name").and_then(CborValue::as_str),
            Some("OutdatedCursor")
        );
    }

    #[test]
    fn test_decode_error_frame() {
        // {"op": -1} {"error": "FutureCursor"}
        let mut data = vec![0xa1, 0x62, b'o', b'p', 0x20, 0xa1, 0x65];
        data.extend(b"error");
        data.push(0x6c);
        data.extend(b"FutureCursor");

        let frame = decode_frame(&data).unwrap();
        assert_eq!(frame.header.op, FrameOp::Error);
        assert!(frame.header.t.is_none());
    }

    #[test]
    fn test_invalid_bytes_rejected() {
        assert!(decode_frame(&[0xff, 0xff, 0xff]).is_err());
        assert!(decode_frame(&[0xa5]).is_err());
        assert!(decode_frame(&[]).is_err());
    }

    #[test]
    fn test_missing_body_rejected() {
        let data = info_frame();
        // header only
        assert!(decode_frame(&data[..13]).is_err());
    }

    #[test]
    fn test_truncated_body_rejected() {
        let data = info_frame();
        assert!(decode_frame(&data[..data.len() - 3]).is_err());
    }

    #[test]
    fn test_header_must_be_map_with_op() {
        // [1] {}
        assert!(matches!(
            decode_frame(&[0x81, 0x01, 0xa0]),
            Err(IngesterError::InvalidFrame(_))
        ));
        // {"op": 7} {}
        assert!(matches!(
            decode_frame(&[0xa1, 0x62, b'o', b'p', 0x07, 0xa0]),
            Err(IngesterError::InvalidFrame(_))
        ));
    }
}
