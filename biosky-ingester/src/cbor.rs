//! Minimal CBOR reader for firehose frames
//!
//! Two entry points share one set of header rules:
//! - [`find_value_end`] locates the end of the value starting at an offset
//!   without materialising it.
//! - [`decode_value`] materialises a [`CborValue`].
//!
//! Only definite-length items are accepted (DAG-CBOR forbids the indefinite
//! forms). Nesting is limited to [`MAX_DEPTH`] levels. Every failure is an
//! `Err(CborError)`; no input can cause a read past the end of the buffer.

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use serde_json::{Map, Number, Value};
use thiserror::Error;

use crate::cid::Cid;

/// Deepest container nesting accepted before decoding fails
pub const MAX_DEPTH: usize = 64;

/// CBOR tag for IPLD CID links
pub const CID_TAG: u64 = 42;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CborError {
    #[error("offset {offset} is outside the {len}-byte buffer")]
    OutOfBounds { offset: usize, len: usize },

    #[error("value truncated: {needed} bytes needed at offset {offset}, buffer has {len}")]
    Truncated { offset: usize, needed: u64, len: usize },

    #[error("reserved additional info {0}")]
    ReservedAdditionalInfo(u8),

    #[error("nesting exceeds {0} levels")]
    DepthExceeded(usize),

    #[error("unsupported item: {0}")]
    UnsupportedType(&'static str),

    #[error("invalid UTF-8 in text string at offset {0}")]
    InvalidUtf8(usize),
}

pub type CborResult<T> = std::result::Result<T, CborError>;

/// Decoded initial byte plus argument
#[derive(Debug, Clone, Copy)]
struct Head {
    major: u8,
    info: u8,
    value: u64,
    /// Offset just past the head (and its argument bytes)
    end: usize,
}

fn read_head(buf: &[u8], start: usize) -> CborResult<Head> {
    let initial = *buf.get(start).ok_or(CborError::OutOfBounds {
        offset: start,
        len: buf.len(),
    })?;
    let major = initial >> 5;
    let info = initial & 0x1f;

    let arg_len = match info {
        0..=23 => 0,
        24 => 1,
        25 => 2,
        26 => 4,
        27 => 8,
        28..=30 => return Err(CborError::ReservedAdditionalInfo(info)),
        _ => return Err(CborError::UnsupportedType("indefinite-length item")),
    };

    let arg_start = start + 1;
    let end = arg_start + arg_len;
    if end > buf.len() {
        return Err(CborError::Truncated {
            offset: arg_start,
            needed: arg_len as u64,
            len: buf.len(),
        });
    }

    let value = if arg_len == 0 {
        u64::from(info)
    } else {
        buf[arg_start..end]
            .iter()
            .fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
    };

    Ok(Head { major, info, value, end })
}

/// Offset one past the end of `len` payload bytes starting at `start`
fn payload_end(buf: &[u8], start: usize, len: u64) -> CborResult<usize> {
    let remaining = (buf.len() - start) as u64;
    if len > remaining {
        return Err(CborError::Truncated {
            offset: start,
            needed: len,
            len: buf.len(),
        });
    }
    Ok(start + len as usize)
}

/// Element count must be plausible for the bytes left (each item takes at least one)
fn check_count(buf: &[u8], start: usize, items: u64) -> CborResult<()> {
    let remaining = (buf.len() - start) as u64;
    if items > remaining {
        return Err(CborError::Truncated {
            offset: start,
            needed: items,
            len: buf.len(),
        });
    }
    Ok(())
}

/// Offset one past the end of the CBOR value beginning at `start`.
///
/// Fails on an empty buffer, a `start` at or past the end, reserved additional
/// info (28-30), indefinite lengths, truncation, or nesting deeper than
/// [`MAX_DEPTH`].
pub fn find_value_end(buf: &[u8], start: usize) -> CborResult<usize> {
    skip_value(buf, start, 0)
}

fn skip_value(buf: &[u8], start: usize, depth: usize) -> CborResult<usize> {
    if depth > MAX_DEPTH {
        return Err(CborError::DepthExceeded(MAX_DEPTH));
    }
    let head = read_head(buf, start)?;

    match head.major {
        0 | 1 | 7 => Ok(head.end),
        2 | 3 => payload_end(buf, head.end, head.value),
        4 => {
            check_count(buf, head.end, head.value)?;
            let mut pos = head.end;
            for _ in 0..head.value {
                pos = skip_value(buf, pos, depth + 1)?;
            }
            Ok(pos)
        }
        5 => {
            check_count(buf, head.end, head.value.saturating_mul(2))?;
            let mut pos = head.end;
            for _ in 0..head.value {
                pos = skip_value(buf, pos, depth + 1)?;
                pos = skip_value(buf, pos, depth + 1)?;
            }
            Ok(pos)
        }
        _ => skip_value(buf, head.end, depth + 1),
    }
}

/// A decoded CBOR data item
#[derive(Debug, Clone, PartialEq)]
pub enum CborValue {
    Unsigned(u64),
    /// Negative integer `-1 - n`, stored as `n`
    Negative(u64),
    Bytes(Vec<u8>),
    Text(String),
    Array(Vec<CborValue>),
    /// Entries in encoded order
    Map(Vec<(CborValue, CborValue)>),
    Tag(u64, Box<CborValue>),
    Bool(bool),
    Null,
    Undefined,
    Simple(u8),
    Float(f64),
}

impl CborValue {
    /// Look up a text key in a map
    pub fn get(&self, key: &str) -> Option<&CborValue> {
        match self {
            CborValue::Map(entries) => entries
                .iter()
                .find(|(k, _)| matches!(k, CborValue::Text(t) if t == key))
                .map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CborValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            CborValue::Unsigned(n) => i64::try_from(*n).ok(),
            CborValue::Negative(n) => i64::try_from(*n).ok().map(|n| -1 - n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            CborValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            CborValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[CborValue]> {
        match self {
            CborValue::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn is_map(&self) -> bool {
        matches!(self, CborValue::Map(_))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, CborValue::Null | CborValue::Undefined)
    }

    /// CID carried by a tag-42 link
    pub fn as_cid(&self) -> Option<Cid> {
        match self {
            CborValue::Tag(CID_TAG, inner) => Cid::from_link_bytes(inner.as_bytes()?),
            _ => None,
        }
    }

    /// Convert to JSON using the AT Protocol conventions for links and bytes
    pub fn to_json(&self) -> Value {
        match self {
            CborValue::Unsigned(n) => Value::Number((*n).into()),
            CborValue::Negative(n) => match i64::try_from(*n) {
                Ok(n) => Value::Number((-1 - n).into()),
                Err(_) => float_json(-1.0 - *n as f64),
            },
            CborValue::Bytes(bytes) => {
                let mut map = Map::new();
                map.insert("$bytes".to_string(), Value::String(STANDARD_NO_PAD.encode(bytes)));
                Value::Object(map)
            }
            CborValue::Text(s) => Value::String(s.clone()),
            CborValue::Array(items) => Value::Array(items.iter().map(CborValue::to_json).collect()),
            CborValue::Map(entries) => {
                let mut map = Map::with_capacity(entries.len());
                for (k, v) in entries {
                    let key = match k {
                        CborValue::Text(s) => s.clone(),
                        other => other.to_json().to_string(),
                    };
                    map.insert(key, v.to_json());
                }
                Value::Object(map)
            }
            CborValue::Tag(CID_TAG, inner) => match self.as_cid() {
                Some(cid) => {
                    let mut map = Map::new();
                    map.insert("$link".to_string(), Value::String(cid.to_string()));
                    Value::Object(map)
                }
                None => inner.to_json(),
            },
            CborValue::Tag(_, inner) => inner.to_json(),
            CborValue::Bool(b) => Value::Bool(*b),
            CborValue::Null | CborValue::Undefined => Value::Null,
            CborValue::Simple(n) => Value::Number((*n).into()),
            CborValue::Float(f) => float_json(*f),
        }
    }
}

fn float_json(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

/// Decode the value beginning at `start`, returning it with its end offset
pub fn decode_value(buf: &[u8], start: usize) -> CborResult<(CborValue, usize)> {
    decode_at(buf, start, 0)
}

/// Decode a buffer holding exactly one value
pub fn decode_all(buf: &[u8]) -> CborResult<CborValue> {
    let (value, end) = decode_value(buf, 0)?;
    if end != buf.len() {
        return Err(CborError::UnsupportedType("trailing bytes after value"));
    }
    Ok(value)
}

fn decode_at(buf: &[u8], start: usize, depth: usize) -> CborResult<(CborValue, usize)> {
    if depth > MAX_DEPTH {
        return Err(CborError::DepthExceeded(MAX_DEPTH));
    }
    let head = read_head(buf, start)?;

    match head.major {
        0 => Ok((CborValue::Unsigned(head.value), head.end)),
        1 => Ok((CborValue::Negative(head.value), head.end)),
        2 => {
            let end = payload_end(buf, head.end, head.value)?;
            Ok((CborValue::Bytes(buf[head.end..end].to_vec()), end))
        }
        3 => {
            let end = payload_end(buf, head.end, head.value)?;
            let text = std::str::from_utf8(&buf[head.end..end])
                .map_err(|_| CborError::InvalidUtf8(head.end))?;
            Ok((CborValue::Text(text.to_string()), end))
        }
        4 => {
            check_count(buf, head.end, head.value)?;
            let mut items = Vec::with_capacity(head.value as usize);
            let mut pos = head.end;
            for _ in 0..head.value {
                let (item, next) = decode_at(buf, pos, depth + 1)?;
                items.push(item);
                pos = next;
            }
            Ok((CborValue::Array(items), pos))
        }
        5 => {
            check_count(buf, head.end, head.value.saturating_mul(2))?;
            let mut entries = Vec::with_capacity(head.value as usize);
            let mut pos = head.end;
            for _ in 0..head.value {
                let (key, next) = decode_at(buf, pos, depth + 1)?;
                let (value, next) = decode_at(buf, next, depth + 1)?;
                entries.push((key, value));
                pos = next;
            }
            Ok((CborValue::Map(entries), pos))
        }
        6 => {
            let (inner, end) = decode_at(buf, head.end, depth + 1)?;
            Ok((CborValue::Tag(head.value, Box::new(inner)), end))
        }
        _ => Ok((decode_simple(head), head.end)),
    }
}

fn decode_simple(head: Head) -> CborValue {
    match head.info {
        20 => CborValue::Bool(false),
        21 => CborValue::Bool(true),
        22 => CborValue::Null,
        23 => CborValue::Undefined,
        24 => CborValue::Simple(head.value as u8),
        25 => CborValue::Float(half_to_f64(head.value as u16)),
        26 => CborValue::Float(f64::from(f32::from_bits(head.value as u32))),
        27 => CborValue::Float(f64::from_bits(head.value)),
        n => CborValue::Simple(n),
    }
}

/// IEEE 754 half precision to f64
fn half_to_f64(bits: u16) -> f64 {
    let sign = if bits & 0x8000 != 0 { -1.0 } else { 1.0 };
    let exponent = i32::from((bits >> 10) & 0x1f);
    let mantissa = f64::from(bits & 0x3ff);

    let magnitude = match exponent {
        0 => mantissa * 2f64.powi(-24),
        31 if mantissa == 0.0 => f64::INFINITY,
        31 => f64::NAN,
        _ => (1.0 + mantissa / 1024.0) * 2f64.powi(exponent - 15),
    };
    sign * magnitude
}
