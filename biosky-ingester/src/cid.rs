//! Content identifiers (CIDs) as they appear in CAR archives and CBOR links

use std::fmt;

use data_encoding::BASE32_NOPAD;

use crate::cbor::{CborError, CborResult};

/// Binary CID (v0 multihash or v1 version/codec/multihash)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cid {
    bytes: Vec<u8>,
}

impl Cid {
    /// Read an unsigned LEB128 varint, returning the value and the offset after it
    pub fn read_varint(buf: &[u8], start: usize) -> CborResult<(u64, usize)> {
        let mut value = 0u64;
        let mut pos = start;
        for shift in (0..64).step_by(7) {
            let byte = *buf.get(pos).ok_or(CborError::Truncated {
                offset: pos,
                needed: 1,
                len: buf.len(),
            })?;
            value |= u64::from(byte & 0x7f) << shift;
            pos += 1;
            if byte & 0x80 == 0 {
                return Ok((value, pos));
            }
        }
        Err(CborError::UnsupportedType("varint longer than 64 bits"))
    }

    /// Parse a binary CID at `start`, returning it and the offset after it
    pub fn read(buf: &[u8], start: usize) -> CborResult<(Cid, usize)> {
        // CIDv0 is a bare sha2-256 multihash
        if buf.get(start) == Some(&0x12) && buf.get(start + 1) == Some(&0x20) {
            let end = start + 34;
            if end > buf.len() {
                return Err(CborError::Truncated {
                    offset: start,
                    needed: 34,
                    len: buf.len(),
                });
            }
            return Ok((Cid { bytes: buf[start..end].to_vec() }, end));
        }

        let (version, pos) = Self::read_varint(buf, start)?;
        if version != 1 {
            return Err(CborError::UnsupportedType("CID version"));
        }
        let (_codec, pos) = Self::read_varint(buf, pos)?;
        let (_hash_code, pos) = Self::read_varint(buf, pos)?;
        let (digest_len, pos) = Self::read_varint(buf, pos)?;

        let remaining = (buf.len() - pos) as u64;
        if digest_len > remaining {
            return Err(CborError::Truncated {
                offset: pos,
                needed: digest_len,
                len: buf.len(),
            });
        }
        let end = pos + digest_len as usize;
        Ok((Cid { bytes: buf[start..end].to_vec() }, end))
    }

    /// Parse the byte string of a DAG-CBOR tag-42 link (leading 0x00 multibase prefix)
    pub fn from_link_bytes(bytes: &[u8]) -> Option<Cid> {
        let rest = bytes.strip_prefix(&[0x00])?;
        let (cid, end) = Cid::read(rest, 0).ok()?;
        (end == rest.len()).then_some(cid)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn is_v0(&self) -> bool {
        self.bytes.len() == 34 && self.bytes[0] == 0x12 && self.bytes[1] == 0x20
    }
}

/// v1 renders as base32 multibase (`b...`), v0 as base58btc (`Qm...`)
impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_v0() {
            f.write_str(&base58btc(&self.bytes))
        } else {
            write!(f, "b{}", base32_lower(&self.bytes))
        }
    }
}

/// RFC 4648 base32, lowercase, unpadded
fn base32_lower(bytes: &[u8]) -> String {
    BASE32_NOPAD.encode(bytes).to_ascii_lowercase()
}

fn base58btc(bytes: &[u8]) -> String {
    bs58::encode(bytes).into_string()
}
