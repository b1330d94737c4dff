//! CAR v1 block reader
//!
//! A commit's `blocks` field is a CAR archive: a varint-framed DAG-CBOR header
//! followed by varint-framed sections, each a binary CID and the block bytes.

use std::collections::HashMap;

use crate::cbor::{decode_all, CborError, CborResult, CborValue};
use crate::cid::Cid;

/// Blocks of one CAR archive, borrowed from the frame buffer
#[derive(Debug, Default)]
pub struct CarBlocks<'a> {
    roots: Vec<Cid>,
    blocks: HashMap<Cid, &'a [u8]>,
}

impl<'a> CarBlocks<'a> {
    pub fn parse(data: &'a [u8]) -> CborResult<Self> {
        let (header_len, pos) = Cid::read_varint(data, 0)?;
        let header_end = section_end(data, pos, header_len)?;
        let header = decode_all(&data[pos..header_end])?;

        if header.get("version").and_then(CborValue::as_i64) != Some(1) {
            return Err(CborError::UnsupportedType("CAR version"));
        }
        let roots = header
            .get("roots")
            .and_then(CborValue::as_array)
            .map(|items| items.iter().filter_map(CborValue::as_cid).collect())
            .unwrap_or_default();

        let mut blocks = HashMap::new();
        let mut pos = header_end;
        while pos < data.len() {
            let (section_len, start) = Cid::read_varint(data, pos)?;
            let end = section_end(data, start, section_len)?;
            let (cid, block_start) = Cid::read(&data[..end], start)?;
            blocks.insert(cid, &data[block_start..end]);
            pos = end;
        }

        Ok(Self { roots, blocks })
    }

    pub fn roots(&self) -> &[Cid] {
        &self.roots
    }

    pub fn get(&self, cid: &Cid) -> Option<&'a [u8]> {
        self.blocks.get(cid).copied()
    }

    /// Decode the DAG-CBOR block for `cid`
    pub fn decode(&self, cid: &Cid) -> Option<CborResult<CborValue>> {
        self.get(cid).map(decode_all)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

fn section_end(data: &[u8], start: usize, len: u64) -> CborResult<usize> {
    let remaining = (data.len() - start) as u64;
    if len > remaining {
        return Err(CborError::Truncated {
            offset: start,
            needed: len,
            len: data.len(),
        });
    }
    Ok(start + len as usize)
}
