//! Relay frame builders for integration tests
//!
//! A minimal DAG-CBOR writer, enough to assemble `#commit`, `#info` and
//! `#identity` frames with CAR-encoded record blocks.

#![allow(dead_code)]

pub const DID: &str = "did:plc:alice";

fn head(major: u8, n: u64) -> Vec<u8> {
    let m = major << 5;
    match n {
        0..=23 => vec![m | n as u8],
        24..=0xff => vec![m | 24, n as u8],
        0x100..=0xffff => {
            let mut out = vec![m | 25];
            out.extend((n as u16).to_be_bytes());
            out
        }
        0x1_0000..=0xffff_ffff => {
            let mut out = vec![m | 26];
            out.extend((n as u32).to_be_bytes());
            out
        }
        _ => {
            let mut out = vec![m | 27];
            out.extend(n.to_be_bytes());
            out
        }
    }
}

pub fn uint(n: u64) -> Vec<u8> {
    head(0, n)
}

pub fn int(n: i64) -> Vec<u8> {
    if n >= 0 {
        head(0, n as u64)
    } else {
        head(1, (-1 - n) as u64)
    }
}

pub fn bytes(b: &[u8]) -> Vec<u8> {
    let mut out = head(2, b.len() as u64);
    out.extend(b);
    out
}

pub fn text(s: &str) -> Vec<u8> {
    let mut out = head(3, s.len() as u64);
    out.extend(s.as_bytes());
    out
}

pub fn array(items: Vec<Vec<u8>>) -> Vec<u8> {
    let mut out = head(4, items.len() as u64);
    for item in items {
        out.extend(item);
    }
    out
}

pub fn map(entries: Vec<(&str, Vec<u8>)>) -> Vec<u8> {
    let mut out = head(5, entries.len() as u64);
    for (key, value) in entries {
        out.extend(text(key));
        out.extend(value);
    }
    out
}

pub fn boolean(b: bool) -> Vec<u8> {
    vec![if b { 0xf5 } else { 0xf4 }]
}

pub fn null() -> Vec<u8> {
    vec![0xf6]
}

/// Tag 42 link to a binary CID
pub fn link(cid: &[u8]) -> Vec<u8> {
    let mut payload = vec![0x00];
    payload.extend(cid);
    let mut out = head(6, 42);
    out.extend(bytes(&payload));
    out
}

/// CIDv1, dag-cbor codec, sha2-256 digest filled with `fill`
pub fn cid(fill: u8) -> Vec<u8> {
    let mut out = vec![0x01, 0x71, 0x12, 0x20];
    out.extend([fill; 32]);
    out
}

fn varint(mut n: u64) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let byte = (n & 0x7f) as u8;
        n >>= 7;
        if n == 0 {
            out.push(byte);
            return out;
        }
        out.push(byte | 0x80);
    }
}

/// CAR v1 archive holding `blocks`, rooted at the first one
pub fn car(blocks: &[(Vec<u8>, Vec<u8>)]) -> Vec<u8> {
    let roots = blocks.iter().take(1).map(|(c, _)| link(c)).collect();
    let header = map(vec![("roots", array(roots)), ("version", uint(1))]);

    let mut out = varint(header.len() as u64);
    out.extend(header);
    for (cid, block) in blocks {
        out.extend(varint((cid.len() + block.len()) as u64));
        out.extend(cid);
        out.extend(block);
    }
    out
}

/// One repo op; `cid` is `None` for deletes
pub fn op(action: &str, path: &str, cid: Option<&[u8]>) -> Vec<u8> {
    map(vec![
        ("action", text(action)),
        ("cid", cid.map(link).unwrap_or_else(null)),
        ("path", text(path)),
    ])
}

pub fn occurrence_record(name: &str) -> Vec<u8> {
    map(vec![
        ("$type", text("org.rwell.test.occurrence")),
        ("scientificName", text(name)),
        ("eventDate", text("2024-01-15T10:00:00Z")),
        ("createdAt", text("2024-01-15T10:05:00Z")),
    ])
}

pub fn identification_record(subject: &str, name: &str, rank: &str) -> Vec<u8> {
    map(vec![
        ("$type", text("org.rwell.test.identification")),
        ("subject", map(vec![("uri", text(subject))])),
        ("taxonName", text(name)),
        ("taxonRank", text(rank)),
        ("isAgreement", boolean(false)),
        ("createdAt", text("2024-01-16T08:00:00Z")),
    ])
}

pub fn frame(t: &str, body: Vec<u8>) -> Vec<u8> {
    let mut out = map(vec![("op", int(1)), ("t", text(t))]);
    out.extend(body);
    out
}

pub fn commit_frame(seq: i64, ops: Vec<Vec<u8>>, blocks: &[(Vec<u8>, Vec<u8>)]) -> Vec<u8> {
    frame(
        "#commit",
        map(vec![
            ("seq", int(seq)),
            ("repo", text(DID)),
            ("time", text("2024-01-15T10:05:01.000Z")),
            ("ops", array(ops)),
            ("blocks", bytes(&car(blocks))),
        ]),
    )
}

/// Commit with a single create op whose record travels in the CAR blocks
pub fn create_commit(seq: i64, path: &str, record: Vec<u8>, fill: u8) -> Vec<u8> {
    let c = cid(fill);
    commit_frame(seq, vec![op("create", path, Some(&c))], &[(c, record)])
}

pub fn delete_commit(seq: i64, path: &str) -> Vec<u8> {
    commit_frame(seq, vec![op("delete", path, None)], &[])
}

pub fn info_frame(name: &str, message: &str) -> Vec<u8> {
    frame(
        "#info",
        map(vec![("name", text(name)), ("message", text(message))]),
    )
}

pub fn identity_frame(seq: i64) -> Vec<u8> {
    frame(
        "#identity",
        map(vec![("seq", int(seq)), ("did", text(DID))]),
    )
}

pub fn error_frame(error: &str) -> Vec<u8> {
    let mut out = map(vec![("op", int(-1))]);
    out.extend(map(vec![("error", text(error))]));
    out
}

pub fn at_uri(path: &str) -> String {
    format!("at://{}/{}", DID, path)
}
