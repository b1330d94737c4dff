//! Event classification
//!
//! Maps a decoded frame onto BioSky domain events. Only `#commit` messages
//! produce events; every op in a commit whose collection is one of ours
//! becomes one [`DomainEvent`]. Anything unrecognised is dropped quietly.

use biosky_common::config::CollectionsConfig;
use biosky_common::events::{DomainEvent, RecordAction, RecordKind};
use serde::Serialize;
use tracing::debug;

use crate::car::CarBlocks;
use crate::cbor::CborValue;
use crate::frame::{Frame, FrameOp};

pub const OCCURRENCE_COLLECTION: &str = "org.rwell.test.occurrence";
/// Pre-rename occurrence collection, still accepted
pub const LEGACY_OBSERVATION_COLLECTION: &str = "org.rwell.test.observation";
pub const IDENTIFICATION_COLLECTION: &str = "org.rwell.test.identification";
pub const COMMENT_COLLECTION: &str = "org.rwell.test.comment";

/// Collection NSIDs mapped to each record kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionMap {
    occurrence: Vec<String>,
    identification: Vec<String>,
    comment: Vec<String>,
}

impl Default for CollectionMap {
    fn default() -> Self {
        Self {
            occurrence: vec![
                OCCURRENCE_COLLECTION.to_string(),
                LEGACY_OBSERVATION_COLLECTION.to_string(),
            ],
            identification: vec![IDENTIFICATION_COLLECTION.to_string()],
            comment: vec![COMMENT_COLLECTION.to_string()],
        }
    }
}

impl CollectionMap {
    /// Defaults, with any kind named in `config` replaced
    pub fn from_config(config: &CollectionsConfig) -> Self {
        let mut map = Self::default();
        if let Some(list) = &config.occurrence {
            map.occurrence = list.clone();
        }
        if let Some(list) = &config.identification {
            map.identification = list.clone();
        }
        if let Some(list) = &config.comment {
            map.comment = list.clone();
        }
        map
    }

    pub fn kind_for(&self, collection: &str) -> Option<RecordKind> {
        let matches = |list: &[String]| list.iter().any(|c| c == collection);
        if matches(&self.occurrence) {
            Some(RecordKind::Occurrence)
        } else if matches(&self.identification) {
            Some(RecordKind::Identification)
        } else if matches(&self.comment) {
            Some(RecordKind::Comment)
        } else {
            None
        }
    }

    pub fn collections(&self, kind: RecordKind) -> &[String] {
        match kind {
            RecordKind::Occurrence => &self.occurrence,
            RecordKind::Identification => &self.identification,
            RecordKind::Comment => &self.comment,
        }
    }
}

/// Position of a commit in the relay stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitInfo {
    pub seq: i64,
    pub time: String,
    pub did: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    /// A commit, with events for the ops in our collections (possibly none)
    Commit {
        commit: CommitInfo,
        events: Vec<DomainEvent>,
    },
    /// `#info` message from the relay
    Info {
        name: String,
        message: Option<String>,
    },
    /// Error frame (`op = -1`)
    RelayError {
        error: String,
        message: Option<String>,
    },
    /// Any other message type, or a commit body missing required fields
    Ignored {
        t: Option<String>,
        seq: Option<i64>,
    },
}

pub fn classify(frame: &Frame, collections: &CollectionMap) -> Classified {
    let body = &frame.body;
    let text = |field: &str| body.get(field).and_then(CborValue::as_str).map(str::to_string);

    if frame.header.op == FrameOp::Error {
        return Classified::RelayError {
            error: text("error").unwrap_or_else(|| "unknown".to_string()),
            message: text("message"),
        };
    }

    match frame.header.t.as_deref() {
        Some("#commit") => classify_commit(body, collections).unwrap_or(Classified::Ignored {
            t: frame.header.t.clone(),
            seq: body.get("seq").and_then(CborValue::as_i64),
        }),
        Some("#info") => Classified::Info {
            name: text("name").unwrap_or_default(),
            message: text("message"),
        },
        _ => Classified::Ignored {
            t: frame.header.t.clone(),
            seq: body.get("seq").and_then(CborValue::as_i64),
        },
    }
}

fn classify_commit(body: &CborValue, collections: &CollectionMap) -> Option<Classified> {
    let seq = body.get("seq").and_then(CborValue::as_i64)?;
    let did = body
        .get("repo")
        .or_else(|| body.get("did"))
        .and_then(CborValue::as_str)?
        .to_string();
    let time = body
        .get("time")
        .and_then(CborValue::as_str)
        .unwrap_or_default()
        .to_string();
    let ops = body.get("ops").and_then(CborValue::as_array).unwrap_or(&[]);

    let commit = CommitInfo { seq, time, did };
    let mut blocks: Option<CarBlocks<'_>> = None;
    let mut blocks_parsed = false;
    let mut events = Vec::new();

    for op in ops {
        let Some(path) = op.get("path").and_then(CborValue::as_str) else {
            continue;
        };
        let Some(collection) = path.split('/').next() else {
            continue;
        };
        let Some(kind) = collections.kind_for(collection) else {
            continue;
        };
        let Some(action) = op
            .get("action")
            .and_then(CborValue::as_str)
            .and_then(|a| a.parse::<RecordAction>().ok())
        else {
            continue;
        };

        let uri = DomainEvent::record_uri(&commit.did, path);
        let mut event = DomainEvent {
            kind,
            action,
            did: commit.did.clone(),
            uri,
            cid: None,
            record: None,
            seq,
            time: commit.time.clone(),
        };

        if action.carries_record() {
            let cid = op.get("cid").and_then(CborValue::as_cid);
            event.cid = cid.as_ref().map(|c| c.to_string());

            let record = match op.get("record").filter(|r| r.is_map()) {
                Some(inline) => Some(inline.to_json()),
                None => {
                    if !blocks_parsed {
                        blocks_parsed = true;
                        blocks = parse_blocks(body, seq);
                    }
                    cid.as_ref()
                        .zip(blocks.as_ref())
                        .and_then(|(cid, blocks)| blocks.decode(cid))
                        .and_then(|decoded| decoded.ok())
                        .map(|value| value.to_json())
                }
            };

            match record {
                Some(record) => event.record = Some(record),
                None => {
                    debug!(seq, uri = %event.uri, "Record block missing, dropping op");
                    continue;
                }
            }
        }

        events.push(event);
    }

    Some(Classified::Commit { commit, events })
}

fn parse_blocks(body: &CborValue, seq: i64) -> Option<CarBlocks<'_>> {
    let data = body.get("blocks").and_then(CborValue::as_bytes)?;
    match CarBlocks::parse(data) {
        Ok(blocks) => Some(blocks),
        Err(e) => {
            debug!(seq, error = %e, "Unreadable commit blocks");
            None
        }
    }
}
