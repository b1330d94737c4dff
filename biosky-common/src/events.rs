//! Domain event types produced by the firehose ingester
//!
//! One `DomainEvent` is produced for every recognised record operation inside a
//! relay commit. Events are handed to registered handlers exactly once and are
//! never persisted by the ingester core itself.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which kind of BioSky record an event describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    /// A biodiversity occurrence (formerly "observation")
    Occurrence,
    /// A taxonomic identification attached to an occurrence
    Identification,
    /// A free-text comment attached to an occurrence
    Comment,
}

impl RecordKind {
    pub const ALL: [RecordKind; 3] = [
        RecordKind::Occurrence,
        RecordKind::Identification,
        RecordKind::Comment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Occurrence => "occurrence",
            RecordKind::Identification => "identification",
            RecordKind::Comment => "comment",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Repository operation carried by a commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordAction {
    Create,
    Update,
    Delete,
}

impl RecordAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordAction::Create => "create",
            RecordAction::Update => "update",
            RecordAction::Delete => "delete",
        }
    }

    /// Whether events with this action carry a record payload
    pub fn carries_record(&self) -> bool {
        !matches!(self, RecordAction::Delete)
    }
}

impl fmt::Display for RecordAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordAction {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(RecordAction::Create),
            "update" => Ok(RecordAction::Update),
            "delete" => Ok(RecordAction::Delete),
            other => Err(crate::Error::InvalidInput(format!("unknown action: {}", other))),
        }
    }
}

/// A classified record operation from the firehose
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub kind: RecordKind,
    pub action: RecordAction,
    /// Actor that authored the commit
    pub did: String,
    /// `at://<did>/<collection>/<rkey>`
    pub uri: String,
    /// Content identifier of the record version (absent for deletes)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
    /// Decoded record payload (present for create/update only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<serde_json::Value>,
    /// Relay sequence number of the originating commit
    pub seq: i64,
    /// Commit timestamp as sent by the relay
    pub time: String,
}

impl DomainEvent {
    /// Build the AT URI for a record path within an actor's repository
    pub fn record_uri(did: &str, path: &str) -> String {
        format!("at://{}/{}", did, path)
    }

    /// Short label used in logs and stats, e.g. `identification.create`
    pub fn event_type(&self) -> String {
        format!("{}.{}", self.kind, self.action)
    }

    /// Record key (last path segment of the URI)
    pub fn rkey(&self) -> Option<&str> {
        self.uri.rsplit('/').next().filter(|s| !s.is_empty())
    }

    /// Read a string field from the record payload
    pub fn record_str(&self, field: &str) -> Option<&str> {
        self.record.as_ref()?.get(field)?.as_str()
    }
}
