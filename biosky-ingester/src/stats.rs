//! Ingestion statistics shown by the HTTP server

use std::collections::VecDeque;
use std::sync::Arc;

use biosky_common::events::{DomainEvent, RecordAction, RecordKind};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

pub const MAX_RECENT_EVENTS: usize = 10;

/// Records persisted per kind, plus failures
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngesterStats {
    pub occurrences: u64,
    pub identifications: u64,
    pub comments: u64,
    pub errors: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecentEvent {
    #[serde(rename = "type")]
    pub kind: RecordKind,
    pub action: RecordAction,
    pub uri: String,
    pub did: String,
    pub seq: i64,
    pub time: String,
}

impl From<&DomainEvent> for RecentEvent {
    fn from(event: &DomainEvent) -> Self {
        Self {
            kind: event.kind,
            action: event.action,
            uri: event.uri.clone(),
            did: event.did.clone(),
            seq: event.seq,
            time: event.time.clone(),
        }
    }
}

#[derive(Debug)]
pub struct StatsState {
    pub started_at: DateTime<Utc>,
    pub stats: IngesterStats,
    recent_events: VecDeque<RecentEvent>,
}

impl Default for StatsState {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsState {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            stats: IngesterStats::default(),
            recent_events: VecDeque::with_capacity(MAX_RECENT_EVENTS),
        }
    }

    /// Count a persisted event and remember it as most recent
    pub fn record_event(&mut self, event: &DomainEvent) {
        match event.kind {
            RecordKind::Occurrence => self.stats.occurrences += 1,
            RecordKind::Identification => self.stats.identifications += 1,
            RecordKind::Comment => self.stats.comments += 1,
        }
        self.recent_events.push_front(RecentEvent::from(event));
        self.recent_events.truncate(MAX_RECENT_EVENTS);
    }

    pub fn record_error(&mut self) {
        self.stats.errors += 1;
    }

    /// Newest first
    pub fn recent_events(&self) -> Vec<RecentEvent> {
        self.recent_events.iter().cloned().collect()
    }

    pub fn uptime_secs(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds().max(0)
    }
}

pub type SharedStats = Arc<RwLock<StatsState>>;

pub fn shared_stats() -> SharedStats {
    Arc::new(RwLock::new(StatsState::new()))
}
