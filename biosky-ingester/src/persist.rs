//! Persistence worker
//!
//! Subscription handlers only enqueue events; a separate task drains the queue
//! into SQLite so storage latency never stalls the firehose read loop. The same
//! task checkpoints the cursor, and only ever saves a sequence number whose
//! events are all stored.

use std::time::Duration;

use biosky_common::db::Database;
use biosky_common::events::{DomainEvent, RecordKind};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::handlers::{handler, HandlerRegistry};
use crate::stats::SharedStats;

pub const CHECKPOINT_INTERVAL: Duration = Duration::from_secs(5);

pub type EventSender = mpsc::UnboundedSender<DomainEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<DomainEvent>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Handlers for every record kind that forward events onto `tx`
pub fn queue_handlers(tx: EventSender) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    for kind in RecordKind::ALL {
        let tx = tx.clone();
        registry.register(
            kind,
            handler(move |event| {
                tx.send(event.clone())
                    .map_err(|_| "persistence queue closed".into())
            }),
        );
    }
    registry
}

/// Tracks the highest sequence number that is safe to resume after.
///
/// One commit may queue several events under the same `seq`, so a sequence
/// number only becomes durable once an event with a later one arrives, or the
/// queue closes. After a failed write nothing later is ever durable.
#[derive(Debug, Default)]
pub struct StoredCursor {
    pending: Option<i64>,
    durable: Option<i64>,
    failed: bool,
}

impl StoredCursor {
    /// Call before storing an event with `seq`
    pub fn begin(&mut self, seq: i64) {
        match self.pending {
            Some(pending) if seq > pending => {
                if !self.failed {
                    self.durable = Some(pending);
                }
                self.pending = Some(seq);
            }
            Some(_) => {}
            None => self.pending = Some(seq),
        }
    }

    /// The event passed to the last `begin` could not be stored
    pub fn fail(&mut self) {
        self.failed = true;
    }

    /// No more events will arrive
    pub fn finish(&mut self) {
        if !self.failed {
            if let Some(pending) = self.pending {
                self.durable = Some(pending);
            }
        }
    }

    pub fn durable(&self) -> Option<i64> {
        self.durable
    }
}

/// Drain `rx` into the database until every sender is dropped, saving the
/// stored cursor every `interval` and once more at the end
pub async fn run_persistence(
    db: Database,
    mut rx: EventReceiver,
    stats: SharedStats,
    interval: Duration,
) {
    info!("Persistence worker started");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut progress = StoredCursor::default();
    let mut saved: Option<i64> = None;

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                progress.begin(event.seq);
                if !store(&db, &event, &stats).await {
                    progress.fail();
                }
            }
            _ = ticker.tick() => {
                saved = checkpoint(&db, progress.durable(), saved).await;
            }
        }
    }

    progress.finish();
    checkpoint(&db, progress.durable(), saved).await;
    info!("Persistence worker stopped");
}

async fn store(db: &Database, event: &DomainEvent, stats: &SharedStats) -> bool {
    match db.apply_event(event).await {
        Ok(true) => {
            debug!(uri = %event.uri, event = %event.event_type(), "Persisted");
            stats.write().await.record_event(event);
            true
        }
        Ok(false) => {
            debug!(
                uri = %event.uri,
                event = %event.event_type(),
                "Skipping record without required fields"
            );
            true
        }
        Err(e) => {
            error!(uri = %event.uri, seq = event.seq, error = %e, "Failed to persist event");
            stats.write().await.record_error();
            false
        }
    }
}

async fn checkpoint(db: &Database, cursor: Option<i64>, saved: Option<i64>) -> Option<i64> {
    let Some(cursor) = cursor else {
        return saved;
    };
    if saved == Some(cursor) {
        return saved;
    }

    match db.save_cursor(cursor).await {
        Ok(()) => {
            debug!(cursor, "Cursor checkpointed");
            Some(cursor)
        }
        Err(e) => {
            warn!(cursor, error = %e, "Failed to checkpoint cursor");
            saved
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use biosky_common::events::RecordAction;

    #[tokio::test]
    async fn test_queue_handlers_forward_every_kind() {
        let (tx, mut rx) = event_channel();
        let registry = queue_handlers(tx);

        for kind in RecordKind::ALL {
            let event = DomainEvent {
                kind,
                action: RecordAction::Delete,
                did: "did:plc:test".to_string(),
                uri: format!("at://did:plc:test/{}/1", kind),
                cid: None,
                record: None,
                seq: 3,
                time: String::new(),
            };
            assert_eq!(registry.dispatch(&event).failed, 0);
        }

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(event.kind);
        }
        assert_eq!(kinds, RecordKind::ALL.to_vec());
    }

    #[tokio::test]
    async fn test_closed_queue_reports_handler_failure() {
        let (tx, rx) = event_channel();
        let registry = queue_handlers(tx);
        drop(rx);

        let event = DomainEvent {
            kind: RecordKind::Comment,
            action: RecordAction::Delete,
            did: "did:plc:test".to_string(),
            uri: "at://did:plc:test/org.rwell.test.comment/1".to_string(),
            cid: None,
            record: None,
            seq: 1,
            time: String::new(),
        };
        assert_eq!(registry.dispatch(&event).failed, 1);
    }

    #[test]
    fn test_stored_cursor_waits_for_later_seq() {
        let mut progress = StoredCursor::default();
        progress.begin(10);
        progress.begin(10);
        assert_eq!(progress.durable(), None);

        progress.begin(11);
        assert_eq!(progress.durable(), Some(10));

        progress.finish();
        assert_eq!(progress.durable(), Some(11));
    }

    #[test]
    fn test_stored_cursor_stops_at_failed_write() {
        let mut progress = StoredCursor::default();
        progress.begin(10);
        progress.begin(11);
        progress.fail();
        progress.begin(12);
        progress.begin(13);
        progress.finish();
        assert_eq!(progress.durable(), Some(10));
    }

    #[test]
    fn test_stored_cursor_failure_within_one_commit() {
        let mut progress = StoredCursor::default();
        progress.begin(5);
        progress.begin(5);
        progress.fail();
        progress.begin(6);
        progress.finish();
        assert_eq!(progress.durable(), None);
    }
}
