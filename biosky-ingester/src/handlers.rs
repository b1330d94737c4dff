//! Typed handler registry
//!
//! One ordered list of handlers per record kind. Dispatch runs every handler for
//! the event's kind in registration order; a handler that returns an error or
//! panics is logged and skipped without affecting the others.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use biosky_common::events::{DomainEvent, RecordKind};
use tracing::{error, warn};

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;
pub type HandlerResult = std::result::Result<(), HandlerError>;

/// Callback invoked with each event of one kind
pub type EventHandler = Arc<dyn Fn(&DomainEvent) -> HandlerResult + Send + Sync>;

/// Wrap a closure as an [`EventHandler`]
pub fn handler<F>(f: F) -> EventHandler
where
    F: Fn(&DomainEvent) -> HandlerResult + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Outcome of dispatching one event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub invoked: usize,
    pub failed: usize,
}

#[derive(Clone, Default)]
pub struct HandlerRegistry {
    occurrence: Vec<EventHandler>,
    identification: Vec<EventHandler>,
    comment: Vec<EventHandler>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("occurrence", &self.occurrence.len())
            .field("identification", &self.identification.len())
            .field("comment", &self.comment.len())
            .finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: RecordKind, handler: EventHandler) -> &mut Self {
        self.slot_mut(kind).push(handler);
        self
    }

    pub fn on_occurrence<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&DomainEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.register(RecordKind::Occurrence, handler(f))
    }

    pub fn on_identification<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&DomainEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.register(RecordKind::Identification, handler(f))
    }

    pub fn on_comment<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&DomainEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.register(RecordKind::Comment, handler(f))
    }

    pub fn handlers_for(&self, kind: RecordKind) -> &[EventHandler] {
        match kind {
            RecordKind::Occurrence => &self.occurrence,
            RecordKind::Identification => &self.identification,
            RecordKind::Comment => &self.comment,
        }
    }

    pub fn is_empty(&self) -> bool {
        RecordKind::ALL.iter().all(|k| self.handlers_for(*k).is_empty())
    }

    /// Append every handler of `other` after this registry's own
    pub fn extend(&mut self, other: HandlerRegistry) {
        self.occurrence.extend(other.occurrence);
        self.identification.extend(other.identification);
        self.comment.extend(other.comment);
    }

    /// Run the handlers for `event.kind` in registration order
    pub fn dispatch(&self, event: &DomainEvent) -> DispatchReport {
        let mut report = DispatchReport::default();

        for (index, handler) in self.handlers_for(event.kind).iter().enumerate() {
            report.invoked += 1;
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    report.failed += 1;
                    warn!(
                        kind = %event.kind,
                        handler = index,
                        uri = %event.uri,
                        did = %event.did,
                        seq = event.seq,
                        error = %e,
                        "Event handler failed"
                    );
                }
                Err(panic) => {
                    report.failed += 1;
                    error!(
                        kind = %event.kind,
                        handler = index,
                        uri = %event.uri,
                        did = %event.did,
                        seq = event.seq,
                        panic = panic_message(panic.as_ref()),
                        "Event handler panicked"
                    );
                }
            }
        }

        report
    }

    fn slot_mut(&mut self, kind: RecordKind) -> &mut Vec<EventHandler> {
        match kind {
            RecordKind::Occurrence => &mut self.occurrence,
            RecordKind::Identification => &mut self.identification,
            RecordKind::Comment => &mut self.comment,
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

/// Construction-time handler set, one optional handler per kind.
///
/// `on_observation` is the pre-rename name for `on_occurrence`. Both fill the
/// occurrence slot; when both are supplied only `on_occurrence` is registered
/// and `on_observation` is dropped with a warning.
#[derive(Clone, Default)]
pub struct SubscriptionHandlers {
    pub on_occurrence: Option<EventHandler>,
    #[deprecated(note = "use on_occurrence")]
    pub on_observation: Option<EventHandler>,
    pub on_identification: Option<EventHandler>,
    pub on_comment: Option<EventHandler>,
}

impl From<SubscriptionHandlers> for HandlerRegistry {
    #[allow(deprecated)]
    fn from(handlers: SubscriptionHandlers) -> Self {
        let mut registry = HandlerRegistry::new();

        let occurrence = match (handlers.on_occurrence, handlers.on_observation) {
            (Some(current), Some(_)) => {
                warn!("Both on_occurrence and on_observation supplied; on_observation is ignored");
                Some(current)
            }
            (current, legacy) => current.or(legacy),
        };

        if let Some(h) = occurrence {
            registry.register(RecordKind::Occurrence, h);
        }
        if let Some(h) = handlers.on_identification {
            registry.register(RecordKind::Identification, h);
        }
        if let Some(h) = handlers.on_comment {
            registry.register(RecordKind::Comment, h);
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use biosky_common::events::RecordAction;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn event(kind: RecordKind) -> DomainEvent {
        DomainEvent {
            kind,
            action: RecordAction::Create,
            did: "did:plc:test".to_string(),
            uri: "at://did:plc:test/org.rwell.test.occurrence/1".to_string(),
            cid: None,
            record: None,
            seq: 1,
            time: "2024-01-15T10:00:00Z".to_string(),
        }
    }

    fn counter() -> (Arc<AtomicUsize>, EventHandler) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let h = handler(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        (count, h)
    }

    #[test]
    fn test_dispatch_in_registration_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HandlerRegistry::new();
        for i in 0..3 {
            let order = order.clone();
            registry.on_identification(move |_| {
                order.lock().unwrap().push(i);
                Ok(())
            });
        }

        let report = registry.dispatch(&event(RecordKind::Identification));
        assert_eq!(report, DispatchReport { invoked: 3, failed: 0 });
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_dispatch_only_matching_kind() {
        let (count, h) = counter();
        let mut registry = HandlerRegistry::new();
        registry.register(RecordKind::Comment, h);

        registry.dispatch(&event(RecordKind::Occurrence));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        registry.dispatch(&event(RecordKind::Comment));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failing_and_panicking_handlers_are_isolated() {
        let (count, h) = counter();
        let mut registry = HandlerRegistry::new();
        registry.on_occurrence(|_| Err("storage unavailable".into()));
        registry.on_occurrence(|_| panic!("handler bug"));
        registry.register(RecordKind::Occurrence, h);

        let report = registry.dispatch(&event(RecordKind::Occurrence));
        assert_eq!(report, DispatchReport { invoked: 3, failed: 2 });
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    #[allow(deprecated)]
    fn test_legacy_observation_handler_fills_occurrence_slot() {
        let (legacy_count, legacy) = counter();
        let registry: HandlerRegistry = SubscriptionHandlers {
            on_observation: Some(legacy),
            ..Default::default()
        }
        .into();

        registry.dispatch(&event(RecordKind::Occurrence));
        assert_eq!(legacy_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    #[allow(deprecated)]
    fn test_new_name_wins_over_legacy_alias() {
        let (current_count, current) = counter();
        let (legacy_count, legacy) = counter();
        let registry: HandlerRegistry = SubscriptionHandlers {
            on_occurrence: Some(current),
            on_observation: Some(legacy),
            ..Default::default()
        }
        .into();

        assert_eq!(registry.handlers_for(RecordKind::Occurrence).len(), 1);
        registry.dispatch(&event(RecordKind::Occurrence));
        assert_eq!(current_count.load(Ordering::SeqCst), 1);
        assert_eq!(legacy_count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_empty_registry() {
        let registry = HandlerRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.dispatch(&event(RecordKind::Comment)).invoked, 0);
    }
}
