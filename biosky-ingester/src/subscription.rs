//! Firehose subscription
//!
//! Holds one WebSocket connection to a relay's `subscribeRepos` stream and
//! feeds each binary message through frame decoding, classification and handler
//! dispatch, strictly in arrival order.
//!
//! State machine: `Disconnected -> Connecting -> Connected`, and on transport
//! loss `Connected -> Reconnecting -> Connecting` with exponential backoff and no
//! retry limit. `Stopped` is reached only through [`FirehoseSubscription::stop`].
//!
//! The tracked cursor only moves forward. Reconnects resume from it, so commits
//! are not skipped unless the relay has already pruned them (reported via an
//! `OutdatedCursor` info message).

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use biosky_common::events::RecordKind;
use futures::StreamExt;
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::{self, Backoff};
use crate::classifier::{classify, Classified, CollectionMap, CommitInfo};
use crate::error::{IngesterError, Result};
use crate::frame::decode_frame;
use crate::handlers::{EventHandler, HandlerRegistry};

pub const DEFAULT_RELAY: &str = "wss://bsky.network";
pub const SUBSCRIBE_PATH: &str = "/xrpc/com.atproto.sync.subscribeRepos";
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

const NO_CURSOR: i64 = -1;

type RelayStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct FirehoseOptions {
    /// Relay base URL, e.g. `wss://bsky.network`
    pub relay: String,
    /// Sequence number to resume after; `None` starts from the live tip
    pub cursor: Option<i64>,
    pub collections: CollectionMap,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    pub connect_timeout: Duration,
}

impl Default for FirehoseOptions {
    fn default() -> Self {
        Self {
            relay: DEFAULT_RELAY.to_string(),
            cursor: None,
            collections: CollectionMap::default(),
            backoff_initial: backoff::DEFAULT_INITIAL,
            backoff_max: backoff::DEFAULT_MAX,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Stopped,
}

/// What happened to one inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Undecodable; dropped
    Dropped,
    /// Commit processed; `events` were dispatched
    Commit { seq: i64, events: usize },
    Info,
    RelayError,
    Ignored,
}

/// Running totals since construction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SubscriptionCounters {
    pub frames: u64,
    pub commits: u64,
    pub events: u64,
    pub decode_errors: u64,
    pub handler_errors: u64,
    pub reconnects: u64,
}

#[derive(Default)]
struct AtomicCounters {
    frames: AtomicU64,
    commits: AtomicU64,
    events: AtomicU64,
    decode_errors: AtomicU64,
    handler_errors: AtomicU64,
    reconnects: AtomicU64,
}

impl AtomicCounters {
    fn snapshot(&self) -> SubscriptionCounters {
        SubscriptionCounters {
            frames: self.frames.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            events: self.events.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

/// State shared between the public handle and the connection task
struct Shared {
    options: FirehoseOptions,
    handlers: RwLock<HandlerRegistry>,
    cursor: AtomicI64,
    state: watch::Sender<SubscriptionState>,
    last_commit: Mutex<Option<CommitInfo>>,
    counters: AtomicCounters,
}

pub struct FirehoseSubscription {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl FirehoseSubscription {
    pub fn new(options: FirehoseOptions, handlers: impl Into<HandlerRegistry>) -> Self {
        let cursor = options.cursor.filter(|c| *c >= 0).unwrap_or(NO_CURSOR);
        let (state, _) = watch::channel(SubscriptionState::Disconnected);

        Self {
            shared: Arc::new(Shared {
                options,
                handlers: RwLock::new(handlers.into()),
                cursor: AtomicI64::new(cursor),
                state,
                last_commit: Mutex::new(None),
                counters: AtomicCounters::default(),
            }),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    pub fn options(&self) -> &FirehoseOptions {
        &self.shared.options
    }

    /// Add a handler; takes effect from the next dispatched event
    pub fn register(&self, kind: RecordKind, handler: EventHandler) {
        self.shared
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register(kind, handler);
    }

    /// Last processed sequence number (or the starting cursor)
    pub fn cursor(&self) -> Option<i64> {
        self.shared.cursor()
    }

    pub fn state(&self) -> SubscriptionState {
        *self.shared.state.borrow()
    }

    /// Receiver that observes every state transition
    pub fn watch_state(&self) -> watch::Receiver<SubscriptionState> {
        self.shared.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SubscriptionState::Connected
    }

    pub fn last_commit(&self) -> Option<CommitInfo> {
        self.shared
            .last_commit
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn counters(&self) -> SubscriptionCounters {
        self.shared.counters.snapshot()
    }

    /// Subscribe URL for the next connection attempt, resuming from the cursor
    pub fn url(&self) -> String {
        self.shared.url()
    }

    /// Spawn the connection task. A no-op while already running.
    pub fn start(&self) -> Result<()> {
        if self.state() == SubscriptionState::Stopped || self.cancel.is_cancelled() {
            return Err(IngesterError::Stopped);
        }
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.is_some() {
            return Ok(());
        }

        let shared = self.shared.clone();
        let cancel = self.cancel.clone();
        *task = Some(tokio::spawn(async move { run(shared, cancel).await }));
        Ok(())
    }

    /// Close the connection and cancel any pending retry. Idempotent.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "Firehose task ended abnormally");
            }
        }
        self.shared.set_state(SubscriptionState::Stopped);
    }

    /// Decode, classify and dispatch one binary message
    pub fn process_message(&self, data: &[u8]) -> MessageOutcome {
        self.shared.process_message(data)
    }
}

impl Drop for FirehoseSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl Shared {
    fn cursor(&self) -> Option<i64> {
        let cursor = self.cursor.load(Ordering::SeqCst);
        (cursor != NO_CURSOR).then_some(cursor)
    }

    fn url(&self) -> String {
        let base = format!("{}{}", self.options.relay.trim_end_matches('/'), SUBSCRIBE_PATH);
        match self.cursor() {
            Some(cursor) => format!("{}?cursor={}", base, cursor),
            None => base,
        }
    }

    fn set_state(&self, state: SubscriptionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(?previous, ?state, "Subscription state changed");
        }
    }

    fn advance_cursor(&self, seq: i64) {
        let previous = self.cursor.fetch_max(seq, Ordering::SeqCst);
        if seq <= previous {
            debug!(seq, cursor = previous, "Out-of-order sequence, cursor unchanged");
        }
    }

    fn process_message(&self, data: &[u8]) -> MessageOutcome {
        self.counters.frames.fetch_add(1, Ordering::Relaxed);

        let frame = match decode_frame(data) {
            Ok(frame) => frame,
            Err(e) => {
                self.counters.decode_errors.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, len = data.len(), "Dropping undecodable frame");
                return MessageOutcome::Dropped;
            }
        };

        match classify(&frame, &self.options.collections) {
            Classified::Commit { commit, events } => {
                let seq = commit.seq;
                self.advance_cursor(seq);
                self.counters.commits.fetch_add(1, Ordering::Relaxed);
                *self.last_commit.lock().unwrap_or_else(PoisonError::into_inner) = Some(commit);

                if !events.is_empty() {
                    // Snapshot so handlers may register further handlers
                    let handlers = self
                        .handlers
                        .read()
                        .unwrap_or_else(PoisonError::into_inner)
                        .clone();
                    for event in &events {
                        debug!(seq, uri = %event.uri, event = %event.event_type(), "Dispatching");
                        let report = handlers.dispatch(event);
                        self.counters
                            .handler_errors
                            .fetch_add(report.failed as u64, Ordering::Relaxed);
                    }
                    self.counters
                        .events
                        .fetch_add(events.len() as u64, Ordering::Relaxed);
                }

                MessageOutcome::Commit {
                    seq,
                    events: events.len(),
                }
            }
            Classified::Info { name, message } => {
                if name == "OutdatedCursor" {
                    warn!(
                        cursor = ?self.cursor(),
                        message = message.as_deref().unwrap_or(""),
                        "Relay no longer holds history at our cursor; some commits were missed"
                    );
                } else {
                    info!(name = %name, message = message.as_deref().unwrap_or(""), "Relay info");
                }
                MessageOutcome::Info
            }
            Classified::RelayError { error, message } => {
                warn!(
                    error = %error,
                    message = message.as_deref().unwrap_or(""),
                    "Relay error frame"
                );
                MessageOutcome::RelayError
            }
            Classified::Ignored { t, seq } => {
                if let Some(seq) = seq {
                    self.advance_cursor(seq);
                }
                debug!(t = ?t, "Ignoring message");
                MessageOutcome::Ignored
            }
        }
    }

    /// Read until the connection drops or `cancel` fires. `Ok` only on cancellation.
    async fn read_stream(&self, mut stream: RelayStream, cancel: &CancellationToken) -> Result<()> {
        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => {
                    if let Err(e) = stream.close(None).await {
                        debug!(error = %e, "Error closing relay connection");
                    }
                    return Ok(());
                }
                message = stream.next() => message,
            };

            match message {
                Some(Ok(Message::Binary(data))) => {
                    self.process_message(&data);
                }
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| format!("{} {}", f.code, f.reason))
                        .unwrap_or_else(|| "no close frame".to_string());
                    return Err(IngesterError::ConnectionClosed(reason));
                }
                Some(Ok(Message::Text(text))) => {
                    debug!(len = text.len(), "Ignoring text message");
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => return Err(IngesterError::ConnectionClosed("stream ended".to_string())),
            }
        }
    }

    async fn connect(&self) -> Result<RelayStream> {
        let url = self.url();
        info!(url = %url, "Connecting to relay");

        let timeout = self.options.connect_timeout;
        match tokio::time::timeout(timeout, connect_async(url.as_str())).await {
            Ok(Ok((stream, _response))) => Ok(stream),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(IngesterError::Timeout(timeout)),
        }
    }
}

/// Connection task: connect, read, back off, repeat until cancelled
async fn run(shared: Arc<Shared>, cancel: CancellationToken) {
    let mut backoff = Backoff::new(shared.options.backoff_initial, shared.options.backoff_max);

    while !cancel.is_cancelled() {
        shared.set_state(SubscriptionState::Connecting);

        let connected = tokio::select! {
            _ = cancel.cancelled() => break,
            result = shared.connect() => result,
        };

        match connected {
            Ok(stream) => {
                shared.set_state(SubscriptionState::Connected);
                backoff.reset();
                info!(cursor = ?shared.cursor(), "Connected to relay");

                match shared.read_stream(stream, &cancel).await {
                    Ok(()) => break,
                    Err(e) => warn!(error = %e, cursor = ?shared.cursor(), "Relay connection lost"),
                }
            }
            Err(e) => warn!(error = %e, "Relay connection failed"),
        }

        if cancel.is_cancelled() {
            break;
        }
        shared.set_state(SubscriptionState::Reconnecting);
        shared.counters.reconnects.fetch_add(1, Ordering::Relaxed);

        let delay = backoff.next_delay();
        info!(
            attempt = backoff.attempt(),
            delay_ms = delay.as_millis() as u64,
            "Reconnecting to relay"
        );
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    shared.set_state(SubscriptionState::Stopped);
    info!(cursor = ?shared.cursor(), "Firehose subscription stopped");
}
