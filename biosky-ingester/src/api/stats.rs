//! Ingestion statistics endpoint

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::stats::{IngesterStats, RecentEvent};
use crate::subscription::SubscriptionCounters;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct LastProcessed {
    pub seq: i64,
    pub time: String,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub connected: bool,
    pub state: crate::subscription::SubscriptionState,
    pub cursor: Option<i64>,
    pub uptime_secs: i64,
    pub stats: IngesterStats,
    pub firehose: SubscriptionCounters,
    pub recent_events: Vec<RecentEvent>,
    pub last_processed: Option<LastProcessed>,
}

/// GET /api/stats
///
/// `stats.errors` counts persistence failures plus dropped frames and failed
/// handler calls.
pub async fn get_stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let subscription = &state.subscription;
    let counters = subscription.counters();

    let guard = state.stats.read().await;
    let mut stats = guard.stats.clone();
    stats.errors += counters.decode_errors + counters.handler_errors;

    Json(StatsResponse {
        connected: subscription.is_connected(),
        state: subscription.state(),
        cursor: subscription.cursor(),
        uptime_secs: guard.uptime_secs(),
        stats,
        firehose: counters,
        recent_events: guard.recent_events(),
        last_processed: subscription.last_commit().map(|commit| LastProcessed {
            seq: commit.seq,
            time: commit.time,
        }),
    })
}

pub fn stats_routes() -> Router<AppState> {
    Router::new().route("/api/stats", get(get_stats))
}
