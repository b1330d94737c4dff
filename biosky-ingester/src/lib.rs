//! biosky-ingester library
//!
//! Consumes the AT Protocol firehose, keeps the BioSky records (occurrences,
//! identifications, comments) and serves health and ingestion statistics.

use std::sync::Arc;

use axum::Router;
use biosky_common::db::Database;
use biosky_common::taxonomy::{ConsensusPolicy, TaxonomicHierarchy};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod backoff;
pub mod car;
pub mod cbor;
pub mod cid;
pub mod classifier;
pub mod config;
pub mod error;
pub mod frame;
pub mod handlers;
pub mod persist;
pub mod stats;
pub mod subscription;

pub use error::{IngesterError, Result};
pub use subscription::{FirehoseOptions, FirehoseSubscription, SubscriptionState};

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub subscription: Arc<FirehoseSubscription>,
    pub stats: stats::SharedStats,
    pub db: Database,
    /// Built once at startup; read by every community ID request
    pub hierarchy: Arc<TaxonomicHierarchy>,
    pub consensus: ConsensusPolicy,
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::dashboard_routes())
        .merge(api::health_routes())
        .merge(api::stats_routes())
        .merge(api::community_id_routes())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
