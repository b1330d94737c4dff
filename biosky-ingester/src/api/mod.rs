//! HTTP API handlers for biosky-ingester

pub mod community_id;
pub mod dashboard;
pub mod health;
pub mod stats;

pub use community_id::{community_id_routes, get_community_id};
pub use dashboard::dashboard_routes;
pub use health::health_routes;
pub use stats::stats_routes;
