//! BioSky ingester - main entry point
//!
//! Subscribes to the relay firehose, persists BioSky records to SQLite and
//! serves health/stats over HTTP until interrupted.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use biosky_common::config::load_config;
use biosky_common::db::Database;
use biosky_common::taxonomy::{GbifClient, NoLookup, TaxonomyLookup, TaxonomyResolver};
use biosky_ingester::config::{Args, IngesterConfig};
use biosky_ingester::persist::{self, CHECKPOINT_INTERVAL};
use biosky_ingester::stats::shared_stats;
use biosky_ingester::{build_router, AppState, FirehoseSubscription};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Config is read before logging starts so the file can set the log level
    let toml = load_config(args.config.as_deref()).context("Failed to load configuration")?;
    let mut config = IngesterConfig::resolve(&args, &toml);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_filter.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting BioSky Ingester (biosky-ingester) v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    info!("Database: {}", config.database_path.display());
    info!("Relay: {}", config.firehose.relay);

    let db = Database::open(&config.database_path)
        .await
        .context("Failed to open database")?;

    if config.explicit_cursor.is_none() {
        match db.load_cursor().await {
            Ok(Some(cursor)) => {
                info!(cursor, "Resuming from stored cursor");
                config.firehose.cursor = Some(cursor);
            }
            Ok(None) => info!("No stored cursor, starting from live tip"),
            Err(e) => warn!(error = %e, "Could not read stored cursor, starting from live tip"),
        }
    }

    let stats = shared_stats();
    let (tx, rx) = persist::event_channel();
    let subscription = Arc::new(FirehoseSubscription::new(
        config.firehose.clone(),
        persist::queue_handlers(tx),
    ));

    let worker = tokio::spawn(persist::run_persistence(
        db.clone(),
        rx,
        stats.clone(),
        CHECKPOINT_INTERVAL,
    ));

    let lookup: Arc<dyn TaxonomyLookup> = if config.gbif_lookup {
        Arc::new(GbifClient::new().context("Failed to create GBIF client")?)
    } else {
        Arc::new(NoLookup)
    };
    let taxonomy = TaxonomyResolver::with_cache(
        lookup,
        config
            .taxonomy_cache_ttl
            .unwrap_or(TaxonomyResolver::<Arc<dyn TaxonomyLookup>>::DEFAULT_TTL),
        config
            .taxonomy_cache_max_entries
            .unwrap_or(TaxonomyResolver::<Arc<dyn TaxonomyLookup>>::DEFAULT_MAX_ENTRIES),
    );

    let names = db
        .identified_names()
        .await
        .context("Failed to read identified names")?;
    let hierarchy = Arc::new(taxonomy.build_hierarchy(names.iter().map(String::as_str)).await);
    info!(names = names.len(), taxa = hierarchy.len(), "Taxonomic hierarchy built");

    subscription
        .start()
        .context("Failed to start firehose subscription")?;

    let app = build_router(AppState {
        subscription: subscription.clone(),
        stats,
        db: db.clone(),
        hierarchy,
        consensus: config.consensus,
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    subscription.stop().await;

    // Dropping the subscription drops the last queue sender; the worker stores
    // what is queued, saves its final checkpoint and exits
    drop(subscription);
    if let Err(e) = worker.await {
        warn!(error = %e, "Persistence worker failed");
    }

    info!("Shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
