//! Ingester configuration
//!
//! Command line / environment first, then the TOML file, then compiled defaults.

use std::path::PathBuf;
use std::time::Duration;

use biosky_common::config::{resolve_database_path, TomlConfig};
use biosky_common::taxonomy::ConsensusPolicy;
use clap::Parser;

use crate::classifier::CollectionMap;
use crate::subscription::{FirehoseOptions, DEFAULT_CONNECT_TIMEOUT, DEFAULT_RELAY};
use crate::backoff;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_LOG_FILTER: &str = "biosky_ingester=info,biosky_common=info";

/// Command-line arguments for biosky-ingester
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "biosky-ingester")]
#[command(about = "BioSky firehose ingester")]
#[command(version)]
pub struct Args {
    /// Relay WebSocket URL [default: wss://bsky.network]
    #[arg(long, env = "BIOSKY_RELAY")]
    pub relay: Option<String>,

    /// Firehose sequence number to resume after
    #[arg(long, env = "BIOSKY_CURSOR")]
    pub cursor: Option<i64>,

    /// HTTP port for health and stats [default: 8080]
    #[arg(short, long, env = "BIOSKY_PORT")]
    pub port: Option<u16>,

    /// SQLite database file
    #[arg(long, env = "BIOSKY_DATABASE")]
    pub database: Option<PathBuf>,

    /// TOML config file
    #[arg(short, long, env = "BIOSKY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `biosky_ingester=trace`
    #[arg(long, env = "BIOSKY_LOG_LEVEL")]
    pub log_level: Option<String>,
}

/// Fully resolved runtime settings
#[derive(Debug, Clone)]
pub struct IngesterConfig {
    pub firehose: FirehoseOptions,
    /// Cursor given on the command line or in TOML (a stored checkpoint is
    /// consulted only when this is `None`)
    pub explicit_cursor: Option<i64>,
    pub port: u16,
    pub database_path: PathBuf,
    pub log_filter: String,
    pub consensus: ConsensusPolicy,
    pub gbif_lookup: bool,
    pub taxonomy_cache_ttl: Option<Duration>,
    pub taxonomy_cache_max_entries: Option<usize>,
}

impl IngesterConfig {
    pub fn resolve(args: &Args, toml: &TomlConfig) -> Self {
        let fh = &toml.firehose;
        let explicit_cursor = args.cursor.or(fh.cursor);

        let firehose = FirehoseOptions {
            relay: args
                .relay
                .clone()
                .or_else(|| fh.relay.clone())
                .unwrap_or_else(|| DEFAULT_RELAY.to_string()),
            cursor: explicit_cursor,
            collections: CollectionMap::from_config(&fh.collections),
            backoff_initial: fh
                .backoff_initial_ms
                .map(Duration::from_millis)
                .unwrap_or(backoff::DEFAULT_INITIAL),
            backoff_max: fh
                .backoff_max_ms
                .map(Duration::from_millis)
                .unwrap_or(backoff::DEFAULT_MAX),
            connect_timeout: fh
                .connect_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT),
        };

        Self {
            firehose,
            explicit_cursor,
            port: args.port.or(toml.http_port).unwrap_or(DEFAULT_PORT),
            database_path: resolve_database_path(args.database.as_deref(), toml),
            log_filter: args
                .log_level
                .clone()
                .or_else(|| toml.logging.level.clone())
                .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
            consensus: toml.taxonomy.consensus_policy(),
            gbif_lookup: toml.taxonomy.gbif_lookup.unwrap_or(true),
            taxonomy_cache_ttl: toml.taxonomy.cache_ttl_secs.map(Duration::from_secs),
            taxonomy_cache_max_entries: toml.taxonomy.cache_max_entries,
        }
    }
}
