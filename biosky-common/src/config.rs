//! Configuration loading and default path resolution
//!
//! Settings are layered: command line / environment (handled by each binary's
//! clap definition) over an optional TOML file over compiled defaults. A
//! missing TOML file is never fatal.

use crate::taxonomy::{ConsensusPolicy, NameMatching, TieBreak};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Contents of `ingester.toml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    pub database_path: Option<PathBuf>,
    pub http_port: Option<u16>,
    #[serde(default)]
    pub firehose: FirehoseConfig,
    #[serde(default)]
    pub taxonomy: TaxonomyConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// `[firehose]` section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FirehoseConfig {
    pub relay: Option<String>,
    pub cursor: Option<i64>,
    pub backoff_initial_ms: Option<u64>,
    pub backoff_max_ms: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
    #[serde(default)]
    pub collections: CollectionsConfig,
}

/// `[firehose.collections]`: record collection NSIDs per event kind.
/// Unset kinds keep the built-in defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionsConfig {
    pub occurrence: Option<Vec<String>>,
    pub identification: Option<Vec<String>>,
    pub comment: Option<Vec<String>>,
}

/// `[taxonomy]` section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaxonomyConfig {
    pub cache_ttl_secs: Option<u64>,
    pub cache_max_entries: Option<usize>,
    pub name_matching: Option<NameMatching>,
    pub tie_break: Option<TieBreak>,
    /// Resolve lineages through GBIF; when off, only nomenclature is used
    pub gbif_lookup: Option<bool>,
}

impl TaxonomyConfig {
    pub fn consensus_policy(&self) -> ConsensusPolicy {
        ConsensusPolicy {
            name_matching: self.name_matching.unwrap_or_default(),
            tie_break: self.tie_break.unwrap_or_default(),
        }
    }
}

/// `[logging]` section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter directive, e.g. `info` or `biosky_ingester=debug`
    pub level: Option<String>,
}

/// Candidate config file locations, highest priority first
pub fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("biosky").join("ingester.toml"));
    }
    if cfg!(unix) {
        paths.push(PathBuf::from("/etc/biosky/ingester.toml"));
    }
    paths
}

/// Load configuration.
///
/// An explicitly named file must exist and parse. Otherwise the first existing
/// default location is used, and if there is none the defaults are returned.
pub fn load_config(explicit: Option<&Path>) -> Result<TomlConfig> {
    if let Some(path) = explicit {
        return read_toml_config(path);
    }

    for path in default_config_paths() {
        if path.exists() {
            return read_toml_config(&path);
        }
    }

    warn!("No config file found, using defaults");
    Ok(TomlConfig::default())
}

/// Read and parse one TOML config file
pub fn read_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;
    info!("Loaded config file: {}", path.display());
    Ok(config)
}

/// Write a config file, creating parent directories
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize config failed: {}", e)))?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    Ok(())
}

/// OS-dependent default database location
pub fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("biosky"))
        .unwrap_or_else(|| PathBuf::from("./biosky_data"))
        .join("biosky.db")
}

/// Database path by priority: command line, TOML, compiled default
pub fn resolve_database_path(cli_arg: Option<&Path>, config: &TomlConfig) -> PathBuf {
    cli_arg
        .map(Path::to_path_buf)
        .or_else(|| config.database_path.clone())
        .unwrap_or_else(default_database_path)
}
