//! # BioSky Common Library
//!
//! Shared code for the BioSky services including:
//! - Domain event types produced by the firehose ingester
//! - Taxonomic ranks, hierarchy and community ID consensus
//! - Taxonomy lookup (GBIF) with TTL caching
//! - SQLite storage for occurrences, identifications and comments
//! - Configuration loading
//! - Timestamp helpers

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod taxonomy;
pub mod time;

pub use error::{Error, Result};
pub use events::{DomainEvent, RecordAction, RecordKind};
pub use taxonomy::{
    CommunityIdCalculator, CommunityIdResult, ConsensusPolicy, Identification, TaxonRank,
    TaxonomicHierarchy,
};
