//! Taxonomy resolution service
//!
//! `TaxonomyResolver` is constructed explicitly and passed to whoever needs it;
//! one instance per process gives one shared cache.

use super::cache::TtlCache;
use super::gbif::TaxonMatch;
use super::hierarchy::{TaxonLineage, TaxonomicHierarchy};
use crate::Result;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::time::Duration;

/// Taxonomy collaborator: rank and ancestor chain for a scientific name
#[async_trait]
pub trait TaxonomyLookup: Send + Sync {
    async fn lineage(&self, name: &str) -> Result<Option<TaxonLineage>>;

    async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<TaxonMatch>> {
        Ok(Vec::new())
    }
}

#[async_trait]
impl<T: TaxonomyLookup + ?Sized> TaxonomyLookup for std::sync::Arc<T> {
    async fn lineage(&self, name: &str) -> Result<Option<TaxonLineage>> {
        (**self).lineage(name).await
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<TaxonMatch>> {
        (**self).search(query, limit).await
    }
}

/// Lookup that knows no lineages; consensus relies on nomenclature alone
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLookup;

#[async_trait]
impl TaxonomyLookup for NoLookup {
    async fn lineage(&self, _name: &str) -> Result<Option<TaxonLineage>> {
        Ok(None)
    }
}

pub struct TaxonomyResolver<L> {
    lookup: L,
    lineage_cache: TtlCache<String, Option<TaxonLineage>>,
    search_cache: TtlCache<String, Vec<TaxonMatch>>,
}

impl<L: TaxonomyLookup> TaxonomyResolver<L> {
    pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);
    pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

    pub fn new(lookup: L) -> Self {
        Self::with_cache(lookup, Self::DEFAULT_TTL, Self::DEFAULT_MAX_ENTRIES)
    }

    pub fn with_cache(lookup: L, ttl: Duration, max_entries: usize) -> Self {
        Self {
            lookup,
            lineage_cache: TtlCache::new(ttl, max_entries),
            search_cache: TtlCache::new(ttl, max_entries),
        }
    }

    /// Lineage for an exact name. Negative answers are cached; errors are not.
    pub async fn lineage(&self, name: &str) -> Result<Option<TaxonLineage>> {
        let key = name.to_string();
        if let Some(cached) = self.lineage_cache.get(&key) {
            return Ok(cached);
        }
        let lineage = self.lookup.lineage(name).await?;
        self.lineage_cache.insert(key, lineage.clone());
        Ok(lineage)
    }

    /// Search, cached by lower-cased query and limit
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<TaxonMatch>> {
        let key = format!("search:{}:{}", query.to_lowercase(), limit);
        if let Some(cached) = self.search_cache.get(&key) {
            return Ok(cached);
        }
        let results = self.lookup.search(query, limit).await?;
        self.search_cache.insert(key, results.clone());
        Ok(results)
    }

    /// Resolve every distinct name and assemble a read-only hierarchy.
    ///
    /// Names that fail to resolve are logged and left out; consensus then falls
    /// back to nomenclature for them.
    pub async fn build_hierarchy<'a, I>(&self, names: I) -> TaxonomicHierarchy
    where
        I: IntoIterator<Item = &'a str>,
    {
        let distinct: BTreeSet<&str> = names.into_iter().collect();
        let mut hierarchy = TaxonomicHierarchy::new();

        for name in distinct {
            match self.lineage(name).await {
                Ok(Some(lineage)) => hierarchy.insert(lineage),
                Ok(None) => tracing::debug!(name = %name, "No lineage known for taxon"),
                Err(e) => tracing::warn!(name = %name, error = %e, "Taxonomy lookup failed"),
            }
        }
        hierarchy
    }
}
