//! In-memory taxonomic hierarchy
//!
//! Maps a scientific name to its chain of ancestors, ordered from the taxon
//! itself up to kingdom. Built once (usually by `TaxonomyResolver::build_hierarchy`)
//! and then shared read-only, typically behind an `Arc`.

use super::rank::TaxonRank;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One `(name, rank)` step in a lineage
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaxonAncestor {
    pub name: String,
    pub rank: TaxonRank,
}

impl TaxonAncestor {
    pub fn new(name: impl Into<String>, rank: TaxonRank) -> Self {
        Self { name: name.into(), rank }
    }
}

/// Ancestor chain of one taxon; `chain[0]` is the taxon itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxonLineage {
    chain: Vec<TaxonAncestor>,
}

impl TaxonLineage {
    /// Build a lineage from a taxon and any set of its ancestors.
    ///
    /// Ancestors are sorted most specific first; entries at or below the taxon's
    /// own rank, or with an empty name, are dropped.
    pub fn new(
        name: impl Into<String>,
        rank: TaxonRank,
        ancestors: impl IntoIterator<Item = TaxonAncestor>,
    ) -> Self {
        let mut rest: Vec<TaxonAncestor> = ancestors
            .into_iter()
            .filter(|a| a.rank < rank && !a.name.trim().is_empty())
            .collect();
        rest.sort_by(|a, b| b.rank.cmp(&a.rank));
        rest.dedup_by_key(|a| a.rank);

        let mut chain = Vec::with_capacity(rest.len() + 1);
        chain.push(TaxonAncestor::new(name, rank));
        chain.extend(rest);
        Self { chain }
    }

    pub fn name(&self) -> &str {
        &self.chain[0].name
    }

    pub fn rank(&self) -> TaxonRank {
        self.chain[0].rank
    }

    /// Name of this taxon's ancestor (or itself) at `rank`
    pub fn at(&self, rank: TaxonRank) -> Option<&str> {
        self.chain
            .iter()
            .find(|a| a.rank == rank)
            .map(|a| a.name.as_str())
    }

    /// Iterate from the taxon itself up towards kingdom
    pub fn iter(&self) -> impl Iterator<Item = &TaxonAncestor> {
        self.chain.iter()
    }
}

/// Read-only lookup from taxon name to lineage
#[derive(Debug, Clone, Default)]
pub struct TaxonomicHierarchy {
    lineages: HashMap<String, TaxonLineage>,
}

impl TaxonomicHierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_lineages(lineages: impl IntoIterator<Item = TaxonLineage>) -> Self {
        let mut hierarchy = Self::new();
        for lineage in lineages {
            hierarchy.insert(lineage);
        }
        hierarchy
    }

    /// Add a lineage. Only used while building; a shared hierarchy is immutable.
    pub fn insert(&mut self, lineage: TaxonLineage) {
        self.lineages.insert(lineage.name().to_string(), lineage);
    }

    pub fn lineage(&self, name: &str) -> Option<&TaxonLineage> {
        self.lineages.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lineages.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.lineages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lineages.is_empty()
    }

    /// Resolve `name` (stated at `rank`) to its ancestor name at `target`.
    ///
    /// Returns `None` when `target` is more specific than `rank`, or when the
    /// relation is unknown. Names missing from the hierarchy still resolve
    /// through nomenclature alone: a binomial's first word is its genus and an
    /// infraspecific trinomial's first two words are its species.
    pub fn ancestor_at(&self, name: &str, rank: TaxonRank, target: TaxonRank) -> Option<String> {
        if target > rank {
            return None;
        }
        if target == rank {
            return Some(name.to_string());
        }
        if let Some(lineage) = self.lineage(name) {
            return lineage.at(target).map(str::to_string);
        }

        let words: Vec<&str> = name.split_whitespace().collect();
        match target {
            TaxonRank::Genus if rank >= TaxonRank::Species && words.len() >= 2 => {
                Some(words[0].to_string())
            }
            TaxonRank::Species if rank.is_infraspecific() && words.len() >= 3 => {
                Some(format!("{} {}", words[0], words[1]))
            }
            _ => None,
        }
    }

    /// Lowest common ancestor of two `(name, rank)` pairs, or `None` if their
    /// known paths never meet.
    pub fn common_ancestor(
        &self,
        a: (&str, TaxonRank),
        b: (&str, TaxonRank),
    ) -> Option<TaxonAncestor> {
        let start = a.1.min(b.1);
        start.walk_up().find_map(|rank| {
            let left = self.ancestor_at(a.0, a.1, rank)?;
            let right = self.ancestor_at(b.0, b.1, rank)?;
            (left == right).then(|| TaxonAncestor::new(left, rank))
        })
    }
}
