//! Community ID consensus
//!
//! Derives the consensus taxon for an occurrence from the identifications
//! attached to it. A name wins at a rank when it is endorsed by more than half
//! of all identifications; if no name reaches that at the most specific rank
//! present, the calculation walks up the hierarchy one rank at a time and
//! re-tallies every identification by its ancestor at that rank.
//!
//! The calculator is a pure function of its input plus the shared, read-only
//! `TaxonomicHierarchy`. It can be called concurrently without coordination.

use super::hierarchy::TaxonomicHierarchy;
use super::rank::TaxonRank;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

/// One live identification of an occurrence, as supplied by storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identification {
    pub uri: String,
    pub did: String,
    pub subject_uri: String,
    pub scientific_name: String,
    /// Stated rank; identifications without one are treated as species
    pub taxon_rank: Option<TaxonRank>,
    /// Agrees with the current community ID instead of proposing a name
    pub is_agreement: bool,
    pub date_identified: DateTime<Utc>,
}

impl Identification {
    pub fn rank(&self) -> TaxonRank {
        self.taxon_rank.unwrap_or(TaxonRank::Species)
    }
}

/// Storage collaborator: live (non-deleted) identifications for an occurrence,
/// in the order they should be considered.
#[async_trait]
pub trait IdentificationStore: Send + Sync {
    async fn get_identifications_for_occurrence(
        &self,
        occurrence_uri: &str,
    ) -> Result<Vec<Identification>>;
}

/// How scientific names are compared when tallying
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NameMatching {
    /// Names must match exactly as supplied
    #[default]
    Exact,
    /// ASCII case is ignored; the first spelling seen is reported
    CaseInsensitive,
}

/// Which candidate wins when two names tie at the same rank
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Name with the most recent supporting `date_identified`
    #[default]
    MostRecent,
    /// Name with the earliest supporting `date_identified`
    Earliest,
}

/// Tunable points of the consensus rule
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusPolicy {
    #[serde(default)]
    pub name_matching: NameMatching,
    #[serde(default)]
    pub tie_break: TieBreak,
}

/// Tally of identifications endorsing one name at one rank
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaxonCount {
    pub scientific_name: String,
    pub rank: TaxonRank,
    pub count: usize,
    pub earliest: DateTime<Utc>,
    pub latest: DateTime<Utc>,
    pub identification_uris: Vec<String>,
}

impl TaxonCount {
    fn new(name: String, rank: TaxonRank, uri: &str, date: DateTime<Utc>) -> Self {
        Self {
            scientific_name: name,
            rank,
            count: 1,
            earliest: date,
            latest: date,
            identification_uris: vec![uri.to_string()],
        }
    }

    fn add(&mut self, uri: &str, date: DateTime<Utc>) {
        self.count += 1;
        self.earliest = self.earliest.min(date);
        self.latest = self.latest.max(date);
        self.identification_uris.push(uri.to_string());
    }
}

/// Consensus outcome for one occurrence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunityIdResult {
    pub scientific_name: String,
    pub taxon_rank: TaxonRank,
    /// All identifications considered (the majority denominator)
    pub identification_count: usize,
    /// Identifications supporting the winning name at `taxon_rank`
    pub agreement_count: usize,
    pub supporting_uris: Vec<String>,
}

/// What one identification effectively endorses after agreement resolution
#[derive(Debug, Clone)]
struct Endorsement<'a> {
    name: String,
    rank: TaxonRank,
    uri: &'a str,
    date: DateTime<Utc>,
}

/// Consensus calculator sharing one read-only hierarchy
#[derive(Debug, Clone)]
pub struct CommunityIdCalculator {
    hierarchy: Arc<TaxonomicHierarchy>,
    policy: ConsensusPolicy,
}

impl CommunityIdCalculator {
    pub fn new(hierarchy: Arc<TaxonomicHierarchy>) -> Self {
        Self::with_policy(hierarchy, ConsensusPolicy::default())
    }

    pub fn with_policy(hierarchy: Arc<TaxonomicHierarchy>, policy: ConsensusPolicy) -> Self {
        Self { hierarchy, policy }
    }

    pub fn policy(&self) -> ConsensusPolicy {
        self.policy
    }

    pub fn hierarchy(&self) -> &TaxonomicHierarchy {
        &self.hierarchy
    }

    /// Fetch the occurrence's identifications from `store` and compute consensus
    pub async fn calculate_for<S>(
        &self,
        store: &S,
        occurrence_uri: &str,
    ) -> Result<Option<CommunityIdResult>>
    where
        S: IdentificationStore + ?Sized,
    {
        let identifications = store.get_identifications_for_occurrence(occurrence_uri).await?;
        let result = self.calculate(&identifications);
        tracing::debug!(
            occurrence = %occurrence_uri,
            identifications = identifications.len(),
            community_id = ?result.as_ref().map(|r| r.scientific_name.as_str()),
            "Calculated community ID"
        );
        Ok(result)
    }

    /// Compute consensus over `identifications`.
    ///
    /// Returns `None` for an empty list and for a list where no rank up to
    /// kingdom reaches a strict majority.
    pub fn calculate(&self, identifications: &[Identification]) -> Option<CommunityIdResult> {
        let endorsements = self.resolve_endorsements(identifications);
        self.consensus(&endorsements)
    }

    /// Tally identifications by the name each endorses at its own rank
    pub fn tally(&self, identifications: &[Identification]) -> Vec<TaxonCount> {
        let endorsements = self.resolve_endorsements(identifications);
        let mut counts: BTreeMap<(TaxonRank, String), TaxonCount> = BTreeMap::new();
        for e in &endorsements {
            let key = (e.rank, self.key(&e.name));
            match counts.get_mut(&key) {
                Some(count) => count.add(e.uri, e.date),
                None => {
                    counts.insert(key, TaxonCount::new(e.name.clone(), e.rank, e.uri, e.date));
                }
            }
        }
        let mut out: Vec<TaxonCount> = counts.into_values().collect();
        out.sort_by(|a, b| self.compare(b, a));
        out
    }

    fn consensus(&self, endorsements: &[Endorsement<'_>]) -> Option<CommunityIdResult> {
        let total = endorsements.len();
        let start = endorsements.iter().map(|e| e.rank).max()?;

        start.walk_up().find_map(|rank| {
            let counts = self.tally_at(endorsements, rank);
            let winner = counts
                .into_values()
                .filter(|c| c.count * 2 > total)
                .max_by(|a, b| self.compare(a, b))?;
            Some(CommunityIdResult {
                scientific_name: winner.scientific_name,
                taxon_rank: rank,
                identification_count: total,
                agreement_count: winner.count,
                supporting_uris: winner.identification_uris,
            })
        })
    }

    /// Replace each agreement by the community ID computed from the
    /// identifications before it, name and rank both. An agreement made while
    /// there was no consensus keeps its own name.
    fn resolve_endorsements<'a>(
        &self,
        identifications: &'a [Identification],
    ) -> Vec<Endorsement<'a>> {
        let mut out: Vec<Endorsement<'a>> = Vec::with_capacity(identifications.len());

        for ident in identifications {
            let current = if ident.is_agreement {
                self.consensus(&out)
                    .map(|result| (result.scientific_name, result.taxon_rank))
            } else {
                None
            };
            let (name, rank) =
                current.unwrap_or_else(|| (ident.scientific_name.clone(), ident.rank()));

            out.push(Endorsement {
                name,
                rank,
                uri: &ident.uri,
                date: ident.date_identified,
            });
        }
        out
    }

    fn tally_at(
        &self,
        endorsements: &[Endorsement<'_>],
        rank: TaxonRank,
    ) -> BTreeMap<String, TaxonCount> {
        let mut counts: BTreeMap<String, TaxonCount> = BTreeMap::new();
        for e in endorsements {
            let Some(name) = self.hierarchy.ancestor_at(&e.name, e.rank, rank) else {
                continue;
            };
            match counts.get_mut(&self.key(&name)) {
                Some(count) => count.add(e.uri, e.date),
                None => {
                    counts.insert(self.key(&name), TaxonCount::new(name, rank, e.uri, e.date));
                }
            }
        }
        counts
    }

    fn key(&self, name: &str) -> String {
        match self.policy.name_matching {
            NameMatching::Exact => name.to_string(),
            NameMatching::CaseInsensitive => name.to_ascii_lowercase(),
        }
    }

    /// Higher count wins, then the configured tie-break, then name order so the
    /// result never depends on iteration order.
    fn compare(&self, a: &TaxonCount, b: &TaxonCount) -> Ordering {
        a.count
            .cmp(&b.count)
            .then_with(|| match self.policy.tie_break {
                TieBreak::MostRecent => a.latest.cmp(&b.latest),
                TieBreak::Earliest => b.earliest.cmp(&a.earliest),
            })
            .then_with(|| b.scientific_name.cmp(&a.scientific_name))
    }
}
