//! GBIF species API client
//!
//! Only the parts BioSky needs: exact-name matching (v2 `species/match`) to get
//! a taxon's classification, and autocomplete search (v1 `species/suggest`).

use super::hierarchy::{TaxonAncestor, TaxonLineage};
use super::rank::TaxonRank;
use super::resolver::TaxonomyLookup;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const GBIF_V1_BASE_URL: &str = "https://api.gbif.org/v1";
const GBIF_V2_BASE_URL: &str = "https://api.gbif.org/v2";
const USER_AGENT: &str = concat!("BioSky/", env!("CARGO_PKG_VERSION"));

/// A taxon as returned by GBIF, normalised
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxonMatch {
    /// `gbif:<usageKey>`
    pub id: String,
    pub scientific_name: String,
    pub rank: Option<TaxonRank>,
    /// Higher taxa, excluding the taxon itself
    pub classification: Vec<TaxonAncestor>,
    /// GBIF reported an exact name match
    pub exact: bool,
}

impl TaxonMatch {
    /// Lineage for the hierarchy; `None` if GBIF gave a rank outside the fixed set
    pub fn lineage(&self) -> Option<TaxonLineage> {
        let rank = self.rank?;
        Some(TaxonLineage::new(
            self.scientific_name.clone(),
            rank,
            self.classification.iter().cloned(),
        ))
    }
}

/// Flat name-usage fields shared by v1 suggest results and v2 usages
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GbifNameUsage {
    key: Option<i64>,
    usage_key: Option<i64>,
    name: Option<String>,
    scientific_name: Option<String>,
    canonical_name: Option<String>,
    rank: Option<String>,
    kingdom: Option<String>,
    phylum: Option<String>,
    class: Option<String>,
    order: Option<String>,
    family: Option<String>,
    genus: Option<String>,
    species: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GbifClassificationEntry {
    name: Option<String>,
    #[serde(rename = "canonicalName")]
    canonical_name: Option<String>,
    rank: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GbifDiagnostics {
    match_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GbifV2MatchResult {
    usage: Option<GbifNameUsage>,
    #[serde(default)]
    classification: Vec<GbifClassificationEntry>,
    #[serde(default)]
    diagnostics: GbifDiagnostics,
}

impl GbifNameUsage {
    fn into_match(self, exact: bool, classification: Vec<TaxonAncestor>) -> Option<TaxonMatch> {
        let key = self.usage_key.or(self.key)?;
        let scientific_name = self
            .canonical_name
            .clone()
            .or_else(|| self.name.clone())
            .or_else(|| self.scientific_name.clone())
            .filter(|n| !n.trim().is_empty())?;
        let rank = self.rank.as_deref().and_then(|r| r.parse().ok());

        let classification = if classification.is_empty() {
            self.flat_classification()
        } else {
            classification
        };

        Some(TaxonMatch {
            id: format!("gbif:{}", key),
            scientific_name,
            rank,
            classification,
            exact,
        })
    }

    fn flat_classification(&self) -> Vec<TaxonAncestor> {
        [
            (TaxonRank::Kingdom, &self.kingdom),
            (TaxonRank::Phylum, &self.phylum),
            (TaxonRank::Class, &self.class),
            (TaxonRank::Order, &self.order),
            (TaxonRank::Family, &self.family),
            (TaxonRank::Genus, &self.genus),
            (TaxonRank::Species, &self.species),
        ]
        .into_iter()
        .filter_map(|(rank, name)| name.as_ref().map(|n| TaxonAncestor::new(n.clone(), rank)))
        .collect()
    }
}

fn parse_classification(entries: Vec<GbifClassificationEntry>) -> Vec<TaxonAncestor> {
    entries
        .into_iter()
        .filter_map(|e| {
            let rank = e.rank.as_deref()?.parse::<TaxonRank>().ok()?;
            let name = e.canonical_name.or(e.name)?;
            Some(TaxonAncestor::new(name, rank))
        })
        .collect()
}

/// GBIF API client
pub struct GbifClient {
    http_client: reqwest::Client,
    v1_base_url: String,
    v2_base_url: String,
}

impl GbifClient {
    pub fn new() -> Result<Self> {
        Self::with_base_urls(GBIF_V1_BASE_URL, GBIF_V2_BASE_URL)
    }

    pub fn with_base_urls(v1_base_url: &str, v2_base_url: &str) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(15))
            .build()?;

        Ok(Self {
            http_client,
            v1_base_url: v1_base_url.trim_end_matches('/').to_string(),
            v2_base_url: v2_base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Match a scientific name against the GBIF backbone
    pub async fn match_name(&self, name: &str) -> Result<Option<TaxonMatch>> {
        let url = format!("{}/species/match", self.v2_base_url);
        tracing::debug!(name = %name, url = %url, "Querying GBIF match");

        let response = self
            .http_client
            .get(&url)
            .query(&[("scientificName", name)])
            .send()
            .await?;

        if !response.status().is_success() {
            tracing::warn!(name = %name, status = %response.status(), "GBIF match request failed");
            return Ok(None);
        }

        let body: GbifV2MatchResult = response.json().await?;
        Ok(Self::match_from_v2(body))
    }

    /// Autocomplete search over accepted names
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<TaxonMatch>> {
        let url = format!("{}/species/suggest", self.v1_base_url);
        let limit = limit.to_string();

        let response = self
            .http_client
            .get(&url)
            .query(&[("q", query), ("limit", limit.as_str()), ("status", "ACCEPTED")])
            .send()
            .await?;

        if !response.status().is_success() {
            tracing::warn!(
                query = %query,
                status = %response.status(),
                "GBIF search request failed"
            );
            return Ok(Vec::new());
        }

        let items: Vec<GbifNameUsage> = response.json().await?;
        Ok(items
            .into_iter()
            .filter_map(|item| item.into_match(false, Vec::new()))
            .collect())
    }

    fn match_from_v2(body: GbifV2MatchResult) -> Option<TaxonMatch> {
        let exact = body.diagnostics.match_type.as_deref() == Some("EXACT");
        let classification = parse_classification(body.classification);
        let mut taxon = body.usage?.into_match(exact, classification)?;
        let own_name = taxon.scientific_name.clone();
        taxon.classification.retain(|a| a.name != own_name);
        Some(taxon)
    }
}

#[async_trait]
impl TaxonomyLookup for GbifClient {
    /// Only exact matches contribute lineages; fuzzy matches would graft the
    /// wrong ancestors onto a misspelt name.
    async fn lineage(&self, name: &str) -> Result<Option<TaxonLineage>> {
        Ok(self
            .match_name(name)
            .await?
            .filter(|m| m.exact)
            .and_then(|m| m.lineage()))
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<TaxonMatch>> {
        GbifClient::search(self, query, limit).await
    }
}
