//! Fixed Darwin-Core-style rank vocabulary

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Taxonomic rank, ordered from most general (`Kingdom`) to most specific
/// (`Variety`). `Ord` follows specificity, so `Species > Genus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaxonRank {
    Kingdom,
    Phylum,
    Class,
    Order,
    Family,
    Genus,
    Species,
    Subspecies,
    Variety,
}

impl TaxonRank {
    /// All ranks, most general first
    pub const ALL: [TaxonRank; 9] = [
        TaxonRank::Kingdom,
        TaxonRank::Phylum,
        TaxonRank::Class,
        TaxonRank::Order,
        TaxonRank::Family,
        TaxonRank::Genus,
        TaxonRank::Species,
        TaxonRank::Subspecies,
        TaxonRank::Variety,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaxonRank::Kingdom => "kingdom",
            TaxonRank::Phylum => "phylum",
            TaxonRank::Class => "class",
            TaxonRank::Order => "order",
            TaxonRank::Family => "family",
            TaxonRank::Genus => "genus",
            TaxonRank::Species => "species",
            TaxonRank::Subspecies => "subspecies",
            TaxonRank::Variety => "variety",
        }
    }

    /// Next rank up, or `None` at kingdom.
    ///
    /// Subspecies and variety are both infraspecific, so both step up to species.
    pub fn parent(&self) -> Option<TaxonRank> {
        match self {
            TaxonRank::Kingdom => None,
            TaxonRank::Phylum => Some(TaxonRank::Kingdom),
            TaxonRank::Class => Some(TaxonRank::Phylum),
            TaxonRank::Order => Some(TaxonRank::Class),
            TaxonRank::Family => Some(TaxonRank::Order),
            TaxonRank::Genus => Some(TaxonRank::Family),
            TaxonRank::Species => Some(TaxonRank::Genus),
            TaxonRank::Subspecies | TaxonRank::Variety => Some(TaxonRank::Species),
        }
    }

    /// Ranks from `self` up to kingdom inclusive, in walking order
    pub fn walk_up(self) -> impl Iterator<Item = TaxonRank> {
        std::iter::successors(Some(self), |r| r.parent())
    }

    pub fn is_infraspecific(&self) -> bool {
        matches!(self, TaxonRank::Subspecies | TaxonRank::Variety)
    }
}

impl fmt::Display for TaxonRank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaxonRank {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        TaxonRank::ALL
            .iter()
            .copied()
            .find(|r| r.as_str() == lower)
            .ok_or_else(|| crate::Error::InvalidInput(format!("unknown rank: {}", s)))
    }
}
