//! Taxonomy: rank ordering, ancestor hierarchy, community ID consensus and the
//! GBIF-backed lookup service used to populate the hierarchy.

mod cache;
mod community_id;
mod gbif;
mod hierarchy;
mod rank;
mod resolver;

pub use cache::TtlCache;
pub use community_id::{
    CommunityIdCalculator, CommunityIdResult, ConsensusPolicy, Identification,
    IdentificationStore, NameMatching, TaxonCount, TieBreak,
};
pub use gbif::{GbifClient, TaxonMatch};
pub use hierarchy::{TaxonAncestor, TaxonLineage, TaxonomicHierarchy};
pub use rank::TaxonRank;
pub use resolver::{NoLookup, TaxonomyLookup, TaxonomyResolver};
