//! Community ID consensus scenarios

use async_trait::async_trait;
use biosky_common::taxonomy::{
    CommunityIdCalculator, ConsensusPolicy, Identification, IdentificationStore, NameMatching,
    TaxonAncestor, TaxonLineage, TaxonRank, TaxonomicHierarchy, TieBreak,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::Arc;

const OCCURRENCE: &str = "at://did:plc:observer/org.rwell.test.occurrence/3k2a";

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap()
}

fn ident(n: i64, name: &str, rank: Option<TaxonRank>) -> Identification {
    Identification {
        uri: format!("at://did:plc:user{}/org.rwell.test.identification/{}", n, n),
        did: format!("did:plc:user{}", n),
        subject_uri: OCCURRENCE.to_string(),
        scientific_name: name.to_string(),
        taxon_rank: rank,
        is_agreement: false,
        date_identified: base_time() + Duration::minutes(n),
    }
}

fn species(n: i64, name: &str) -> Identification {
    ident(n, name, Some(TaxonRank::Species))
}

fn agreement(n: i64) -> Identification {
    Identification {
        is_agreement: true,
        ..ident(n, "Quercus", Some(TaxonRank::Genus))
    }
}

fn lineage(name: &str, kingdom: &str, phylum: &str, family: &str, genus: &str) -> TaxonLineage {
    TaxonLineage::new(
        name,
        TaxonRank::Species,
        vec![
            TaxonAncestor::new(kingdom, TaxonRank::Kingdom),
            TaxonAncestor::new(phylum, TaxonRank::Phylum),
            TaxonAncestor::new(family, TaxonRank::Family),
            TaxonAncestor::new(genus, TaxonRank::Genus),
        ],
    )
}

fn hierarchy() -> Arc<TaxonomicHierarchy> {
    Arc::new(TaxonomicHierarchy::from_lineages(vec![
        lineage("Quercus alba", "Plantae", "Tracheophyta", "Fagaceae", "Quercus"),
        lineage("Quercus rubra", "Plantae", "Tracheophyta", "Fagaceae", "Quercus"),
        lineage("Fagus sylvatica", "Plantae", "Tracheophyta", "Fagaceae", "Fagus"),
        lineage("Canis lupus", "Animalia", "Chordata", "Canidae", "Canis"),
    ]))
}

fn calculator() -> CommunityIdCalculator {
    CommunityIdCalculator::new(hierarchy())
}

#[test]
fn test_species_majority_wins() {
    let idents = vec![
        species(1, "Quercus alba"),
        species(2, "Quercus alba"),
        species(3, "Quercus rubra"),
    ];

    let result = calculator().calculate(&idents).expect("consensus");
    assert_eq!(result.scientific_name, "Quercus alba");
    assert_eq!(result.taxon_rank, TaxonRank::Species);
    assert_eq!(result.identification_count, 3);
    assert_eq!(result.agreement_count, 2);
    assert_eq!(result.supporting_uris.len(), 2);
}

#[test]
fn test_split_species_walks_up_to_genus() {
    let idents = vec![species(1, "Quercus alba"), species(2, "Quercus rubra")];

    let result = calculator().calculate(&idents).expect("consensus");
    assert_eq!(result.scientific_name, "Quercus");
    assert_eq!(result.taxon_rank, TaxonRank::Genus);
    assert_eq!(result.agreement_count, 2);
    assert_eq!(result.identification_count, 2);
}

#[test]
fn test_genus_fallback_without_hierarchy_entries() {
    let calc = CommunityIdCalculator::new(Arc::new(TaxonomicHierarchy::new()));
    let idents = vec![species(1, "Quercus alba"), species(2, "Quercus rubra")];

    let result = calc.calculate(&idents).expect("consensus");
    assert_eq!(result.scientific_name, "Quercus");
    assert_eq!(result.taxon_rank, TaxonRank::Genus);
}

#[test]
fn test_split_genera_resolve_at_family() {
    let idents = vec![
        species(1, "Quercus alba"),
        species(2, "Fagus sylvatica"),
        species(3, "Quercus rubra"),
        species(4, "Fagus sylvatica"),
    ];

    // Species: 2/4, genus: 2/4 each, family: Fagaceae 4/4
    let result = calculator().calculate(&idents).expect("consensus");
    assert_eq!(result.scientific_name, "Fagaceae");
    assert_eq!(result.taxon_rank, TaxonRank::Family);
    assert_eq!(result.agreement_count, 4);
}

#[test]
fn test_empty_list_has_no_result() {
    assert!(calculator().calculate(&[]).is_none());
}

#[test]
fn test_no_majority_even_at_kingdom() {
    let idents = vec![species(1, "Quercus alba"), species(2, "Canis lupus")];
    assert!(calculator().calculate(&idents).is_none());
}

#[test]
fn test_tie_at_half_does_not_qualify() {
    let idents = vec![
        species(1, "Quercus alba"),
        species(2, "Quercus alba"),
        species(3, "Canis lupus"),
        species(4, "Canis lupus"),
    ];
    assert!(calculator().calculate(&idents).is_none());
}

#[test]
fn test_calculate_is_idempotent() {
    let calc = calculator();
    let idents = vec![
        species(1, "Quercus alba"),
        species(2, "Quercus rubra"),
        species(3, "Quercus alba"),
    ];
    assert_eq!(calc.calculate(&idents), calc.calculate(&idents));
}

#[test]
fn test_missing_rank_treated_as_species() {
    let idents = vec![
        ident(1, "Quercus alba", None),
        ident(2, "Quercus alba", None),
        ident(3, "Quercus rubra", None),
    ];
    let result = calculator().calculate(&idents).expect("consensus");
    assert_eq!(result.taxon_rank, TaxonRank::Species);
    assert_eq!(result.scientific_name, "Quercus alba");
}

#[test]
fn test_agreement_counts_toward_current_leader() {
    let idents = vec![
        species(1, "Quercus alba"),
        agreement(2),
        species(3, "Quercus rubra"),
    ];

    let result = calculator().calculate(&idents).expect("consensus");
    assert_eq!(result.scientific_name, "Quercus alba");
    assert_eq!(result.taxon_rank, TaxonRank::Species);
    assert_eq!(result.agreement_count, 2);
}

#[test]
fn test_agreement_without_leader_keeps_own_name() {
    let idents = vec![agreement(1), species(2, "Quercus rubra"), species(3, "Quercus alba")];

    // The agreement stands for "Quercus" at genus; every identification shares it
    let result = calculator().calculate(&idents).expect("consensus");
    assert_eq!(result.scientific_name, "Quercus");
    assert_eq!(result.taxon_rank, TaxonRank::Genus);
    assert_eq!(result.agreement_count, 3);
}

#[test]
fn test_agreement_follows_genus_consensus() {
    let idents = vec![
        species(1, "Quercus alba"),
        species(2, "Quercus rubra"),
        agreement(3),
    ];

    // Before the agreement the community ID is "Quercus" at genus
    for tie_break in [TieBreak::MostRecent, TieBreak::Earliest] {
        let result = CommunityIdCalculator::with_policy(
            hierarchy(),
            ConsensusPolicy {
                tie_break,
                ..ConsensusPolicy::default()
            },
        )
        .calculate(&idents)
        .expect("consensus");
        assert_eq!(result.scientific_name, "Quercus");
        assert_eq!(result.taxon_rank, TaxonRank::Genus);
        assert_eq!(result.agreement_count, 3);
    }
}

#[test]
fn test_agreement_with_genus_consensus_and_no_lineages() {
    let calc = CommunityIdCalculator::new(Arc::new(TaxonomicHierarchy::default()));
    let idents = vec![
        species(1, "Quercus alba"),
        species(2, "Quercus rubra"),
        Identification {
            is_agreement: true,
            ..species(3, "Quercus rubra")
        },
    ];

    let result = calc.calculate(&idents).expect("consensus");
    assert_eq!(result.scientific_name, "Quercus");
    assert_eq!(result.taxon_rank, TaxonRank::Genus);
    assert_eq!(result.agreement_count, 3);
}

#[test]
fn test_tie_break_policy_orders_tally() {
    let idents = vec![species(1, "Quercus alba"), species(2, "Quercus rubra")];

    let most_recent = calculator().tally(&idents);
    assert_eq!(most_recent[0].scientific_name, "Quercus rubra");

    let earliest = CommunityIdCalculator::with_policy(
        hierarchy(),
        ConsensusPolicy {
            tie_break: TieBreak::Earliest,
            ..ConsensusPolicy::default()
        },
    )
    .tally(&idents);
    assert_eq!(earliest[0].scientific_name, "Quercus alba");
}

#[test]
fn test_name_matching_policy() {
    let idents = vec![
        species(1, "Quercus alba"),
        species(2, "quercus alba"),
        species(3, "Quercus rubra"),
    ];

    // Exact matching splits the two spellings and only agrees at genus
    let exact = calculator().calculate(&idents).expect("consensus");
    assert_eq!(exact.taxon_rank, TaxonRank::Genus);
    assert_eq!(exact.scientific_name, "Quercus");

    let relaxed = CommunityIdCalculator::with_policy(
        hierarchy(),
        ConsensusPolicy {
            name_matching: NameMatching::CaseInsensitive,
            ..ConsensusPolicy::default()
        },
    )
    .calculate(&idents)
    .expect("consensus");
    assert_eq!(relaxed.taxon_rank, TaxonRank::Species);
    assert_eq!(relaxed.scientific_name, "Quercus alba");
    assert_eq!(relaxed.agreement_count, 2);
}

#[test]
fn test_tally_orders_by_count() {
    let idents = vec![
        species(1, "Quercus rubra"),
        species(2, "Quercus alba"),
        species(3, "Quercus alba"),
    ];
    let tally = calculator().tally(&idents);
    assert_eq!(tally.len(), 2);
    assert_eq!(tally[0].scientific_name, "Quercus alba");
    assert_eq!(tally[0].count, 2);
    assert_eq!(tally[1].scientific_name, "Quercus rubra");
}

struct MemoryStore {
    by_occurrence: HashMap<String, Vec<Identification>>,
}

#[async_trait]
impl IdentificationStore for MemoryStore {
    async fn get_identifications_for_occurrence(
        &self,
        occurrence_uri: &str,
    ) -> biosky_common::Result<Vec<Identification>> {
        Ok(self
            .by_occurrence
            .get(occurrence_uri)
            .cloned()
            .unwrap_or_default())
    }
}

#[tokio::test]
async fn test_calculate_for_reads_from_store() {
    let mut by_occurrence = HashMap::new();
    by_occurrence.insert(
        OCCURRENCE.to_string(),
        vec![species(1, "Quercus alba"), species(2, "Quercus alba")],
    );
    let store = MemoryStore { by_occurrence };
    let calc = calculator();

    let result = calc.calculate_for(&store, OCCURRENCE).await.unwrap();
    assert_eq!(result.map(|r| r.scientific_name), Some("Quercus alba".to_string()));

    let missing = calc
        .calculate_for(&store, "at://did:plc:x/org.rwell.test.occurrence/none")
        .await
        .unwrap();
    assert!(missing.is_none());
}
