//! Identification record storage
//!
//! Rows here are the live identifications the community ID calculator reads.
//! A deleted identification record is removed outright, so every stored row
//! counts.

use super::{parse_stored_timestamp, record_timestamp, subject_ref};
use crate::events::DomainEvent;
use crate::taxonomy::{Identification, TaxonRank};
use crate::Result;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct IdentificationRow {
    pub uri: String,
    pub cid: String,
    pub did: String,
    pub subject_uri: String,
    pub subject_cid: Option<String>,
    pub scientific_name: String,
    pub taxon_rank: Option<TaxonRank>,
    pub is_agreement: bool,
    pub confidence: Option<String>,
    pub identification_remarks: Option<String>,
    pub date_identified: DateTime<Utc>,
}

impl IdentificationRow {
    /// Build a row from a create/update event.
    ///
    /// Requires `subject.uri` and a non-empty `taxonName` (or `scientificName`).
    /// An unrecognised `taxonRank` is kept as `None` and treated as species.
    pub fn from_event(event: &DomainEvent) -> Option<Self> {
        let record = event.record.as_ref()?;
        let (subject_uri, subject_cid) = subject_ref(record)?;

        let scientific_name = event
            .record_str("taxonName")
            .or_else(|| event.record_str("scientificName"))
            .map(str::trim)
            .filter(|s| !s.is_empty())?
            .to_string();

        let taxon_rank = match event.record_str("taxonRank") {
            Some(raw) => match raw.parse::<TaxonRank>() {
                Ok(rank) => Some(rank),
                Err(_) => {
                    debug!(uri = %event.uri, rank = raw, "Unknown taxon rank, treating as species");
                    None
                }
            },
            None => None,
        };

        Some(Self {
            uri: event.uri.clone(),
            cid: event.cid.clone().unwrap_or_default(),
            did: event.did.clone(),
            subject_uri,
            subject_cid,
            scientific_name,
            taxon_rank,
            is_agreement: record
                .get("isAgreement")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            confidence: event.record_str("confidence").map(str::to_string),
            identification_remarks: event.record_str("comment").map(str::to_string),
            date_identified: record_timestamp(event),
        })
    }
}

impl From<IdentificationRow> for Identification {
    fn from(row: IdentificationRow) -> Self {
        Identification {
            uri: row.uri,
            did: row.did,
            subject_uri: row.subject_uri,
            scientific_name: row.scientific_name,
            taxon_rank: row.taxon_rank,
            is_agreement: row.is_agreement,
            date_identified: row.date_identified,
        }
    }
}

pub async fn upsert_identification(pool: &SqlitePool, row: &IdentificationRow) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO identifications (
            uri, cid, did, subject_uri, subject_cid, scientific_name, taxon_rank,
            is_agreement, confidence, identification_remarks, date_identified, indexed_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(uri) DO UPDATE SET
            cid = excluded.cid,
            subject_uri = excluded.subject_uri,
            subject_cid = excluded.subject_cid,
            scientific_name = excluded.scientific_name,
            taxon_rank = excluded.taxon_rank,
            is_agreement = excluded.is_agreement,
            confidence = excluded.confidence,
            identification_remarks = excluded.identification_remarks,
            date_identified = excluded.date_identified,
            indexed_at = excluded.indexed_at
        "#,
    )
    .bind(&row.uri)
    .bind(&row.cid)
    .bind(&row.did)
    .bind(&row.subject_uri)
    .bind(&row.subject_cid)
    .bind(&row.scientific_name)
    .bind(row.taxon_rank.map(|r| r.as_str()))
    .bind(row.is_agreement)
    .bind(&row.confidence)
    .bind(&row.identification_remarks)
    .bind(row.date_identified.to_rfc3339())
    .bind(crate::time::now().to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn delete_identification(pool: &SqlitePool, uri: &str) -> Result<()> {
    sqlx::query("DELETE FROM identifications WHERE uri = ?")
        .bind(uri)
        .execute(pool)
        .await?;
    Ok(())
}

/// Live identifications of an occurrence, oldest first (ties broken by URI)
pub async fn get_identifications_for_occurrence(
    pool: &SqlitePool,
    occurrence_uri: &str,
) -> Result<Vec<IdentificationRow>> {
    let rows = sqlx::query(
        r#"
        SELECT uri, cid, did, subject_uri, subject_cid, scientific_name, taxon_rank,
               is_agreement, confidence, identification_remarks, date_identified
        FROM identifications
        WHERE subject_uri = ?
        ORDER BY date_identified ASC, uri ASC
        "#,
    )
    .bind(occurrence_uri)
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_identification).collect()
}

/// Every distinct identified name, sorted
pub async fn distinct_scientific_names(pool: &SqlitePool) -> Result<Vec<String>> {
    let names: Vec<String> = sqlx::query_scalar(
        "SELECT DISTINCT scientific_name FROM identifications ORDER BY scientific_name",
    )
    .fetch_all(pool)
    .await?;
    Ok(names)
}

pub async fn count_identifications(pool: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM identifications")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

fn row_to_identification(row: &SqliteRow) -> Result<IdentificationRow> {
    let taxon_rank: Option<String> = row.get("taxon_rank");
    let date_identified: String = row.get("date_identified");

    Ok(IdentificationRow {
        uri: row.get("uri"),
        cid: row.get("cid"),
        did: row.get("did"),
        subject_uri: row.get("subject_uri"),
        subject_cid: row.get("subject_cid"),
        scientific_name: row.get("scientific_name"),
        taxon_rank: taxon_rank.and_then(|r| r.parse().ok()),
        is_agreement: row.get("is_agreement"),
        confidence: row.get("confidence"),
        identification_remarks: row.get("identification_remarks"),
        date_identified: parse_stored_timestamp(&date_identified, "date_identified")?,
    })
}
