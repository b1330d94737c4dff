//! Occurrence record storage

use super::{parse_stored_timestamp, record_timestamp};
use crate::events::DomainEvent;
use crate::Result;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{Row, SqlitePool};

/// Flattened occurrence row
#[derive(Debug, Clone, PartialEq)]
pub struct OccurrenceRow {
    pub uri: String,
    pub cid: String,
    pub did: String,
    pub scientific_name: Option<String>,
    pub event_date: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub verbatim_locality: Option<String>,
    pub record: Value,
    pub created_at: DateTime<Utc>,
}

impl OccurrenceRow {
    /// Build a row from a create/update event. `None` if the event carries no record.
    pub fn from_event(event: &DomainEvent) -> Option<Self> {
        let record = event.record.as_ref()?;
        // Coordinates may sit under `location` or at the top level
        let location = record.get("location").unwrap_or(record);

        Some(Self {
            uri: event.uri.clone(),
            cid: event.cid.clone().unwrap_or_default(),
            did: event.did.clone(),
            scientific_name: string_field(record, "scientificName"),
            event_date: string_field(record, "eventDate"),
            latitude: coordinate(location, "decimalLatitude"),
            longitude: coordinate(location, "decimalLongitude"),
            verbatim_locality: string_field(record, "verbatimLocality")
                .or_else(|| string_field(location, "verbatimLocality")),
            record: record.clone(),
            created_at: record_timestamp(event),
        })
    }
}

fn string_field(value: &Value, field: &str) -> Option<String> {
    value
        .get(field)?
        .as_str()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// DAG-CBOR has no floats in records, so coordinates usually arrive as strings
fn coordinate(value: &Value, field: &str) -> Option<f64> {
    match value.get(field)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub async fn upsert_occurrence(pool: &SqlitePool, row: &OccurrenceRow) -> Result<()> {
    let record = row.record.to_string();

    sqlx::query(
        r#"
        INSERT INTO occurrences (
            uri, cid, did, scientific_name, event_date, latitude, longitude,
            verbatim_locality, record, created_at, indexed_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(uri) DO UPDATE SET
            cid = excluded.cid,
            scientific_name = excluded.scientific_name,
            event_date = excluded.event_date,
            latitude = excluded.latitude,
            longitude = excluded.longitude,
            verbatim_locality = excluded.verbatim_locality,
            record = excluded.record,
            indexed_at = excluded.indexed_at
        "#,
    )
    .bind(&row.uri)
    .bind(&row.cid)
    .bind(&row.did)
    .bind(&row.scientific_name)
    .bind(&row.event_date)
    .bind(row.latitude)
    .bind(row.longitude)
    .bind(&row.verbatim_locality)
    .bind(&record)
    .bind(row.created_at.to_rfc3339())
    .bind(crate::time::now().to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn delete_occurrence(pool: &SqlitePool, uri: &str) -> Result<()> {
    sqlx::query("DELETE FROM occurrences WHERE uri = ?")
        .bind(uri)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn get_occurrence(pool: &SqlitePool, uri: &str) -> Result<Option<OccurrenceRow>> {
    let row = sqlx::query(
        r#"
        SELECT uri, cid, did, scientific_name, event_date, latitude, longitude,
               verbatim_locality, record, created_at
        FROM occurrences
        WHERE uri = ?
        "#,
    )
    .bind(uri)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let record: String = row.get("record");
    let record = serde_json::from_str(&record).map_err(|e| {
        crate::Error::Internal(format!("Failed to deserialize occurrence record: {}", e))
    })?;
    let created_at: String = row.get("created_at");

    Ok(Some(OccurrenceRow {
        uri: row.get("uri"),
        cid: row.get("cid"),
        did: row.get("did"),
        scientific_name: row.get("scientific_name"),
        event_date: row.get("event_date"),
        latitude: row.get("latitude"),
        longitude: row.get("longitude"),
        verbatim_locality: row.get("verbatim_locality"),
        record,
        created_at: parse_stored_timestamp(&created_at, "created_at")?,
    }))
}

pub async fn count_occurrences(pool: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM occurrences")
        .fetch_one(pool)
        .await?;
    Ok(count)
}
