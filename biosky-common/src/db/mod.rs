//! SQLite storage for ingested records
//!
//! The ingester writes occurrence, identification and comment rows as firehose
//! events arrive; readers (the community ID calculator among them) query them
//! back. The firehose cursor checkpoint lives here too.

pub mod comments;
pub mod identifications;
pub mod init;
pub mod occurrences;
pub mod state;

use crate::events::{DomainEvent, RecordAction, RecordKind};
use crate::taxonomy::{Identification, IdentificationStore};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::path::Path;

pub use comments::CommentRow;
pub use identifications::IdentificationRow;
pub use init::init_database;
pub use occurrences::OccurrenceRow;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordCounts {
    pub occurrences: i64,
    pub identifications: i64,
    pub comments: i64,
}

/// Handle over the BioSky database pool
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database file and apply the schema
    pub async fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(init_database(path).await?))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Persist one firehose event: upsert on create/update, remove on delete.
    ///
    /// Returns `false` when a create/update record lacks required fields and was
    /// skipped.
    pub async fn apply_event(&self, event: &DomainEvent) -> Result<bool> {
        if event.action == RecordAction::Delete {
            match event.kind {
                RecordKind::Occurrence => {
                    occurrences::delete_occurrence(&self.pool, &event.uri).await?
                }
                RecordKind::Identification => {
                    identifications::delete_identification(&self.pool, &event.uri).await?
                }
                RecordKind::Comment => comments::delete_comment(&self.pool, &event.uri).await?,
            };
            return Ok(true);
        }

        match event.kind {
            RecordKind::Occurrence => match OccurrenceRow::from_event(event) {
                Some(row) => occurrences::upsert_occurrence(&self.pool, &row).await?,
                None => return Ok(false),
            },
            RecordKind::Identification => match IdentificationRow::from_event(event) {
                Some(row) => identifications::upsert_identification(&self.pool, &row).await?,
                None => return Ok(false),
            },
            RecordKind::Comment => match CommentRow::from_event(event) {
                Some(row) => comments::upsert_comment(&self.pool, &row).await?,
                None => return Ok(false),
            },
        }
        Ok(true)
    }

    pub async fn load_cursor(&self) -> Result<Option<i64>> {
        state::load_cursor(&self.pool).await
    }

    pub async fn save_cursor(&self, cursor: i64) -> Result<()> {
        state::save_cursor(&self.pool, cursor).await
    }

    /// Names to seed the taxonomic hierarchy with
    pub async fn identified_names(&self) -> Result<Vec<String>> {
        identifications::distinct_scientific_names(&self.pool).await
    }

    /// Row counts per record table
    pub async fn record_counts(&self) -> Result<RecordCounts> {
        Ok(RecordCounts {
            occurrences: occurrences::count_occurrences(&self.pool).await?,
            identifications: identifications::count_identifications(&self.pool).await?,
            comments: comments::count_comments(&self.pool).await?,
        })
    }
}

#[async_trait]
impl IdentificationStore for Database {
    async fn get_identifications_for_occurrence(
        &self,
        occurrence_uri: &str,
    ) -> Result<Vec<Identification>> {
        let rows =
            identifications::get_identifications_for_occurrence(&self.pool, occurrence_uri)
                .await?;
        Ok(rows.into_iter().map(Identification::from).collect())
    }
}

pub(crate) fn parse_stored_timestamp(value: &str, column: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", column, e)))
}

/// `subject.uri` / `subject.cid` of a record that references another record
pub(crate) fn subject_ref(record: &serde_json::Value) -> Option<(String, Option<String>)> {
    let subject = record.get("subject")?;
    let uri = subject.get("uri")?.as_str()?.to_string();
    let cid = subject.get("cid").and_then(|c| c.as_str()).map(str::to_string);
    Some((uri, cid))
}

/// Record `createdAt`, else the commit time, else now
pub(crate) fn record_timestamp(event: &DomainEvent) -> DateTime<Utc> {
    event
        .record_str("createdAt")
        .and_then(crate::time::parse_timestamp)
        .or_else(|| crate::time::parse_timestamp(&event.time))
        .unwrap_or_else(crate::time::now)
}
