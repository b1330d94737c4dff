//! Comment record storage

use super::{parse_stored_timestamp, record_timestamp, subject_ref};
use crate::events::DomainEvent;
use crate::Result;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

#[derive(Debug, Clone, PartialEq)]
pub struct CommentRow {
    pub uri: String,
    pub cid: String,
    pub did: String,
    pub subject_uri: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl CommentRow {
    /// Build a row from a create/update event; needs `subject.uri` and a `body` (or `text`)
    pub fn from_event(event: &DomainEvent) -> Option<Self> {
        let record = event.record.as_ref()?;
        let (subject_uri, _) = subject_ref(record)?;
        let body = event
            .record_str("body")
            .or_else(|| event.record_str("text"))?
            .to_string();

        Some(Self {
            uri: event.uri.clone(),
            cid: event.cid.clone().unwrap_or_default(),
            did: event.did.clone(),
            subject_uri,
            body,
            created_at: record_timestamp(event),
        })
    }
}

pub async fn upsert_comment(pool: &SqlitePool, row: &CommentRow) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO comments (uri, cid, did, subject_uri, body, created_at, indexed_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(uri) DO UPDATE SET
            cid = excluded.cid,
            subject_uri = excluded.subject_uri,
            body = excluded.body,
            indexed_at = excluded.indexed_at
        "#,
    )
    .bind(&row.uri)
    .bind(&row.cid)
    .bind(&row.did)
    .bind(&row.subject_uri)
    .bind(&row.body)
    .bind(row.created_at.to_rfc3339())
    .bind(crate::time::now().to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn delete_comment(pool: &SqlitePool, uri: &str) -> Result<()> {
    sqlx::query("DELETE FROM comments WHERE uri = ?")
        .bind(uri)
        .execute(pool)
        .await?;
    Ok(())
}

/// Comments on a record, oldest first
pub async fn get_comments_for_subject(
    pool: &SqlitePool,
    subject_uri: &str,
) -> Result<Vec<CommentRow>> {
    let rows = sqlx::query(
        r#"
        SELECT uri, cid, did, subject_uri, body, created_at
        FROM comments
        WHERE subject_uri = ?
        ORDER BY created_at ASC, uri ASC
        "#,
    )
    .bind(subject_uri)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let created_at: String = row.get("created_at");
            Ok(CommentRow {
                uri: row.get("uri"),
                cid: row.get("cid"),
                did: row.get("did"),
                subject_uri: row.get("subject_uri"),
                body: row.get("body"),
                created_at: parse_stored_timestamp(&created_at, "created_at")?,
            })
        })
        .collect()
}

pub async fn count_comments(pool: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM comments")
        .fetch_one(pool)
        .await?;
    Ok(count)
}
