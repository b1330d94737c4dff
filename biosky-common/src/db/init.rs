//! Database initialization
//!
//! Opens (creating if needed) the SQLite database and applies the schema. All
//! statements are idempotent, so this runs on every start.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // WAL lets API readers run while the ingester writes
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    create_schema(&pool).await?;
    Ok(pool)
}

/// Create all BioSky tables and indexes
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_occurrences_table(pool).await?;
    create_identifications_table(pool).await?;
    create_comments_table(pool).await?;
    create_ingester_state_table(pool).await?;
    Ok(())
}

async fn create_occurrences_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS occurrences (
            uri TEXT PRIMARY KEY,
            cid TEXT NOT NULL,
            did TEXT NOT NULL,
            scientific_name TEXT,
            event_date TEXT,
            latitude REAL,
            longitude REAL,
            verbatim_locality TEXT,
            record TEXT NOT NULL,
            created_at TEXT NOT NULL,
            indexed_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_occurrences_did ON occurrences(did)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_identifications_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS identifications (
            uri TEXT PRIMARY KEY,
            cid TEXT NOT NULL,
            did TEXT NOT NULL,
            subject_uri TEXT NOT NULL,
            subject_cid TEXT,
            scientific_name TEXT NOT NULL,
            taxon_rank TEXT,
            is_agreement INTEGER NOT NULL DEFAULT 0,
            confidence TEXT,
            identification_remarks TEXT,
            date_identified TEXT NOT NULL,
            indexed_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_identifications_subject ON identifications(subject_uri)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_comments_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS comments (
            uri TEXT PRIMARY KEY,
            cid TEXT NOT NULL,
            did TEXT NOT NULL,
            subject_uri TEXT NOT NULL,
            body TEXT NOT NULL,
            created_at TEXT NOT NULL,
            indexed_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_comments_subject ON comments(subject_uri)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_ingester_state_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingester_state (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
