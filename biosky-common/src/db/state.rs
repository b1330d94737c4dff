//! Ingester key/value state (firehose cursor checkpoint)

use crate::{Error, Result};
use sqlx::SqlitePool;

const CURSOR_KEY: &str = "firehose_cursor";

/// Last checkpointed firehose cursor, if any
pub async fn load_cursor(pool: &SqlitePool) -> Result<Option<i64>> {
    let value: Option<String> =
        sqlx::query_scalar("SELECT value FROM ingester_state WHERE key = ?")
            .bind(CURSOR_KEY)
            .fetch_optional(pool)
            .await?;

    value
        .map(|v| {
            v.parse::<i64>()
                .map_err(|e| Error::Internal(format!("Stored cursor '{}' is invalid: {}", v, e)))
        })
        .transpose()
}

/// Checkpoint the firehose cursor. Never moves a stored cursor backwards.
pub async fn save_cursor(pool: &SqlitePool, cursor: i64) -> Result<()> {
    if let Some(stored) = load_cursor(pool).await? {
        if stored >= cursor {
            return Ok(());
        }
    }

    sqlx::query(
        r#"
        INSERT INTO ingester_state (key, value, updated_at)
        VALUES (?, ?, ?)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
        "#,
    )
    .bind(CURSOR_KEY)
    .bind(cursor.to_string())
    .bind(crate::time::now().to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}
