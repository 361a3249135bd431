//! Schema for the disk-backed vector index.
//!
//! Two tables:
//! - `index_meta`: key/value pairs recording the vector dimensionality and
//!   creation time. A store whose recorded dimension differs from the one
//!   requested is rejected as a schema mismatch.
//! - `vectors`: one row per id; `seq` preserves insertion order for
//!   deterministic tie-breaking.

use anyhow::{bail, Context, Result};
use sqlx::SqlitePool;

/// Create the index schema (idempotent) and check the recorded dimension.
pub async fn create_index_schema(pool: &SqlitePool, dims: usize) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vectors (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            embedding BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    let now = chrono::Utc::now().to_rfc3339();
    sqlx::query("INSERT OR IGNORE INTO index_meta (key, value) VALUES ('dims', ?), ('created_at', ?)")
        .bind(dims.to_string())
        .bind(now)
        .execute(pool)
        .await?;

    let recorded: String = sqlx::query_scalar("SELECT value FROM index_meta WHERE key = 'dims'")
        .fetch_one(pool)
        .await?;
    let recorded: usize = recorded
        .parse()
        .with_context(|| format!("Corrupt index_meta dims value: {}", recorded))?;
    if recorded != dims {
        bail!(
            "Index schema mismatch: store has dims {}, expected {}",
            recorded,
            dims
        );
    }

    Ok(())
}
