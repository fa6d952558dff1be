use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Apply the schema to the pool. Idempotent; also used by tests against a
/// fresh in-memory database.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    // One row per (event, view). The composite primary key is what makes
    // writes insert-if-absent: duplicates conflict and are dropped.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vector_events (
            event_id TEXT NOT NULL,
            view TEXT NOT NULL,
            user_id TEXT NOT NULL,
            event_type TEXT NOT NULL,
            domain TEXT NOT NULL,
            timestamp_ms INTEGER NOT NULL,
            privacy_scope TEXT NOT NULL,
            dedupe_key TEXT NOT NULL,
            vector BLOB NOT NULL,
            embedded_text TEXT NOT NULL,
            model TEXT NOT NULL,
            dimensions INTEGER NOT NULL,
            generated_at TEXT NOT NULL,
            PRIMARY KEY (event_id, view)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_vector_events_user_type \
         ON vector_events(user_id, event_type)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_vector_events_domain ON vector_events(domain)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_vector_events_timestamp \
         ON vector_events(timestamp_ms DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_vector_events_dedupe ON vector_events(dedupe_key)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}
