use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index. Idempotent.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS knowledge_documents (
            id TEXT PRIMARY KEY,
            category TEXT NOT NULL DEFAULT '',
            subcategory TEXT NOT NULL DEFAULT '',
            symptom_description TEXT NOT NULL DEFAULT '',
            possible_causes TEXT NOT NULL DEFAULT '',
            solution TEXT NOT NULL DEFAULT '',
            observation TEXT NOT NULL DEFAULT '',
            initial_check TEXT NOT NULL DEFAULT '',
            responsible_party TEXT NOT NULL DEFAULT '',
            sheet_source TEXT NOT NULL DEFAULT '',
            search_keywords TEXT NOT NULL DEFAULT '',
            embedding BLOB,
            dedup_hash TEXT NOT NULL UNIQUE,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS api_usage_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            provider TEXT NOT NULL,
            key_index INTEGER NOT NULL,
            requests_remaining INTEGER,
            requests_limit INTEGER,
            tokens_remaining INTEGER,
            tokens_limit INTEGER,
            reset_time TEXT,
            succeeded INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS system_settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_usage_key_created ON api_usage_logs(key_index, created_at DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_documents_source ON knowledge_documents(sheet_source)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
