//! SQLite-backed implementation of the storage traits.
//!
//! Maps [`KnowledgeStore`], [`UsageStore`] and [`SettingsStore`] onto the
//! `knowledge_documents`, `api_usage_logs` and `system_settings` tables
//! created by [`crate::migrate`].

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use unai_core::embedding::{blob_to_vec, rank_by_similarity, vec_to_blob};
use unai_core::keys::{from_ledger_index, ProviderTag};
use unai_core::models::KnowledgeDocument;
use unai_core::quota::QuotaSnapshot;
use unai_core::store::{KnowledgeStore, SearchField, SettingsStore, UsageStore};

use crate::config::Config;
use crate::{db, migrate};

const DOCUMENT_COLUMNS: &str = "category, subcategory, symptom_description, possible_causes, \
     solution, observation, initial_check, responsible_party, sheet_source, search_keywords, embedding";

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the configured database and make sure the schema exists.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn row_to_document(row: &SqliteRow) -> KnowledgeDocument {
    let blob: Option<Vec<u8>> = row.get("embedding");
    KnowledgeDocument {
        category: row.get("category"),
        subcategory: row.get("subcategory"),
        symptom_description: row.get("symptom_description"),
        possible_causes: row.get("possible_causes"),
        solution: row.get("solution"),
        observation: row.get("observation"),
        initial_check: row.get("initial_check"),
        responsible_party: row.get("responsible_party"),
        sheet_source: row.get("sheet_source"),
        search_keywords: row.get("search_keywords"),
        embedding: blob.filter(|b| !b.is_empty()).map(|b| blob_to_vec(&b)),
    }
}

fn row_to_snapshot(row: &SqliteRow) -> Result<QuotaSnapshot> {
    let key_index: i64 = row.get("key_index");
    let provider_name: String = row.get("provider");
    // Rows written before the provider column was normalised fall back to
    // the ledger index convention.
    let provider = provider_name
        .parse::<ProviderTag>()
        .ok()
        .or_else(|| from_ledger_index(key_index).map(|(p, _)| p))
        .ok_or_else(|| anyhow!("unknown provider '{}' in usage log", provider_name))?;
    let created_at: i64 = row.get("created_at");
    let timestamp = DateTime::<Utc>::from_timestamp_millis(created_at)
        .ok_or_else(|| anyhow!("invalid usage log timestamp {}", created_at))?;
    let succeeded: i64 = row.get("succeeded");
    Ok(QuotaSnapshot {
        provider,
        key_index,
        requests_remaining: row.get("requests_remaining"),
        requests_limit: row.get("requests_limit"),
        tokens_remaining: row.get("tokens_remaining"),
        tokens_limit: row.get("tokens_limit"),
        reset_time: row.get("reset_time"),
        succeeded: succeeded != 0,
        timestamp,
    })
}

#[async_trait]
impl KnowledgeStore for SqliteStore {
    async fn similarity_search(
        &self,
        query_embedding: &[f32],
        similarity_threshold: f32,
        max_results: usize,
    ) -> Result<Vec<KnowledgeDocument>> {
        let sql = format!(
            "SELECT {} FROM knowledge_documents WHERE embedding IS NOT NULL ORDER BY rowid",
            DOCUMENT_COLUMNS
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        let candidates = rows.iter().map(|row| {
            let doc = row_to_document(row);
            let embedding = doc.embedding.clone();
            (doc, embedding)
        });
        Ok(
            rank_by_similarity(query_embedding, candidates, similarity_threshold, max_results)
                .into_iter()
                .map(|(doc, _)| doc)
                .collect(),
        )
    }

    async fn keyword_search(
        &self,
        field: SearchField,
        pattern: &str,
        result_cap: usize,
    ) -> Result<Vec<KnowledgeDocument>> {
        let needle = pattern.trim();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        // instr() keeps the match literal; LIKE would treat % and _ as wildcards.
        let sql = format!(
            "SELECT {} FROM knowledge_documents WHERE instr(lower({}), lower(?)) > 0 ORDER BY rowid LIMIT ?",
            DOCUMENT_COLUMNS,
            field.column()
        );
        let rows = sqlx::query(&sql)
            .bind(needle)
            .bind(result_cap as i64)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_document).collect())
    }

    async fn has_document(&self, dedup_hash: &str) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT COUNT(*) > 0 FROM knowledge_documents WHERE dedup_hash = ?")
                .bind(dedup_hash)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn insert_documents(&self, docs: &[KnowledgeDocument]) -> Result<usize> {
        let now = Utc::now().timestamp_millis();
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for doc in docs {
            let blob = doc.embedding.as_deref().map(vec_to_blob);
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO knowledge_documents (
                    id, category, subcategory, symptom_description, possible_causes,
                    solution, observation, initial_check, responsible_party,
                    sheet_source, search_keywords, embedding, dedup_hash, created_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(&doc.category)
            .bind(&doc.subcategory)
            .bind(&doc.symptom_description)
            .bind(&doc.possible_causes)
            .bind(&doc.solution)
            .bind(&doc.observation)
            .bind(&doc.initial_check)
            .bind(&doc.responsible_party)
            .bind(&doc.sheet_source)
            .bind(&doc.search_keywords)
            .bind(blob)
            .bind(doc.dedup_hash())
            .bind(now)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected() as usize;
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn clear_documents(&self, sheet_source: Option<&str>) -> Result<u64> {
        let result = match sheet_source {
            Some(src) => {
                sqlx::query("DELETE FROM knowledge_documents WHERE sheet_source = ?")
                    .bind(src)
                    .execute(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("DELETE FROM knowledge_documents")
                    .execute(&self.pool)
                    .await?
            }
        };
        Ok(result.rows_affected())
    }

    async fn count_documents(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM knowledge_documents")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl UsageStore for SqliteStore {
    async fn latest_snapshot(&self, key_index: i64) -> Result<Option<QuotaSnapshot>> {
        let row = sqlx::query(
            r#"
            SELECT provider, key_index, requests_remaining, requests_limit,
                   tokens_remaining, tokens_limit, reset_time, succeeded, created_at
            FROM api_usage_logs
            WHERE key_index = ?
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(key_index)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_snapshot).transpose()
    }

    async fn append_snapshot(&self, snapshot: &QuotaSnapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO api_usage_logs (
                provider, key_index, requests_remaining, requests_limit,
                tokens_remaining, tokens_limit, reset_time, succeeded, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(snapshot.provider.as_str())
        .bind(snapshot.key_index)
        .bind(snapshot.requests_remaining)
        .bind(snapshot.requests_limit)
        .bind(snapshot.tokens_remaining)
        .bind(snapshot.tokens_limit)
        .bind(&snapshot.reset_time)
        .bind(snapshot.succeeded as i64)
        .bind(snapshot.timestamp.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl SettingsStore for SqliteStore {
    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM system_settings WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(value)
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO system_settings (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use chrono::TimeZone;
    use tempfile::TempDir;

    async fn temp_store() -> (TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let text = format!(
            "[db]\npath = \"{}\"\n\n[server]\nbind = \"127.0.0.1:0\"\n",
            dir.path().join("unai.sqlite").display()
        );
        let config = parse_config(&text).unwrap();
        let store = SqliteStore::open(&config).await.unwrap();
        (dir, store)
    }

    fn doc(category: &str, symptom: &str, embedding: Option<Vec<f32>>) -> KnowledgeDocument {
        KnowledgeDocument {
            category: category.to_string(),
            symptom_description: symptom.to_string(),
            solution: "restart".to_string(),
            sheet_source: "admin_upload".to_string(),
            embedding,
            ..Default::default()
        }
        .normalized()
    }

    #[tokio::test]
    async fn test_insert_and_similarity_search() {
        let (_dir, store) = temp_store().await;
        let inserted = store
            .insert_documents(&[
                doc("RFID", "Tag ไม่ขึ้น UI", Some(vec![1.0, 0.0, 0.0])),
                doc("Printer", "Paper jam", Some(vec![0.0, 1.0, 0.0])),
                doc("Network", "No link", None),
            ])
            .await
            .unwrap();
        assert_eq!(inserted, 3);

        let hits = store
            .similarity_search(&[0.9, 0.1, 0.0], 0.5, 5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].category, "RFID");
        assert_eq!(hits[0].embedding.as_deref(), Some(&[1.0f32, 0.0, 0.0][..]));
    }

    #[tokio::test]
    async fn test_duplicates_ignored() {
        let (_dir, store) = temp_store().await;
        let a = doc("RFID", "Tag ไม่ขึ้น UI", None);
        assert_eq!(store.insert_documents(&[a.clone()]).await.unwrap(), 1);
        assert_eq!(store.insert_documents(&[a.clone()]).await.unwrap(), 0);
        assert!(store.has_document(&a.dedup_hash()).await.unwrap());
        assert_eq!(store.count_documents().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_keyword_search_is_literal() {
        let (_dir, store) = temp_store().await;
        store
            .insert_documents(&[
                doc("RFID", "Tag ไม่ขึ้น UI", None),
                doc("Printer", "100% toner", None),
            ])
            .await
            .unwrap();

        let hits = store
            .keyword_search(SearchField::SearchKeywords, "tag ไม่ขึ้น", 3)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].category, "RFID");

        let wildcard = store
            .keyword_search(SearchField::SearchKeywords, "%", 3)
            .await
            .unwrap();
        assert_eq!(wildcard.len(), 1);
        assert_eq!(wildcard[0].category, "Printer");
    }

    #[tokio::test]
    async fn test_clear_by_source() {
        let (_dir, store) = temp_store().await;
        let mut sheet = doc("A", "one", None);
        sheet.sheet_source = "google_sheets".to_string();
        store
            .insert_documents(&[sheet, doc("B", "two", None)])
            .await
            .unwrap();
        assert_eq!(store.clear_documents(Some("google_sheets")).await.unwrap(), 1);
        assert_eq!(store.count_documents().await.unwrap(), 1);
        assert_eq!(store.clear_documents(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_latest_snapshot() {
        let (_dir, store) = temp_store().await;
        let base = QuotaSnapshot {
            provider: ProviderTag::Gemini,
            key_index: 11,
            requests_remaining: Some(1499),
            requests_limit: Some(1500),
            tokens_remaining: None,
            tokens_limit: None,
            reset_time: Some("3h0m".to_string()),
            succeeded: true,
            timestamp: Utc.with_ymd_and_hms(2026, 3, 2, 5, 0, 0).unwrap(),
        };
        let later = QuotaSnapshot {
            requests_remaining: Some(1498),
            timestamp: Utc.with_ymd_and_hms(2026, 3, 2, 5, 1, 0).unwrap(),
            ..base.clone()
        };
        store.append_snapshot(&later).await.unwrap();
        store.append_snapshot(&base).await.unwrap();

        let latest = store.latest_snapshot(11).await.unwrap().unwrap();
        assert_eq!(latest, later);
        assert!(store.latest_snapshot(12).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_settings_upsert() {
        let (_dir, store) = temp_store().await;
        assert_eq!(store.get_setting("ai_provider").await.unwrap(), None);
        store.set_setting("ai_provider", "gemini").await.unwrap();
        store.set_setting("ai_provider", "groq").await.unwrap();
        assert_eq!(
            store.get_setting("ai_provider").await.unwrap().as_deref(),
            Some("groq")
        );
    }
}
