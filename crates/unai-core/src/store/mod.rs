//! Storage abstraction for UNAi.
//!
//! Three narrow traits cover everything the chat path and the admin
//! commands need from persistence:
//!
//! | Trait | Purpose |
//! |-------|---------|
//! | [`KnowledgeStore`] | Troubleshooting documents: similarity and keyword search, import, clear |
//! | [`UsageStore`] | Append-only quota snapshots per ledger key index |
//! | [`SettingsStore`] | Small key/value settings such as the active chat provider |
//!
//! Implementations must be `Send + Sync`; the SQLite backend lives in the
//! app crate and [`memory::InMemoryStore`] implements all three for tests.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::KnowledgeDocument;
use crate::quota::QuotaSnapshot;

/// Settings key holding the active generation provider.
pub const AI_PROVIDER_SETTING: &str = "ai_provider";

/// Column a keyword search matches against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchField {
    /// Category, subcategory and symptom joined at import time.
    SearchKeywords,
    Category,
    Subcategory,
    SymptomDescription,
}

impl SearchField {
    pub fn column(&self) -> &'static str {
        match self {
            SearchField::SearchKeywords => "search_keywords",
            SearchField::Category => "category",
            SearchField::Subcategory => "subcategory",
            SearchField::SymptomDescription => "symptom_description",
        }
    }

    pub fn value<'a>(&self, doc: &'a KnowledgeDocument) -> &'a str {
        match self {
            SearchField::SearchKeywords => &doc.search_keywords,
            SearchField::Category => &doc.category,
            SearchField::Subcategory => &doc.subcategory,
            SearchField::SymptomDescription => &doc.symptom_description,
        }
    }
}

/// Troubleshooting document storage and search.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Documents whose embedding has cosine similarity of at least
    /// `similarity_threshold` with `query_embedding`, most similar first,
    /// at most `max_results`.
    async fn similarity_search(
        &self,
        query_embedding: &[f32],
        similarity_threshold: f32,
        max_results: usize,
    ) -> Result<Vec<KnowledgeDocument>>;

    /// Documents whose `field` contains `pattern` literally (case-insensitive),
    /// at most `result_cap`. An empty pattern matches nothing.
    async fn keyword_search(
        &self,
        field: SearchField,
        pattern: &str,
        result_cap: usize,
    ) -> Result<Vec<KnowledgeDocument>>;

    /// Whether a document with this dedup hash is already stored.
    async fn has_document(&self, dedup_hash: &str) -> Result<bool>;

    /// Insert documents, skipping any whose dedup hash is already stored.
    /// Returns the number inserted.
    async fn insert_documents(&self, docs: &[KnowledgeDocument]) -> Result<usize>;

    /// Delete every document, or only those from one `sheet_source`.
    /// Returns the number deleted.
    async fn clear_documents(&self, sheet_source: Option<&str>) -> Result<u64>;

    async fn count_documents(&self) -> Result<i64>;
}

/// Append-only quota snapshot log.
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// The most recent snapshot for a ledger key index, by timestamp.
    async fn latest_snapshot(&self, key_index: i64) -> Result<Option<QuotaSnapshot>>;

    async fn append_snapshot(&self, snapshot: &QuotaSnapshot) -> Result<()>;
}

/// Key/value settings.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get_setting(&self, key: &str) -> Result<Option<String>>;

    async fn set_setting(&self, key: &str, value: &str) -> Result<()>;
}
