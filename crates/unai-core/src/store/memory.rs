//! In-memory store implementing [`KnowledgeStore`], [`UsageStore`] and
//! [`SettingsStore`].
//!
//! Uses `Vec` and `HashMap` behind `std::sync::RwLock`. Similarity search is
//! brute-force cosine over every stored embedding; keyword search is a
//! case-insensitive substring match in insertion order.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::embedding::rank_by_similarity;
use crate::models::KnowledgeDocument;
use crate::quota::QuotaSnapshot;

use super::{KnowledgeStore, SearchField, SettingsStore, UsageStore};

/// In-memory store for tests and embedded use.
#[derive(Default)]
pub struct InMemoryStore {
    docs: RwLock<Vec<(String, KnowledgeDocument)>>,
    snapshots: RwLock<Vec<QuotaSnapshot>>,
    settings: RwLock<HashMap<String, String>>,
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-populated with documents (duplicates skipped).
    pub fn with_documents(docs: Vec<KnowledgeDocument>) -> Self {
        let store = Self::new();
        if let Ok(mut stored) = store.docs.write() {
            for doc in docs {
                let hash = doc.dedup_hash();
                if !stored.iter().any(|(h, _)| *h == hash) {
                    stored.push((hash, doc));
                }
            }
        }
        store
    }

    /// Every snapshot appended so far, in append order.
    pub fn snapshots(&self) -> Result<Vec<QuotaSnapshot>> {
        Ok(read(&self.snapshots)?.clone())
    }
}

#[async_trait]
impl KnowledgeStore for InMemoryStore {
    async fn similarity_search(
        &self,
        query_embedding: &[f32],
        similarity_threshold: f32,
        max_results: usize,
    ) -> Result<Vec<KnowledgeDocument>> {
        let docs = read(&self.docs)?;
        let candidates = docs.iter().map(|(_, d)| (d, d.embedding.clone()));
        Ok(
            rank_by_similarity(query_embedding, candidates, similarity_threshold, max_results)
                .into_iter()
                .map(|(d, _)| d.clone())
                .collect(),
        )
    }

    async fn keyword_search(
        &self,
        field: SearchField,
        pattern: &str,
        result_cap: usize,
    ) -> Result<Vec<KnowledgeDocument>> {
        let needle = pattern.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        let docs = read(&self.docs)?;
        Ok(docs
            .iter()
            .map(|(_, d)| d)
            .filter(|d| field.value(d).to_lowercase().contains(&needle))
            .take(result_cap)
            .cloned()
            .collect())
    }

    async fn has_document(&self, dedup_hash: &str) -> Result<bool> {
        Ok(read(&self.docs)?.iter().any(|(h, _)| h == dedup_hash))
    }

    async fn insert_documents(&self, docs: &[KnowledgeDocument]) -> Result<usize> {
        let mut stored = write(&self.docs)?;
        let mut inserted = 0;
        for doc in docs {
            let hash = doc.dedup_hash();
            if stored.iter().any(|(h, _)| *h == hash) {
                continue;
            }
            stored.push((hash, doc.clone()));
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn clear_documents(&self, sheet_source: Option<&str>) -> Result<u64> {
        let mut stored = write(&self.docs)?;
        let before = stored.len();
        match sheet_source {
            Some(src) => stored.retain(|(_, d)| d.sheet_source != src),
            None => stored.clear(),
        }
        Ok((before - stored.len()) as u64)
    }

    async fn count_documents(&self) -> Result<i64> {
        Ok(read(&self.docs)?.len() as i64)
    }
}

#[async_trait]
impl UsageStore for InMemoryStore {
    async fn latest_snapshot(&self, key_index: i64) -> Result<Option<QuotaSnapshot>> {
        let snapshots = read(&self.snapshots)?;
        // Later appends win ties on equal timestamps.
        let latest = snapshots
            .iter()
            .filter(|s| s.key_index == key_index)
            .fold(None::<&QuotaSnapshot>, |best, s| match best {
                Some(b) if b.timestamp > s.timestamp => Some(b),
                _ => Some(s),
            });
        Ok(latest.cloned())
    }

    async fn append_snapshot(&self, snapshot: &QuotaSnapshot) -> Result<()> {
        write(&self.snapshots)?.push(snapshot.clone());
        Ok(())
    }
}

#[async_trait]
impl SettingsStore for InMemoryStore {
    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        Ok(read(&self.settings)?.get(key).cloned())
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        write(&self.settings)?.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
