//! Context retrieval for a chat query.
//!
//! Embeds the query and runs a similarity search; when that yields nothing
//! it falls back to a literal keyword search. Every failure along the way
//! (missing key, transport error, timeout, store error) is logged and
//! degrades to the next path. Retrieval never fails the request.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use unai_core::context::build_context;
use unai_core::keys::{select_key, CredentialSlot, KeySet};
use unai_core::models::KnowledgeDocument;
use unai_core::store::{KnowledgeStore, SearchField};

use crate::config::RetrievalConfig;
use crate::ledger::{UsageEvent, UsageRecorder};
use crate::provider::LlmProvider;

/// Which path produced the context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalPath {
    Similarity,
    Keyword,
    Empty,
}

#[derive(Debug, Clone)]
pub struct Retrieved {
    /// Formatted context block, `""` when nothing matched.
    pub context: String,
    pub documents: Vec<KnowledgeDocument>,
    pub path: RetrievalPath,
}

impl Retrieved {
    fn from_documents(documents: Vec<KnowledgeDocument>, path: RetrievalPath) -> Self {
        Self {
            context: build_context(&documents),
            documents,
            path,
        }
    }

    fn empty() -> Self {
        Self {
            context: String::new(),
            documents: Vec::new(),
            path: RetrievalPath::Empty,
        }
    }
}

/// Embedding provider plus the keys it may use.
pub struct Embedder {
    pub provider: Arc<dyn LlmProvider>,
    pub keys: KeySet,
}

pub struct RetrievalStage {
    store: Arc<dyn KnowledgeStore>,
    embedder: Option<Embedder>,
    recorder: UsageRecorder,
    settings: RetrievalConfig,
    timeout: Duration,
    rng: Mutex<StdRng>,
}

impl RetrievalStage {
    pub fn new(
        store: Arc<dyn KnowledgeStore>,
        embedder: Option<Embedder>,
        recorder: UsageRecorder,
        settings: RetrievalConfig,
        timeout: Duration,
    ) -> Self {
        let embedder = embedder.filter(|e| !e.keys.is_empty());
        Self {
            store,
            embedder,
            recorder,
            settings,
            timeout,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub async fn retrieve(&self, query: &str) -> Retrieved {
        if let Some(embedding) = self.embed_query(query).await {
            match self
                .bounded(self.store.similarity_search(
                    &embedding,
                    self.settings.similarity_threshold,
                    self.settings.match_count,
                ))
                .await
            {
                Some(Ok(docs)) if !docs.is_empty() => {
                    info!(documents = docs.len(), "Retrieved context by similarity");
                    return Retrieved::from_documents(docs, RetrievalPath::Similarity);
                }
                Some(Ok(_)) => debug!("Similarity search found no documents above threshold"),
                Some(Err(e)) => warn!(error = %e, "Similarity search failed"),
                None => warn!("Similarity search timed out"),
            }
        }

        match self
            .bounded(self.store.keyword_search(
                SearchField::SearchKeywords,
                query,
                self.settings.keyword_limit,
            ))
            .await
        {
            Some(Ok(docs)) if !docs.is_empty() => {
                info!(documents = docs.len(), "Retrieved context by keyword");
                Retrieved::from_documents(docs, RetrievalPath::Keyword)
            }
            Some(Ok(_)) => {
                info!("No matching documents; answering without context");
                Retrieved::empty()
            }
            Some(Err(e)) => {
                warn!(error = %e, "Keyword search failed");
                Retrieved::empty()
            }
            None => {
                warn!("Keyword search timed out");
                Retrieved::empty()
            }
        }
    }

    async fn embed_query(&self, query: &str) -> Option<Vec<f32>> {
        let embedder = self.embedder.as_ref()?;
        let slot = self.pick(&embedder.keys)?;

        let result = self.bounded(embedder.provider.embed(slot.secret(), query)).await;
        let embedding = match result {
            Some(Ok(values)) => Some(values),
            Some(Err(e)) => {
                warn!(kind = %e.kind(), key = slot.key_suffix(), error = %e, "Query embedding failed");
                None
            }
            None => {
                warn!(key = slot.key_suffix(), "Query embedding timed out");
                None
            }
        };
        self.recorder.record(UsageEvent::new(
            slot.provider,
            slot.ledger_index(),
            embedding.is_some(),
        ));
        embedding
    }

    fn pick(&self, keys: &KeySet) -> Option<CredentialSlot> {
        let mut rng = self.rng.lock().unwrap_or_else(|p| p.into_inner());
        select_key(keys, &mut *rng).cloned()
    }

    async fn bounded<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::time::timeout(self.timeout, fut).await.ok()
    }
}
