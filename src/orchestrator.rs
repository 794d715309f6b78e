//! Chat request pipeline.
//!
//! `received → retrieving → generating → responded`, with the usage write
//! handed to the background [`UsageRecorder`] between generating and
//! responding. The response never waits for the ledger.
//!
//! When no chat provider has a key the request short-circuits before any
//! store read or outbound call.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use chrono::{FixedOffset, Local, Offset};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use unai_core::keys::{select_key, CredentialSlot, ProviderTag};
use unai_core::models::ChatTurn;
use unai_core::store::{KnowledgeStore, SettingsStore, UsageStore, AI_PROVIDER_SETTING};

use crate::config::{Config, Secrets};
use crate::error::ErrorKind;
use crate::generation::{GenerationStage, GenerationStatus};
use crate::ledger::{UsageEvent, UsageLedger, UsageRecorder};
use crate::provider::gemini::GeminiProvider;
use crate::provider::openai::OpenAiProvider;
use crate::provider::{http_client, LlmProvider};
use crate::retrieval::{Embedder, RetrievalStage};

pub const NOT_CONFIGURED_MESSAGE: &str =
    "AI service is not configured: no provider API keys are set";

/// Result of one chat request, before HTTP mapping.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatOutcome {
    /// An answer, or an apology after a generic provider failure.
    Answered {
        response: String,
        search_results: usize,
    },
    RateLimited { message: String },
    NotConfigured,
}

/// The provider clients used for chat and embeddings.
pub struct Providers {
    pub groq: Arc<dyn LlmProvider>,
    pub gemini: Arc<dyn LlmProvider>,
}

impl Providers {
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = http_client(Duration::from_secs(config.http.timeout_secs))?;
        let groq = &config.providers.groq;
        let gemini = &config.providers.gemini;
        Ok(Self {
            groq: Arc::new(OpenAiProvider::new(client.clone(), &groq.base_url, &groq.model)),
            gemini: Arc::new(GeminiProvider::new(
                client,
                &gemini.base_url,
                &gemini.model,
                &gemini.embedding_model,
            )),
        })
    }
}

/// Storage backends the pipeline reads and writes.
#[derive(Clone)]
pub struct Stores {
    pub knowledge: Arc<dyn KnowledgeStore>,
    pub usage: Arc<dyn UsageStore>,
    pub settings: Arc<dyn SettingsStore>,
}

impl Stores {
    /// One backend serving all three roles.
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: KnowledgeStore + UsageStore + SettingsStore + 'static,
    {
        Self {
            knowledge: store.clone(),
            usage: store.clone(),
            settings: store,
        }
    }
}

/// Offset of the host's local timezone, which defines the ledger's
/// calendar day.
pub fn local_offset() -> FixedOffset {
    Local::now().offset().fix()
}

pub struct Orchestrator {
    retrieval: RetrievalStage,
    stages: Vec<GenerationStage>,
    settings: Arc<dyn SettingsStore>,
    default_provider: ProviderTag,
    recorder: UsageRecorder,
    rng: Mutex<StdRng>,
}

impl Orchestrator {
    pub fn new(
        retrieval: RetrievalStage,
        stages: Vec<GenerationStage>,
        settings: Arc<dyn SettingsStore>,
        default_provider: ProviderTag,
        recorder: UsageRecorder,
    ) -> Self {
        Self {
            retrieval,
            stages,
            settings,
            default_provider,
            recorder,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Wire every stage from configuration. Returns the orchestrator and
    /// the usage writer task, which ends once the orchestrator is dropped.
    pub fn from_config(
        config: &Config,
        secrets: &Secrets,
        stores: Stores,
        providers: Providers,
        local_offset: FixedOffset,
    ) -> Result<(Self, JoinHandle<()>)> {
        let timeout = Duration::from_secs(config.http.timeout_secs);
        let ledger = UsageLedger::from_config(stores.usage.clone(), config, local_offset)?;
        let (recorder, writer) = UsageRecorder::spawn(Arc::new(ledger), config.ledger.queue_capacity);

        let embedder = Embedder {
            provider: providers.gemini.clone(),
            keys: secrets.embedding.clone(),
        };
        let retrieval = RetrievalStage::new(
            stores.knowledge.clone(),
            Some(embedder),
            recorder.clone(),
            config.retrieval.clone(),
            timeout,
        );

        let stages = vec![
            GenerationStage::new(
                providers.groq,
                secrets.groq.clone(),
                config.generation.clone(),
                timeout,
            ),
            GenerationStage::new(
                providers.gemini,
                secrets.gemini.clone(),
                config.generation.clone(),
                timeout,
            ),
        ];

        let orchestrator = Self::new(
            retrieval,
            stages,
            stores.settings,
            config.generation.default_provider,
            recorder,
        );
        Ok((orchestrator, writer))
    }

    /// Replace the key-selection randomness source.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = Mutex::new(rng);
        self
    }

    pub async fn chat(&self, message: &str, history: &[ChatTurn]) -> ChatOutcome {
        if self.stages.iter().all(|s| s.keys().is_empty()) {
            warn!(kind = %ErrorKind::ConfigMissing, "No chat provider keys configured");
            return ChatOutcome::NotConfigured;
        }

        let preferred = self.active_provider().await;
        let Some(stage) = self.stage_for(preferred) else {
            return ChatOutcome::NotConfigured;
        };
        if stage.tag() != preferred {
            info!(preferred = %preferred, using = %stage.tag(), "Active provider has no keys; using fallback");
        }
        let Some(slot) = self.pick(stage) else {
            return ChatOutcome::NotConfigured;
        };

        let retrieved = self.retrieval.retrieve(message).await;
        let generation = stage
            .generate(&slot, message, &retrieved.context, history)
            .await;

        self.recorder.record(
            UsageEvent::new(generation.provider, generation.key_index, generation.succeeded())
                .with_report(generation.quota.clone()),
        );

        match generation.status {
            GenerationStatus::RateLimited => ChatOutcome::RateLimited {
                message: generation.text,
            },
            GenerationStatus::Answered | GenerationStatus::Failed => ChatOutcome::Answered {
                response: generation.text,
                search_results: retrieved.documents.len(),
            },
        }
    }

    /// The persisted provider choice, or the configured default when it is
    /// unset, unreadable or not a chat provider.
    pub async fn active_provider(&self) -> ProviderTag {
        match self.settings.get_setting(AI_PROVIDER_SETTING).await {
            Ok(Some(value)) => match value.parse::<ProviderTag>() {
                Ok(tag) if tag != ProviderTag::Embedding => tag,
                _ => {
                    warn!(value = %value, "Ignoring invalid ai_provider setting");
                    self.default_provider
                }
            },
            Ok(None) => self.default_provider,
            Err(e) => {
                warn!(error = %e, "Failed to read ai_provider setting");
                self.default_provider
            }
        }
    }

    fn stage_for(&self, preferred: ProviderTag) -> Option<&GenerationStage> {
        self.stages
            .iter()
            .find(|s| s.tag() == preferred && !s.keys().is_empty())
            .or_else(|| self.stages.iter().find(|s| !s.keys().is_empty()))
    }

    fn pick(&self, stage: &GenerationStage) -> Option<CredentialSlot> {
        let mut rng = self.rng.lock().unwrap_or_else(|p| p.into_inner());
        select_key(stage.keys(), &mut *rng).cloned()
    }
}
