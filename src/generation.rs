//! Answer generation with one chat provider.
//!
//! A stage owns one provider client and that provider's keys. The caller
//! picks the credential; the stage builds the prompt, makes exactly one
//! call with it and classifies the outcome. A failed call is not retried
//! with another key.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use unai_core::context::{conversation, system_instruction};
use unai_core::keys::{CredentialSlot, KeySet, ProviderTag};
use unai_core::models::ChatTurn;
use unai_core::quota::QuotaReport;

use crate::config::GenerationConfig;
use crate::error::ProviderError;
use crate::provider::{ChatRequest, LlmProvider};

pub const GENERIC_APOLOGY: &str = "ขออภัยครับ ระบบ AI ขัดข้องชั่วคราว กรุณาลองใหม่อีกครั้ง";

pub const RATE_LIMIT_APOLOGY: &str =
    "ขออภัยครับ ขณะนี้มีผู้ใช้งานจำนวนมาก (Rate Limit) กรุณารอสักครู่แล้วลองใหม่";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationStatus {
    Answered,
    Failed,
    RateLimited,
}

#[derive(Debug, Clone)]
pub struct Generation {
    /// The model's answer, or an apology when the call failed.
    pub text: String,
    pub provider: ProviderTag,
    pub key_index: i64,
    pub status: GenerationStatus,
    pub quota: Option<QuotaReport>,
}

impl Generation {
    pub fn succeeded(&self) -> bool {
        self.status == GenerationStatus::Answered
    }
}

pub struct GenerationStage {
    provider: Arc<dyn LlmProvider>,
    keys: KeySet,
    settings: GenerationConfig,
    timeout: Duration,
}

impl GenerationStage {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        keys: KeySet,
        settings: GenerationConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            keys,
            settings,
            timeout,
        }
    }

    pub fn tag(&self) -> ProviderTag {
        self.provider.tag()
    }

    pub fn keys(&self) -> &KeySet {
        &self.keys
    }

    /// The request sent for this message, context and history.
    pub fn build_request(&self, user_message: &str, context: &str, history: &[ChatTurn]) -> ChatRequest {
        ChatRequest {
            system_instruction: system_instruction(context),
            messages: conversation(history, self.settings.history_turns, user_message),
            temperature: self.settings.temperature,
            max_output_tokens: self.settings.max_output_tokens,
        }
    }

    pub async fn generate(
        &self,
        slot: &CredentialSlot,
        user_message: &str,
        context: &str,
        history: &[ChatTurn],
    ) -> Generation {
        let request = self.build_request(user_message, context, history);
        let result = tokio::time::timeout(self.timeout, self.provider.chat(slot.secret(), &request))
            .await
            .unwrap_or_else(|_| Err(ProviderError::Transport("request timed out".to_string())));

        let provider = self.tag();
        let key_index = slot.ledger_index();
        match result {
            Ok(completion) => {
                info!(provider = %provider, key = slot.key_suffix(), "Generated answer");
                Generation {
                    text: completion.text,
                    provider,
                    key_index,
                    status: GenerationStatus::Answered,
                    quota: completion.quota,
                }
            }
            Err(e) => {
                warn!(
                    kind = %e.kind(),
                    provider = %provider,
                    key = slot.key_suffix(),
                    error = %e,
                    "Generation failed"
                );
                let (text, status) = if e.is_rate_limited() {
                    (RATE_LIMIT_APOLOGY, GenerationStatus::RateLimited)
                } else {
                    (GENERIC_APOLOGY, GenerationStatus::Failed)
                };
                Generation {
                    text: text.to_string(),
                    provider,
                    key_index,
                    status,
                    quota: None,
                }
            }
        }
    }
}
