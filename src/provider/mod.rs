//! Upstream model providers.
//!
//! [`LlmProvider`] is the one interface the pipeline talks to for both text
//! generation and embeddings. Each implementation is constructed once with
//! its base URL and model names; the API key is passed per call so a single
//! client serves every slot of a [`KeySet`](unai_core::keys::KeySet).
//!
//! - [`openai::OpenAiProvider`] speaks the OpenAI-compatible
//!   `/chat/completions` protocol and reports rate-limit headers (Groq).
//! - [`gemini::GeminiProvider`] speaks `generateContent` / `embedContent`
//!   and reports no usage, so its ledger entries are estimated.

pub mod gemini;
pub mod openai;

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;

use unai_core::keys::ProviderTag;
use unai_core::models::ChatMessage;
use unai_core::quota::QuotaReport;

use crate::error::ProviderError;

/// Everything a provider needs to produce one answer.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub system_instruction: String,
    /// Prior turns oldest first, ending with the current user message.
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatCompletion {
    pub text: String,
    /// Usage counts reported by the provider, when it sends them.
    pub quota: Option<QuotaReport>,
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn tag(&self) -> ProviderTag;

    async fn chat(&self, api_key: &str, request: &ChatRequest)
        -> Result<ChatCompletion, ProviderError>;

    async fn embed(&self, api_key: &str, text: &str) -> Result<Vec<f32>, ProviderError>;
}

/// Shared HTTP client with a bounded per-request timeout.
pub fn http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to build HTTP client")
}

/// Read a response body, mapping non-success statuses through
/// [`ProviderError::classify`].
pub(crate) async fn read_body(response: reqwest::Response) -> Result<String, ProviderError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(ProviderError::classify(status, &body));
    }
    Ok(body)
}
