//! Gemini `generateContent` and `embedContent` client.
//!
//! The API key travels as the `key` query parameter. Gemini sends no usage
//! headers, so completions carry `quota: None` and the ledger estimates.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use unai_core::keys::ProviderTag;
use unai_core::models::Role;

use super::{read_body, ChatCompletion, ChatRequest, LlmProvider};
use crate::error::ProviderError;

pub struct GeminiProvider {
    client: Client,
    base_url: String,
    model: String,
    embedding_model: String,
}

impl GeminiProvider {
    pub fn new(client: Client, base_url: &str, model: &str, embedding_model: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            embedding_model: embedding_model.to_string(),
        }
    }
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: String,
    content: Content<'a>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Option<EmbeddingValues>,
}

#[derive(Deserialize)]
struct EmbeddingValues {
    #[serde(default)]
    values: Vec<f32>,
}

fn text_content<'a>(role: Option<&'static str>, text: &'a str) -> Content<'a> {
    Content {
        role,
        parts: vec![Part { text }],
    }
}

fn build_request(request: &ChatRequest) -> GenerateRequest<'_> {
    let contents = request
        .messages
        .iter()
        .map(|m| {
            let role = match m.role {
                Role::Assistant => "model",
                Role::User | Role::System => "user",
            };
            text_content(Some(role), &m.content)
        })
        .collect();
    GenerateRequest {
        system_instruction: text_content(None, &request.system_instruction),
        contents,
        generation_config: GenerationConfig {
            temperature: request.temperature,
            max_output_tokens: request.max_output_tokens,
        },
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn tag(&self) -> ProviderTag {
        ProviderTag::Gemini
    }

    async fn chat(
        &self,
        api_key: &str,
        request: &ChatRequest,
    ) -> Result<ChatCompletion, ProviderError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        debug!(model = %self.model, msg_count = request.messages.len(), "Sending generateContent request");

        let response = self
            .client
            .post(&url)
            .query(&[("key", api_key)])
            .json(&build_request(request))
            .send()
            .await?;

        let text = read_body(response).await?;
        let parsed: GenerateResponse =
            serde_json::from_str(&text).map_err(|e| ProviderError::Malformed(e.to_string()))?;

        let answer: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();
        if answer.trim().is_empty() {
            return Err(ProviderError::Malformed("no text in candidates".to_string()));
        }

        Ok(ChatCompletion {
            text: answer,
            quota: None,
        })
    }

    async fn embed(&self, api_key: &str, text: &str) -> Result<Vec<f32>, ProviderError> {
        let url = format!(
            "{}/models/{}:embedContent",
            self.base_url, self.embedding_model
        );
        let body = EmbedRequest {
            model: format!("models/{}", self.embedding_model),
            content: text_content(None, text),
        };

        let response = self
            .client
            .post(&url)
            .query(&[("key", api_key)])
            .json(&body)
            .send()
            .await?;

        let raw = read_body(response).await?;
        let parsed: EmbedResponse =
            serde_json::from_str(&raw).map_err(|e| ProviderError::Malformed(e.to_string()))?;
        match parsed.embedding {
            Some(e) if !e.values.is_empty() => Ok(e.values),
            _ => Err(ProviderError::Malformed("no embedding values".to_string())),
        }
    }
}
