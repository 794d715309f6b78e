//! OpenAI-compatible chat provider (Groq).
//!
//! Sends the system instruction as a leading `system` message followed by
//! the conversation, and parses the `x-ratelimit-*` response headers into a
//! [`QuotaReport`] so the ledger can record them verbatim.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use unai_core::keys::ProviderTag;
use unai_core::models::Role;
use unai_core::quota::QuotaReport;

use super::{read_body, ChatCompletion, ChatRequest, LlmProvider};
use crate::error::ProviderError;

pub struct OpenAiProvider {
    client: Client,
    base_url: String,
    model: String,
}

impl OpenAiProvider {
    pub fn new(client: Client, base_url: &str, model: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: Role,
    content: &'a str,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageResponse,
}

#[derive(Deserialize)]
struct MessageResponse {
    content: Option<String>,
}

fn build_request<'a>(model: &'a str, request: &'a ChatRequest) -> CompletionRequest<'a> {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    messages.push(WireMessage {
        role: Role::System,
        content: &request.system_instruction,
    });
    messages.extend(request.messages.iter().map(|m| WireMessage {
        role: m.role,
        content: &m.content,
    }));
    CompletionRequest {
        model,
        messages,
        temperature: request.temperature,
        max_tokens: request.max_output_tokens,
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn tag(&self) -> ProviderTag {
        ProviderTag::Groq
    }

    async fn chat(
        &self,
        api_key: &str,
        request: &ChatRequest,
    ) -> Result<ChatCompletion, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = build_request(&self.model, request);

        debug!(model = %self.model, msg_count = body.messages.len(), "Sending chat completion request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;

        let quota = QuotaReport::from_headers(
            response
                .headers()
                .iter()
                .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v))),
        );

        let text = read_body(response).await?;
        let completion: CompletionResponse =
            serde_json::from_str(&text).map_err(|e| ProviderError::Malformed(e.to_string()))?;

        let answer = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ProviderError::Malformed("no answer in choices".to_string()))?;

        Ok(ChatCompletion {
            text: answer,
            quota,
        })
    }

    async fn embed(&self, _api_key: &str, _text: &str) -> Result<Vec<f32>, ProviderError> {
        Err(ProviderError::Unsupported("groq"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unai_core::models::ChatMessage;

    #[test]
    fn test_base_url_trimmed() {
        let p = OpenAiProvider::new(Client::new(), "https://api.groq.com/openai/v1/", "m");
        assert_eq!(p.base_url, "https://api.groq.com/openai/v1");
    }

    #[test]
    fn test_request_leads_with_system_message() {
        let request = ChatRequest {
            system_instruction: "persona".to_string(),
            messages: vec![
                ChatMessage::assistant("hi"),
                ChatMessage::user("Tag ไม่ขึ้น UI"),
            ],
            temperature: 0.5,
            max_output_tokens: 1024,
        };
        let json = serde_json::to_value(build_request("llama", &request)).unwrap();
        assert_eq!(json["model"], "llama");
        assert_eq!(json["max_tokens"], 1024);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][0]["content"], "persona");
        assert_eq!(json["messages"][1]["role"], "assistant");
        assert_eq!(json["messages"][2]["content"], "Tag ไม่ขึ้น UI");
    }
}
