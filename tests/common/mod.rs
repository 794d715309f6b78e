//! Shared fixtures: scripted providers and pipeline assembly.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::FixedOffset;
use reqwest::StatusCode;
use tokio::task::JoinHandle;

use unai::config::{parse_config, Config, Secrets};
use unai::error::ProviderError;
use unai::orchestrator::{Orchestrator, Providers, Stores};
use unai::provider::{ChatCompletion, ChatRequest, LlmProvider};
use unai_core::keys::ProviderTag;
use unai_core::models::KnowledgeDocument;
use unai_core::quota::QuotaReport;

/// What a scripted chat call returns.
#[derive(Clone)]
pub enum Reply {
    Answer(String),
    AnswerWithQuota(String, QuotaReport),
    Status(u16, String),
    Transport,
}

/// What a scripted embed call returns.
#[derive(Clone)]
pub enum EmbedReply {
    Vector(Vec<f32>),
    Status(u16),
}

pub struct ScriptedProvider {
    tag: ProviderTag,
    replies: Mutex<VecDeque<Reply>>,
    embed_reply: EmbedReply,
    pub requests: Mutex<Vec<ChatRequest>>,
    pub keys_used: Mutex<Vec<String>>,
    pub chat_calls: AtomicUsize,
    pub embed_calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(tag: ProviderTag, replies: Vec<Reply>, embed_reply: EmbedReply) -> Arc<Self> {
        Arc::new(Self {
            tag,
            replies: Mutex::new(replies.into()),
            embed_reply,
            requests: Mutex::new(Vec::new()),
            keys_used: Mutex::new(Vec::new()),
            chat_calls: AtomicUsize::new(0),
            embed_calls: AtomicUsize::new(0),
        })
    }

    pub fn answering(tag: ProviderTag, text: &str) -> Arc<Self> {
        Self::new(
            tag,
            vec![Reply::Answer(text.to_string())],
            EmbedReply::Status(500),
        )
    }

    pub fn chats(&self) -> usize {
        self.chat_calls.load(Ordering::SeqCst)
    }

    pub fn embeds(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> ChatRequest {
        self.requests
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no chat request recorded")
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn tag(&self) -> ProviderTag {
        self.tag
    }

    async fn chat(
        &self,
        api_key: &str,
        request: &ChatRequest,
    ) -> Result<ChatCompletion, ProviderError> {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        self.keys_used.lock().unwrap().push(api_key.to_string());
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Reply::Answer("default answer".to_string()));
        match reply {
            Reply::Answer(text) => Ok(ChatCompletion { text, quota: None }),
            Reply::AnswerWithQuota(text, quota) => Ok(ChatCompletion {
                text,
                quota: Some(quota),
            }),
            Reply::Status(code, body) => Err(ProviderError::classify(
                StatusCode::from_u16(code).unwrap(),
                &body,
            )),
            Reply::Transport => Err(ProviderError::Transport("connection refused".to_string())),
        }
    }

    async fn embed(&self, _api_key: &str, _text: &str) -> Result<Vec<f32>, ProviderError> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        match &self.embed_reply {
            EmbedReply::Vector(v) => Ok(v.clone()),
            EmbedReply::Status(code) => Err(ProviderError::classify(
                StatusCode::from_u16(*code).unwrap(),
                "embedding failed",
            )),
        }
    }
}

pub fn test_config() -> Config {
    parse_config(
        r#"
[db]
path = "unused.sqlite"

[server]
bind = "127.0.0.1:0"

[http]
timeout_secs = 5
"#,
    )
    .unwrap()
}

pub fn secrets(pairs: &[(&str, &str)]) -> Secrets {
    let owned: Vec<(String, String)> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Secrets::from_lookup(move |name| {
        owned
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
    })
}

pub fn utc() -> FixedOffset {
    FixedOffset::east_opt(0).unwrap()
}

pub fn build(
    secrets: &Secrets,
    stores: Stores,
    groq: Arc<ScriptedProvider>,
    gemini: Arc<ScriptedProvider>,
) -> (Orchestrator, JoinHandle<()>) {
    let providers = Providers { groq, gemini };
    Orchestrator::from_config(&test_config(), secrets, stores, providers, utc()).unwrap()
}

pub fn doc(category: &str, symptom: &str, embedding: Option<Vec<f32>>) -> KnowledgeDocument {
    KnowledgeDocument {
        category: category.to_string(),
        subcategory: "General".to_string(),
        symptom_description: symptom.to_string(),
        possible_causes: format!("cause of {}", symptom),
        solution: format!("fix for {}", symptom),
        sheet_source: "admin_upload".to_string(),
        embedding,
        ..Default::default()
    }
    .normalized()
}
