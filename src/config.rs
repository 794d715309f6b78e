//! Configuration parsing, validation, and secret loading.
//!
//! Non-secret settings come from a TOML file:
//!
//! ```toml
//! [db]
//! path = "./data/unai.sqlite"
//!
//! [server]
//! bind = "0.0.0.0:8787"
//!
//! [retrieval]
//! similarity_threshold = 0.5
//! match_count = 5
//! keyword_limit = 3
//!
//! [generation]
//! default_provider = "groq"
//!
//! [providers.gemini]
//! daily_request_limit = 1500
//! ```
//!
//! Every section except `[db]` and `[server]` has defaults. API keys are
//! never read from the file; see [`Secrets`].

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use unai_core::keys::{KeySet, ProviderTag, MAX_SLOTS};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    /// Timeout applied to every outbound provider call.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    #[serde(default = "default_match_count")]
    pub match_count: usize,
    #[serde(default = "default_keyword_limit")]
    pub keyword_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            match_count: default_match_count(),
            keyword_limit: default_keyword_limit(),
        }
    }
}

fn default_similarity_threshold() -> f32 {
    0.5
}
fn default_match_count() -> usize {
    5
}
fn default_keyword_limit() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_provider")]
    pub default_provider: ProviderTag,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            default_provider: default_provider(),
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
            history_turns: default_history_turns(),
        }
    }
}

fn default_provider() -> ProviderTag {
    ProviderTag::Groq
}
fn default_temperature() -> f32 {
    0.5
}
fn default_max_output_tokens() -> u32 {
    1024
}
fn default_history_turns() -> usize {
    unai_core::context::DEFAULT_HISTORY_TURNS
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub groq: GroqConfig,
    #[serde(default)]
    pub gemini: GeminiConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GroqConfig {
    #[serde(default = "default_groq_url")]
    pub base_url: String,
    #[serde(default = "default_groq_model")]
    pub model: String,
    /// Used only when the provider omits its rate-limit headers.
    #[serde(default = "default_groq_limit")]
    pub daily_request_limit: i64,
}

impl Default for GroqConfig {
    fn default() -> Self {
        Self {
            base_url: default_groq_url(),
            model: default_groq_model(),
            daily_request_limit: default_groq_limit(),
        }
    }
}

fn default_groq_url() -> String {
    "https://api.groq.com/openai/v1".to_string()
}
fn default_groq_model() -> String {
    "llama-3.3-70b-versatile".to_string()
}
fn default_groq_limit() -> i64 {
    14400
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeminiConfig {
    #[serde(default = "default_gemini_url")]
    pub base_url: String,
    #[serde(default = "default_gemini_model")]
    pub model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_gemini_limit")]
    pub daily_request_limit: i64,
    #[serde(default = "default_gemini_limit")]
    pub embedding_daily_limit: i64,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            base_url: default_gemini_url(),
            model: default_gemini_model(),
            embedding_model: default_embedding_model(),
            daily_request_limit: default_gemini_limit(),
            embedding_daily_limit: default_gemini_limit(),
        }
    }
}

fn default_gemini_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}
fn default_gemini_model() -> String {
    "gemini-1.5-flash".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-004".to_string()
}
fn default_gemini_limit() -> i64 {
    1500
}

#[derive(Debug, Deserialize, Clone)]
pub struct LedgerConfig {
    #[serde(default = "default_reset_hour")]
    pub reset_hour_utc: u32,
    /// Pending usage events buffered before new ones are dropped.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            reset_hour_utc: default_reset_hour(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_reset_hour() -> u32 {
    unai_core::quota::DEFAULT_RESET_HOUR_UTC
}
fn default_queue_capacity() -> usize {
    256
}

impl Config {
    /// Daily request limit used for client-side estimation of a provider.
    pub fn daily_limit(&self, provider: ProviderTag) -> i64 {
        match provider {
            ProviderTag::Groq => self.providers.groq.daily_request_limit,
            ProviderTag::Gemini => self.providers.gemini.daily_request_limit,
            ProviderTag::Embedding => self.providers.gemini.embedding_daily_limit,
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if !(0.0..=1.0).contains(&config.retrieval.similarity_threshold) {
        anyhow::bail!("retrieval.similarity_threshold must be in [0.0, 1.0]");
    }
    if config.retrieval.match_count < 1 {
        anyhow::bail!("retrieval.match_count must be >= 1");
    }
    if config.retrieval.keyword_limit < 1 {
        anyhow::bail!("retrieval.keyword_limit must be >= 1");
    }

    if config.generation.default_provider == ProviderTag::Embedding {
        anyhow::bail!("generation.default_provider must be groq or gemini");
    }
    if !(0.0..=2.0).contains(&config.generation.temperature) {
        anyhow::bail!("generation.temperature must be in [0.0, 2.0]");
    }
    if config.generation.max_output_tokens == 0 {
        anyhow::bail!("generation.max_output_tokens must be > 0");
    }

    for provider in [ProviderTag::Groq, ProviderTag::Gemini, ProviderTag::Embedding] {
        if config.daily_limit(provider) < 1 {
            anyhow::bail!("daily request limit for {} must be >= 1", provider);
        }
    }

    if config.ledger.reset_hour_utc > 23 {
        anyhow::bail!("ledger.reset_hour_utc must be in 0..=23");
    }
    if config.ledger.queue_capacity == 0 {
        anyhow::bail!("ledger.queue_capacity must be > 0");
    }
    if config.http.timeout_secs == 0 {
        anyhow::bail!("http.timeout_secs must be > 0");
    }

    Ok(config)
}

/// API keys for every provider, loaded once at startup.
///
/// Each chat provider reads `{PREFIX}_1` through `{PREFIX}_5`; the bare
/// `{PREFIX}` variable is used only when no numbered key is set. The
/// embedding slot reads `EMBEDDING_API_KEY` and otherwise shares the
/// Gemini keys.
#[derive(Debug, Clone)]
pub struct Secrets {
    pub groq: KeySet,
    pub gemini: KeySet,
    pub embedding: KeySet,
}

impl Secrets {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let groq = numbered_keys("GROQ_API_KEY", &lookup);
        let gemini = numbered_keys("GEMINI_API_KEY", &lookup);
        let embedding = match lookup("EMBEDDING_API_KEY").filter(|k| !k.trim().is_empty()) {
            Some(key) => vec![key],
            None => gemini.clone(),
        };
        Self {
            groq: KeySet::new(ProviderTag::Groq, groq),
            gemini: KeySet::new(ProviderTag::Gemini, gemini),
            embedding: KeySet::new(ProviderTag::Embedding, embedding),
        }
    }

    pub fn chat_keys(&self, provider: ProviderTag) -> &KeySet {
        match provider {
            ProviderTag::Groq => &self.groq,
            ProviderTag::Gemini => &self.gemini,
            ProviderTag::Embedding => &self.embedding,
        }
    }

    /// True when neither chat provider has a key.
    pub fn no_chat_keys(&self) -> bool {
        self.groq.is_empty() && self.gemini.is_empty()
    }
}

fn numbered_keys<F>(prefix: &str, lookup: &F) -> Vec<String>
where
    F: Fn(&str) -> Option<String>,
{
    let numbered: Vec<String> = (1..=MAX_SLOTS)
        .filter_map(|i| lookup(&format!("{}_{}", prefix, i)))
        .filter(|k| !k.trim().is_empty())
        .collect();
    if !numbered.is_empty() {
        return numbered;
    }
    lookup(prefix)
        .filter(|k| !k.trim().is_empty())
        .into_iter()
        .collect()
}
