//! Credential slots and per-request key selection.
//!
//! Each provider owns an ordered [`KeySet`] of [`CredentialSlot`]s built once
//! at process start. Slots are addressed by a stable 1-based index and are
//! never mutated afterwards, so a `KeySet` can be shared freely across
//! concurrent requests.
//!
//! # Ledger Index Convention
//!
//! Usage rows stored before this crate existed number keys globally per
//! provider. The convention is kept behind [`ledger_index`] and
//! [`from_ledger_index`] so call sites never do the arithmetic themselves:
//!
//! | Provider | Local index | Ledger index |
//! |----------|-------------|--------------|
//! | Groq | 1..=5 | 1..=5 |
//! | Gemini | 1..=5 | 11..=15 |
//! | Embedding | 1 | 21 |

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum number of numbered key slots read per provider.
pub const MAX_SLOTS: usize = 5;

/// Fixed ledger index for the dedicated embedding key.
pub const EMBEDDING_LEDGER_INDEX: i64 = 21;

const GEMINI_LEDGER_OFFSET: i64 = 10;

/// Which upstream capability a credential belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderTag {
    /// The dedicated embedding credential.
    Embedding,
    /// Chat provider A: an OpenAI-compatible endpoint that reports its own
    /// rate-limit headers.
    Groq,
    /// Chat provider B: a generateContent-style endpoint without usage headers.
    Gemini,
}

impl ProviderTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderTag::Embedding => "embedding",
            ProviderTag::Groq => "groq",
            ProviderTag::Gemini => "gemini",
        }
    }
}

impl fmt::Display for ProviderTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderTag {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "embedding" => Ok(ProviderTag::Embedding),
            "groq" => Ok(ProviderTag::Groq),
            "gemini" => Ok(ProviderTag::Gemini),
            other => anyhow::bail!("Unknown provider: '{}'. Must be groq or gemini.", other),
        }
    }
}

/// Translate a provider-local 1-based slot index into the stored ledger index.
pub fn ledger_index(provider: ProviderTag, local_index: usize) -> i64 {
    match provider {
        ProviderTag::Groq => local_index as i64,
        ProviderTag::Gemini => local_index as i64 + GEMINI_LEDGER_OFFSET,
        ProviderTag::Embedding => EMBEDDING_LEDGER_INDEX,
    }
}

/// Reverse of [`ledger_index`]. Returns `None` for indices outside the convention.
pub fn from_ledger_index(index: i64) -> Option<(ProviderTag, usize)> {
    let max = MAX_SLOTS as i64;
    match index {
        i if (1..=max).contains(&i) => Some((ProviderTag::Groq, i as usize)),
        i if (GEMINI_LEDGER_OFFSET + 1..=GEMINI_LEDGER_OFFSET + max).contains(&i) => {
            Some((ProviderTag::Gemini, (i - GEMINI_LEDGER_OFFSET) as usize))
        }
        EMBEDDING_LEDGER_INDEX => Some((ProviderTag::Embedding, 1)),
        _ => None,
    }
}

/// One configured API key.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialSlot {
    pub provider: ProviderTag,
    /// 1-based position within the provider's [`KeySet`].
    pub index: usize,
    secret: String,
}

impl CredentialSlot {
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Last four characters of the secret, safe to log.
    pub fn key_suffix(&self) -> &str {
        let start = self
            .secret
            .char_indices()
            .rev()
            .nth(3)
            .map(|(i, _)| i)
            .unwrap_or(0);
        &self.secret[start..]
    }

    pub fn ledger_index(&self) -> i64 {
        ledger_index(self.provider, self.index)
    }
}

impl fmt::Debug for CredentialSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSlot")
            .field("provider", &self.provider)
            .field("index", &self.index)
            .field("secret", &format_args!("...{}", self.key_suffix()))
            .finish()
    }
}

/// Ordered, immutable collection of credentials for one provider.
#[derive(Debug, Clone)]
pub struct KeySet {
    provider: ProviderTag,
    slots: Vec<CredentialSlot>,
}

impl KeySet {
    /// Build a key set from secrets in slot order. Blank secrets are skipped
    /// before indices are assigned.
    pub fn new<I, S>(provider: ProviderTag, secrets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let slots = secrets
            .into_iter()
            .map(Into::into)
            .filter(|s| !s.trim().is_empty())
            .enumerate()
            .map(|(i, secret)| CredentialSlot {
                provider,
                index: i + 1,
                secret,
            })
            .collect();
        Self { provider, slots }
    }

    pub fn empty(provider: ProviderTag) -> Self {
        Self {
            provider,
            slots: Vec::new(),
        }
    }

    pub fn provider(&self) -> ProviderTag {
        self.provider
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slots(&self) -> &[CredentialSlot] {
        &self.slots
    }

    /// Look up a slot by its 1-based index.
    pub fn get(&self, index: usize) -> Option<&CredentialSlot> {
        index.checked_sub(1).and_then(|i| self.slots.get(i))
    }
}

/// Pick one slot uniformly at random.
///
/// Each call is independent: there is no stickiness between requests and no
/// re-selection when the chosen key later fails. Returns `None` for an empty
/// set; callers treat "no keys configured" as its own failure path.
pub fn select_key<'a, R: Rng + ?Sized>(
    keys: &'a KeySet,
    rng: &mut R,
) -> Option<&'a CredentialSlot> {
    if keys.is_empty() {
        return None;
    }
    let i = rng.gen_range(0..keys.len());
    keys.slots.get(i)
}
