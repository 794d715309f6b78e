//! Core data models: knowledge documents and chat turns.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A troubleshooting guide entry.
///
/// Written by ingestion, read-only on the chat path. Field aliases accept
/// both the stored snake_case column names and the camelCase names used by
/// the admin frontend exports.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeDocument {
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub subcategory: String,
    #[serde(default, alias = "symptomDescription", alias = "symptom")]
    pub symptom_description: String,
    #[serde(default, alias = "possibleCauses")]
    pub possible_causes: String,
    #[serde(default)]
    pub solution: String,
    #[serde(default)]
    pub observation: String,
    #[serde(default, alias = "initialCheck")]
    pub initial_check: String,
    #[serde(default, alias = "responsibleParty")]
    pub responsible_party: String,
    #[serde(default, alias = "sheetSource")]
    pub sheet_source: String,
    #[serde(default, alias = "searchKeywords")]
    pub search_keywords: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// Collapse a spreadsheet cell into a single line: embedded newlines become
/// `" / "` and whitespace runs become one space.
pub fn normalize_cell(text: &str) -> String {
    text.replace("\r\n", "\n")
        .replace('\n', " / ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn dedup_field(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

impl KnowledgeDocument {
    /// Normalize every text cell and derive `search_keywords` from
    /// category, subcategory and symptom when it is blank.
    pub fn normalized(mut self) -> Self {
        for field in [
            &mut self.category,
            &mut self.subcategory,
            &mut self.symptom_description,
            &mut self.possible_causes,
            &mut self.solution,
            &mut self.observation,
            &mut self.initial_check,
            &mut self.responsible_party,
            &mut self.sheet_source,
            &mut self.search_keywords,
        ] {
            *field = normalize_cell(field);
        }
        if self.search_keywords.is_empty() {
            self.search_keywords = [
                self.category.as_str(),
                self.subcategory.as_str(),
                self.symptom_description.as_str(),
            ]
            .iter()
            .filter(|s| !s.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(" ");
        }
        self
    }

    /// Rows with neither a category nor a symptom carry nothing searchable.
    pub fn is_indexable(&self) -> bool {
        !self.category.trim().is_empty() || !self.symptom_description.trim().is_empty()
    }

    /// Labelled text sent to the embedding endpoint.
    pub fn embedding_text(&self) -> String {
        [
            format!("หมวดหมู่: {}", self.category),
            format!("หมวดหมู่ย่อย: {}", self.subcategory),
            format!("อาการ: {}", self.symptom_description),
            format!("สาเหตุ: {}", self.possible_causes),
            format!("วิธีแก้: {}", self.solution),
        ]
        .join("\n")
    }

    /// The fields that decide whether two documents are the same entry.
    /// Whitespace is trimmed and internal runs collapsed; every other field
    /// (including `sheet_source`) is ignored.
    pub fn dedup_key(&self) -> [String; 5] {
        [
            dedup_field(&self.category),
            dedup_field(&self.subcategory),
            dedup_field(&self.symptom_description),
            dedup_field(&self.possible_causes),
            dedup_field(&self.solution),
        ]
    }

    /// SHA-256 over [`dedup_key`](Self::dedup_key), hex encoded.
    pub fn dedup_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for (i, part) in self.dedup_key().iter().enumerate() {
            if i > 0 {
                hasher.update([0x1f]);
            }
            hasher.update(part.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }

    pub fn is_duplicate_of(&self, other: &KnowledgeDocument) -> bool {
        self.dedup_key() == other.dedup_key()
    }
}

/// One prior turn of caller-supplied chat history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTurn {
    pub is_user: bool,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A provider-neutral chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

impl From<&ChatTurn> for ChatMessage {
    fn from(turn: &ChatTurn) -> Self {
        if turn.is_user {
            ChatMessage::user(turn.content.clone())
        } else {
            ChatMessage::assistant(turn.content.clone())
        }
    }
}
