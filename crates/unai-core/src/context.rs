//! Context assembly for the generation prompt.
//!
//! Retrieved documents are rendered into labelled blocks, joined with a
//! separator, and appended to a fixed persona template. The order of
//! documents is the order the retrieval call returned; nothing here sorts.

use crate::models::{ChatMessage, ChatTurn, KnowledgeDocument};

/// Separator between document blocks in a context string.
pub const CONTEXT_SEPARATOR: &str = "\n---\n";

/// Substituted into the template when retrieval found nothing.
pub const NO_CONTEXT_MARKER: &str = "ไม่พบข้อมูลในฐานข้อมูล ตอบตามความรู้ทั่วไป";

/// Default number of prior turns forwarded to the model.
pub const DEFAULT_HISTORY_TURNS: usize = 12;

const PERSONA: &str = r#"คุณคือ "UNAi" ผู้ช่วย AI อัจฉริยะสำหรับการแก้ไขปัญหา (Troubleshooting)

**แนวทางการตอบ:**
*   ใช้ข้อมูลจาก "CONTEXT" ด้านล่างเป็นหลักในการตอบคำถาม
*   สรุปวิธีแก้ไขเป็นขั้นตอนที่เข้าใจง่าย
*   ถ้าข้อมูลใน CONTEXT ไม่เกี่ยวข้องกับคำถาม ให้แจ้งผู้ใช้ตรงๆ และห้ามแต่งข้อมูลขึ้นเอง
*   ใช้ภาษาไทยที่สุภาพ และเป็นมืออาชีพ"#;

/// Render one document as a context block.
pub fn format_document(doc: &KnowledgeDocument) -> String {
    let heading = if doc.subcategory.trim().is_empty() {
        doc.category.clone()
    } else {
        format!("{} - {}", doc.category, doc.subcategory)
    };
    format!(
        "หัวข้อ: {}\nอาการ: {}\nสาเหตุ: {}\nวิธีแก้: {}",
        heading, doc.symptom_description, doc.possible_causes, doc.solution
    )
}

/// Join document blocks in the given order. Empty input yields `""`.
pub fn build_context(docs: &[KnowledgeDocument]) -> String {
    docs.iter()
        .map(format_document)
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR)
}

/// Persona template followed by the context block, or
/// [`NO_CONTEXT_MARKER`] when the context is empty.
pub fn system_instruction(context: &str) -> String {
    let body = if context.trim().is_empty() {
        NO_CONTEXT_MARKER
    } else {
        context
    };
    format!("{}\n\nCONTEXT:\n{}", PERSONA, body)
}

/// The last `min(max_turns, len)` turns, oldest first.
pub fn recent_history(history: &[ChatTurn], max_turns: usize) -> &[ChatTurn] {
    let start = history.len().saturating_sub(max_turns);
    &history[start..]
}

/// Recent history mapped to user/assistant messages, then the current
/// user message as the final turn.
pub fn conversation(history: &[ChatTurn], max_turns: usize, user_message: &str) -> Vec<ChatMessage> {
    let mut messages: Vec<ChatMessage> = recent_history(history, max_turns)
        .iter()
        .map(ChatMessage::from)
        .collect();
    messages.push(ChatMessage::user(user_message));
    messages
}
