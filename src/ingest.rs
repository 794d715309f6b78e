//! Knowledge document import.
//!
//! Reads troubleshooting entries from a JSON array or a CSV export,
//! resolves column headers through a table of English and Thai aliases,
//! normalises every cell, drops rows with nothing searchable, removes
//! duplicates (within the file and against the store), embeds the rest in
//! batches of five, and inserts them.
//!
//! An embedding failure does not drop the document: it is stored with no
//! vector and stays reachable through keyword search. Each batch appends
//! one usage snapshot at the embedding ledger index, successful only when
//! every embedding in the batch succeeded.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde_json::Value;
use tracing::{info, warn};

use unai_core::keys::{select_key, CredentialSlot, KeySet};
use unai_core::models::KnowledgeDocument;
use unai_core::store::KnowledgeStore;

use crate::config::{Config, Secrets};
use crate::error::ErrorKind;
use crate::ledger::{UsageEvent, UsageLedger};
use crate::orchestrator::{local_offset, Providers};
use crate::retrieval::Embedder;
use crate::sqlite_store::SqliteStore;

/// Documents embedded per batch.
pub const EMBED_BATCH_SIZE: usize = 5;

/// `sheet_source` given to imported rows that do not carry one.
pub const DEFAULT_SHEET_SOURCE: &str = "admin_upload";

const CATEGORY: &[&str] = &["category", "หมวดหมู่", "ประเภทหลัก"];
const SUBCATEGORY: &[&str] = &["subcategory", "หมวดหมู่ย่อย", "หมวดหมู่ ย่อย", "ประเภท"];
const SYMPTOM: &[&str] = &["symptom", "symptom_description", "symptomdescription", "อาการ"];
const OBSERVATION: &[&str] = &["observation", "ข้อสังเกต", "สังเกต"];
const INITIAL_CHECK: &[&str] = &["initial check", "initial_check", "initialcheck", "ตรวจสอบเบื้องต้น"];
const POSSIBLE_CAUSES: &[&str] = &["possible causes", "possible_causes", "possiblecauses", "สาเหตุ"];
const SOLUTION: &[&str] = &["solution", "วิธีแก้"];
const RESPONSIBLE: &[&str] = &["responsible", "responsible_party", "responsibleparty", "ผู้รับผิดชอบ"];
const SHEET_SOURCE: &[&str] = &["sheet_source", "sheetsource"];
const SEARCH_KEYWORDS: &[&str] = &["search_keywords", "searchkeywords"];

/// Counts reported after an import.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub read: usize,
    pub unindexable: usize,
    pub duplicates: usize,
    pub embedded: usize,
    pub embedding_failures: usize,
    pub inserted: usize,
}

fn normalize_header(header: &str) -> String {
    header
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Build a document from a header lookup. `get` receives the normalised
/// header name and returns the raw cell, if present.
fn record_from<F>(get: F, sheet_source: &str) -> KnowledgeDocument
where
    F: Fn(&str) -> Option<String>,
{
    let pick = |aliases: &[&str]| -> String {
        aliases
            .iter()
            .filter_map(|a| get(&normalize_header(a)))
            .find(|v| !v.trim().is_empty())
            .map(|v| v.trim().to_string())
            .unwrap_or_default()
    };

    let mut doc = KnowledgeDocument {
        category: pick(CATEGORY),
        subcategory: pick(SUBCATEGORY),
        symptom_description: pick(SYMPTOM),
        possible_causes: pick(POSSIBLE_CAUSES),
        solution: pick(SOLUTION),
        observation: pick(OBSERVATION),
        initial_check: pick(INITIAL_CHECK),
        responsible_party: pick(RESPONSIBLE),
        sheet_source: pick(SHEET_SOURCE),
        search_keywords: pick(SEARCH_KEYWORDS),
        embedding: None,
    };
    if doc.sheet_source.is_empty() {
        doc.sheet_source = sheet_source.to_string();
    }
    doc
}

fn cell_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Parse a JSON array of objects keyed by any known header alias.
pub fn parse_json(text: &str, sheet_source: &str) -> Result<Vec<KnowledgeDocument>> {
    let value: Value = serde_json::from_str(text).context("Failed to parse JSON import file")?;
    let Value::Array(items) = value else {
        bail!("JSON import file must contain an array of objects");
    };

    let mut docs = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let Value::Object(map) = item else {
            bail!("Item {} in JSON import file is not an object", i);
        };
        let fields: Vec<(String, String)> = map
            .iter()
            .filter_map(|(k, v)| cell_to_string(v).map(|s| (normalize_header(k), s)))
            .collect();
        docs.push(record_from(
            |name| {
                fields
                    .iter()
                    .find(|(k, _)| k == name)
                    .map(|(_, v)| v.clone())
            },
            sheet_source,
        ));
    }
    Ok(docs)
}

/// Split one CSV line. Double quotes toggle quoting and `""` inside a quoted
/// field is a literal quote.
fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields.into_iter().map(|f| f.trim().to_string()).collect()
}

/// Split CSV text into records, keeping newlines that fall inside quotes.
fn csv_records(text: &str) -> Vec<String> {
    let mut records = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for c in text.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            '\n' if !in_quotes => records.push(std::mem::take(&mut current)),
            '\r' if !in_quotes => {}
            _ => current.push(c),
        }
    }
    records.push(current);
    records.into_iter().filter(|r| !r.trim().is_empty()).collect()
}

/// Parse CSV text whose first record is the header row.
pub fn parse_csv(text: &str, sheet_source: &str) -> Result<Vec<KnowledgeDocument>> {
    let records = csv_records(text.trim_start_matches('\u{feff}'));
    let Some((header_line, rows)) = records.split_first() else {
        bail!("CSV import file is empty");
    };
    let headers: Vec<String> = split_csv_line(header_line)
        .iter()
        .map(|h| normalize_header(h))
        .collect();

    Ok(rows
        .iter()
        .map(|line| {
            let values = split_csv_line(line);
            record_from(
                |name| {
                    headers
                        .iter()
                        .position(|h| h == name)
                        .and_then(|i| values.get(i).cloned())
                },
                sheet_source,
            )
        })
        .collect())
}

/// Load documents from a `.csv` or `.json` file.
pub fn load_file(path: &Path, sheet_source: &str) -> Result<Vec<KnowledgeDocument>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read import file: {}", path.display()))?;
    let is_csv = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("csv"))
        .unwrap_or(false);
    if is_csv {
        parse_csv(&text, sheet_source)
    } else {
        parse_json(&text, sheet_source)
    }
}

/// Normalise, drop unindexable rows and collapse in-file duplicates. The
/// first occurrence of a duplicate wins.
pub fn prepare(docs: Vec<KnowledgeDocument>, report: &mut ImportReport) -> Vec<KnowledgeDocument> {
    report.read += docs.len();
    let mut seen = HashSet::new();
    let mut kept = Vec::new();
    for doc in docs.into_iter().map(KnowledgeDocument::normalized) {
        if !doc.is_indexable() {
            report.unindexable += 1;
            continue;
        }
        if !seen.insert(doc.dedup_hash()) {
            report.duplicates += 1;
            continue;
        }
        kept.push(doc);
    }
    kept
}

fn pick_slot(keys: &KeySet) -> Option<CredentialSlot> {
    select_key(keys, &mut rand::thread_rng()).cloned()
}

/// Import documents into `store`. Without an embedder, documents are
/// inserted without vectors.
pub async fn import_documents(
    store: &dyn KnowledgeStore,
    embedder: Option<&Embedder>,
    ledger: Option<&UsageLedger>,
    docs: Vec<KnowledgeDocument>,
) -> Result<ImportReport> {
    let mut report = ImportReport::default();
    let prepared = prepare(docs, &mut report);

    let mut fresh = Vec::with_capacity(prepared.len());
    for doc in prepared {
        if store.has_document(&doc.dedup_hash()).await? {
            report.duplicates += 1;
        } else {
            fresh.push(doc);
        }
    }

    let embedder = embedder.filter(|e| !e.keys.is_empty());
    let total_batches = fresh.len().div_ceil(EMBED_BATCH_SIZE);
    let mut ready = Vec::with_capacity(fresh.len());

    for (batch_no, batch) in fresh.chunks(EMBED_BATCH_SIZE).enumerate() {
        let Some(embedder) = embedder else {
            ready.extend(batch.iter().cloned());
            continue;
        };
        info!(batch = batch_no + 1, total = total_batches, "Embedding batch");

        let mut all_ok = true;
        let mut last_slot = None;
        for doc in batch {
            let mut doc = doc.clone();
            if let Some(slot) = pick_slot(&embedder.keys) {
                match embedder.provider.embed(slot.secret(), &doc.embedding_text()).await {
                    Ok(values) => {
                        doc.embedding = Some(values);
                        report.embedded += 1;
                    }
                    Err(e) => {
                        warn!(kind = %e.kind(), key = slot.key_suffix(), error = %e, "Document embedding failed");
                        report.embedding_failures += 1;
                        all_ok = false;
                    }
                }
                last_slot = Some(slot);
            }
            ready.push(doc);
        }

        if let (Some(ledger), Some(slot)) = (ledger, last_slot) {
            let event = UsageEvent::new(slot.provider, slot.ledger_index(), all_ok);
            if let Err(e) = ledger.record(&event).await {
                warn!(kind = %ErrorKind::LoggingFailure, error = %e, "Failed to write usage snapshot");
            }
        }
    }

    report.inserted = store.insert_documents(&ready).await?;
    Ok(report)
}

/// Run the import command.
pub async fn run_import(
    config: &Config,
    secrets: &Secrets,
    path: &Path,
    sheet_source: &str,
    skip_embeddings: bool,
) -> Result<()> {
    let docs = load_file(path, sheet_source)?;
    let store = Arc::new(SqliteStore::open(config).await?);
    let ledger = UsageLedger::from_config(store.clone(), config, local_offset())?;

    let embedder = if skip_embeddings || secrets.embedding.is_empty() {
        if !skip_embeddings {
            println!("No embedding key configured; importing without vectors.");
        }
        None
    } else {
        Some(Embedder {
            provider: Providers::from_config(config)?.gemini,
            keys: secrets.embedding.clone(),
        })
    };

    let report = import_documents(&*store, embedder.as_ref(), Some(&ledger), docs).await?;

    println!("Import {}", path.display());
    println!("  read:        {}", report.read);
    println!("  skipped:     {} unindexable, {} duplicate", report.unindexable, report.duplicates);
    if embedder.is_some() {
        println!(
            "  embedded:    {} ok, {} failed",
            report.embedded, report.embedding_failures
        );
    }
    println!("  inserted:    {}", report.inserted);
    Ok(())
}

/// Run the clear command.
pub async fn run_clear(config: &Config, sheet_source: Option<&str>) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let deleted = store.clear_documents(sheet_source).await?;
    match sheet_source {
        Some(src) => println!("Deleted {} documents from source '{}'.", deleted, src),
        None => println!("Deleted {} documents.", deleted),
    }
    Ok(())
}
