//! Per-key quota overview.
//!
//! Used by `unai usage` and `GET /usage`. Remaining counts apply the same
//! daily-reset rule as the ledger, so a key last used yesterday shows a
//! full bucket.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

use unai_core::keys::{KeySet, ProviderTag};

use crate::config::{Config, Secrets};
use crate::ledger::UsageLedger;
use crate::orchestrator::local_offset;
use crate::sqlite_store::SqliteStore;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyUsage {
    pub provider: ProviderTag,
    pub key_index: i64,
    /// Last four characters of the key.
    pub key_suffix: String,
    pub requests_remaining: i64,
    pub requests_limit: i64,
    pub tokens_remaining: Option<i64>,
    pub tokens_limit: Option<i64>,
    pub reset_in: String,
    pub last_used: Option<DateTime<Utc>>,
}

/// One row per configured ledger index. Embedding keys share index 21 and
/// are reported once.
pub async fn usage_report(
    ledger: &UsageLedger,
    secrets: &Secrets,
    now: DateTime<Utc>,
) -> Result<Vec<KeyUsage>> {
    let mut rows: Vec<KeyUsage> = Vec::new();
    let sets: [&KeySet; 3] = [&secrets.groq, &secrets.gemini, &secrets.embedding];

    for set in sets {
        for slot in set.slots() {
            let key_index = slot.ledger_index();
            if rows.iter().any(|r| r.key_index == key_index) {
                continue;
            }
            let policy = ledger.policy(slot.provider);
            let latest = ledger.store().latest_snapshot(key_index).await?;
            let current_day = latest
                .as_ref()
                .filter(|s| policy.is_current(s, now));

            rows.push(KeyUsage {
                provider: slot.provider,
                key_index,
                key_suffix: slot.key_suffix().to_string(),
                requests_remaining: policy.prior_remaining(latest.as_ref(), now),
                requests_limit: current_day
                    .and_then(|s| s.requests_limit)
                    .unwrap_or(policy.daily_limit),
                tokens_remaining: current_day.and_then(|s| s.tokens_remaining),
                tokens_limit: current_day.and_then(|s| s.tokens_limit),
                reset_in: ledger.clock().format_until_reset(now),
                last_used: latest.as_ref().map(|s| s.timestamp),
            });
        }
    }

    Ok(rows)
}

/// Run the usage command: print remaining quota per configured key.
pub async fn run_usage(config: &Config, secrets: &Secrets) -> Result<()> {
    let store = std::sync::Arc::new(SqliteStore::open(config).await?);
    let ledger = UsageLedger::from_config(store, config, local_offset())?;
    let now = Utc::now();
    let rows = usage_report(&ledger, secrets, now).await?;

    println!("UNAi — API Usage");
    println!("================");
    println!();

    if rows.is_empty() {
        println!("  No provider keys configured.");
        println!();
        return Ok(());
    }

    println!(
        "  {:<10} {:>5} {:>8} {:>12} {:>8}   {}",
        "PROVIDER", "INDEX", "KEY", "REMAINING", "LIMIT", "LAST USED"
    );
    println!("  {}", "-".repeat(68));
    for r in &rows {
        let last = r
            .last_used
            .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "  {:<10} {:>5} {:>8} {:>12} {:>8}   {}",
            r.provider.as_str(),
            r.key_index,
            format!("…{}", r.key_suffix),
            r.requests_remaining,
            r.requests_limit,
            last
        );
    }
    println!();
    println!("  Resets in {}", ledger.clock().format_until_reset(now));
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use chrono::{FixedOffset, TimeZone};
    use std::sync::Arc;
    use unai_core::quota::QuotaSnapshot;
    use unai_core::store::memory::InMemoryStore;
    use unai_core::store::UsageStore;

    fn at(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, d, h, 0, 0).unwrap()
    }

    fn secrets() -> Secrets {
        Secrets::from_lookup(|name| match name {
            "GROQ_API_KEY_1" => Some("gsk_aaaa1111".to_string()),
            "GEMINI_API_KEY_1" => Some("AIza_bbbb2222".to_string()),
            "GEMINI_API_KEY_2" => Some("AIza_cccc3333".to_string()),
            _ => None,
        })
    }

    async fn ledger_with(snapshots: Vec<QuotaSnapshot>) -> UsageLedger {
        let store = Arc::new(InMemoryStore::new());
        for s in &snapshots {
            store.append_snapshot(s).await.unwrap();
        }
        let config =
            parse_config("[db]\npath = \"unused.sqlite\"\n\n[server]\nbind = \"127.0.0.1:0\"\n")
                .unwrap();
        UsageLedger::from_config(store, &config, FixedOffset::east_opt(0).unwrap()).unwrap()
    }

    fn snap(provider: ProviderTag, key_index: i64, remaining: i64, ts: DateTime<Utc>) -> QuotaSnapshot {
        QuotaSnapshot {
            provider,
            key_index,
            requests_remaining: Some(remaining),
            requests_limit: Some(if provider == ProviderTag::Groq { 14400 } else { 1500 }),
            tokens_remaining: None,
            tokens_limit: None,
            reset_time: None,
            succeeded: true,
            timestamp: ts,
        }
    }

    #[tokio::test]
    async fn test_one_row_per_ledger_index() {
        let ledger = ledger_with(vec![]).await;
        let rows = usage_report(&ledger, &secrets(), at(2, 10)).await.unwrap();
        let indices: Vec<i64> = rows.iter().map(|r| r.key_index).collect();
        // Two Gemini keys back the embedding slot but index 21 appears once.
        assert_eq!(indices, vec![1, 11, 12, 21]);
        assert!(rows.iter().all(|r| r.last_used.is_none()));
        assert_eq!(rows[0].key_suffix, "1111");
        assert_eq!(rows[0].requests_remaining, 14400);
    }

    #[tokio::test]
    async fn test_applies_daily_reset() {
        let ledger = ledger_with(vec![
            snap(ProviderTag::Gemini, 11, 3, at(1, 20)),
            snap(ProviderTag::Gemini, 12, 700, at(2, 9)),
        ])
        .await;
        let rows = usage_report(&ledger, &secrets(), at(2, 10)).await.unwrap();
        let g1 = rows.iter().find(|r| r.key_index == 11).unwrap();
        let g2 = rows.iter().find(|r| r.key_index == 12).unwrap();
        assert_eq!(g1.requests_remaining, 1500);
        assert_eq!(g1.last_used, Some(at(1, 20)));
        assert_eq!(g2.requests_remaining, 700);
        assert_eq!(g2.reset_in, "22h0m");
    }
}
