//! Usage ledger and its background recorder.
//!
//! [`UsageLedger`] turns one attempt into one appended
//! [`QuotaSnapshot`]: verbatim when the provider reported its own counts,
//! otherwise estimated from the key's previous snapshot.
//!
//! Chat handlers never await the ledger. They hand a [`UsageEvent`] to a
//! [`UsageRecorder`], which queues it on a bounded channel drained by one
//! background task. A full queue drops the event with a warning; a failed
//! write is logged and forgotten.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, FixedOffset, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use unai_core::keys::ProviderTag;
use unai_core::quota::{estimate_snapshot, QuotaPolicy, QuotaReport, QuotaSnapshot, ResetClock};
use unai_core::store::UsageStore;

use crate::config::Config;
use crate::error::ErrorKind;

/// One finished attempt against a credential.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageEvent {
    pub provider: ProviderTag,
    /// Global ledger index of the credential used.
    pub key_index: i64,
    pub succeeded: bool,
    /// Counts reported by the provider; `None` means estimate locally.
    pub report: Option<QuotaReport>,
    pub at: DateTime<Utc>,
}

impl UsageEvent {
    pub fn new(provider: ProviderTag, key_index: i64, succeeded: bool) -> Self {
        Self {
            provider,
            key_index,
            succeeded,
            report: None,
            at: Utc::now(),
        }
    }

    pub fn with_report(mut self, report: Option<QuotaReport>) -> Self {
        self.report = report;
        self
    }
}

pub struct UsageLedger {
    store: Arc<dyn UsageStore>,
    clock: ResetClock,
    groq: QuotaPolicy,
    gemini: QuotaPolicy,
    embedding: QuotaPolicy,
}

impl UsageLedger {
    /// Build from configured limits. `local_offset` defines the calendar day
    /// used by the daily-reset rule.
    pub fn from_config(
        store: Arc<dyn UsageStore>,
        config: &Config,
        local_offset: FixedOffset,
    ) -> Result<Self> {
        let policy = |p| QuotaPolicy::new(config.daily_limit(p), local_offset);
        Ok(Self {
            store,
            clock: ResetClock::new(config.ledger.reset_hour_utc)?,
            groq: policy(ProviderTag::Groq),
            gemini: policy(ProviderTag::Gemini),
            embedding: policy(ProviderTag::Embedding),
        })
    }

    pub fn clock(&self) -> &ResetClock {
        &self.clock
    }

    pub fn policy(&self, provider: ProviderTag) -> &QuotaPolicy {
        match provider {
            ProviderTag::Groq => &self.groq,
            ProviderTag::Gemini => &self.gemini,
            ProviderTag::Embedding => &self.embedding,
        }
    }

    pub fn store(&self) -> &Arc<dyn UsageStore> {
        &self.store
    }

    /// Compute and append the snapshot for one attempt.
    ///
    /// The read of the previous snapshot and the append are separate store
    /// calls; concurrent writers for the same key can both start from the
    /// same base.
    pub async fn record(&self, event: &UsageEvent) -> Result<QuotaSnapshot> {
        let snapshot = match &event.report {
            Some(report) => report.clone().into_snapshot(
                event.provider,
                event.key_index,
                event.succeeded,
                event.at,
            ),
            None => {
                let latest = self.store.latest_snapshot(event.key_index).await?;
                estimate_snapshot(
                    self.policy(event.provider),
                    &self.clock,
                    event.provider,
                    event.key_index,
                    latest.as_ref(),
                    event.succeeded,
                    event.at,
                )
            }
        };
        self.store.append_snapshot(&snapshot).await?;
        Ok(snapshot)
    }
}

/// Fire-and-forget handle for submitting usage events.
#[derive(Clone)]
pub struct UsageRecorder {
    tx: mpsc::Sender<UsageEvent>,
}

impl UsageRecorder {
    /// Start the background writer. The returned task finishes once every
    /// clone of the recorder has been dropped and the queue is drained.
    pub fn spawn(ledger: Arc<UsageLedger>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<UsageEvent>(capacity.max(1));
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match ledger.record(&event).await {
                    Ok(snapshot) => debug!(
                        provider = %snapshot.provider,
                        key_index = snapshot.key_index,
                        remaining = ?snapshot.requests_remaining,
                        succeeded = snapshot.succeeded,
                        "Usage recorded"
                    ),
                    Err(e) => warn!(
                        kind = %ErrorKind::LoggingFailure,
                        provider = %event.provider,
                        key_index = event.key_index,
                        error = %e,
                        "Failed to write usage snapshot"
                    ),
                }
            }
        });
        (Self { tx }, handle)
    }

    /// Queue an event without waiting. Never fails the caller.
    pub fn record(&self, event: UsageEvent) {
        if let Err(e) = self.tx.try_send(event) {
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => "queue full",
                mpsc::error::TrySendError::Closed(_) => "recorder stopped",
            };
            warn!(kind = %ErrorKind::LoggingFailure, reason, "Dropped usage event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use chrono::TimeZone;
    use unai_core::store::memory::InMemoryStore;

    fn config() -> Config {
        parse_config("[db]\npath = \"unused.sqlite\"\n\n[server]\nbind = \"127.0.0.1:0\"\n").unwrap()
    }

    fn ledger(store: Arc<InMemoryStore>) -> UsageLedger {
        UsageLedger::from_config(store, &config(), FixedOffset::east_opt(0).unwrap()).unwrap()
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, h, m, 0).unwrap()
    }

    #[tokio::test]
    async fn test_estimated_sequence() {
        let store = Arc::new(InMemoryStore::new());
        let ledger = ledger(store.clone());

        let mut event = UsageEvent::new(ProviderTag::Gemini, 11, true);
        event.at = at(7, 0);
        let first = ledger.record(&event).await.unwrap();
        assert_eq!(first.requests_remaining, Some(1499));
        assert_eq!(first.reset_time.as_deref(), Some("1h0m"));

        event.at = at(7, 30);
        event.succeeded = false;
        let second = ledger.record(&event).await.unwrap();
        assert_eq!(second.requests_remaining, Some(1499));
        assert!(!second.succeeded);

        assert_eq!(store.snapshots().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_reported_values_recorded_verbatim() {
        let store = Arc::new(InMemoryStore::new());
        let ledger = ledger(store.clone());
        let report = QuotaReport {
            requests_remaining: Some(14000),
            requests_limit: Some(14400),
            tokens_remaining: Some(5000),
            tokens_limit: Some(6000),
            reset_requests: Some("6s".to_string()),
        };
        let event = UsageEvent::new(ProviderTag::Groq, 2, true).with_report(Some(report));
        let snap = ledger.record(&event).await.unwrap();
        assert_eq!(snap.requests_remaining, Some(14000));
        assert_eq!(snap.tokens_limit, Some(6000));
        assert_eq!(snap.reset_time.as_deref(), Some("6s"));
    }

    #[tokio::test]
    async fn test_embedding_uses_embedding_limit() {
        let store = Arc::new(InMemoryStore::new());
        let ledger = ledger(store);
        let snap = ledger
            .record(&UsageEvent::new(ProviderTag::Embedding, 21, true))
            .await
            .unwrap();
        assert_eq!(snap.requests_limit, Some(1500));
        assert_eq!(snap.key_index, 21);
    }

    #[tokio::test]
    async fn test_recorder_drains_queue() {
        let store = Arc::new(InMemoryStore::new());
        let (recorder, handle) = UsageRecorder::spawn(Arc::new(ledger(store.clone())), 8);
        recorder.record(UsageEvent::new(ProviderTag::Groq, 1, true));
        recorder.record(UsageEvent::new(ProviderTag::Groq, 1, false));
        drop(recorder);
        handle.await.unwrap();

        let snaps = store.snapshots().unwrap();
        assert_eq!(snaps.len(), 2);
        assert_eq!(snaps[0].requests_remaining, Some(14399));
        assert_eq!(snaps[1].requests_remaining, Some(14399));
    }
}
