//! Quota snapshots, daily reset, and client-side remaining estimation.
//!
//! The usage ledger is append-only: every generation or embedding attempt
//! appends one [`QuotaSnapshot`] for the credential it used. "Current
//! remaining" for a key is read from its most recent snapshot, subject to
//! the daily-reset rule implemented by [`QuotaPolicy::prior_remaining`].
//!
//! Two paths produce snapshots:
//!
//! - **Reported** — the provider returned authoritative counts in its
//!   response headers. [`QuotaReport::from_headers`] parses them and
//!   [`QuotaReport::into_snapshot`] records them verbatim.
//! - **Estimated** — the provider reports nothing, so
//!   [`estimate_snapshot`] decrements the previous value locally.
//!
//! The read-then-append update is not atomic. Two concurrent requests on the
//! same key may both decrement from the same base, so the estimate can
//! overstate what is left. The ledger is advisory telemetry; nothing blocks
//! a request based on it.

use anyhow::{bail, Result};
use chrono::{DateTime, Duration, FixedOffset, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::keys::ProviderTag;

/// Default hour (UTC) at which provider quotas roll over; models a
/// US-Pacific midnight boundary.
pub const DEFAULT_RESET_HOUR_UTC: u32 = 8;

/// One point-in-time record of a credential's remaining allowance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaSnapshot {
    pub provider: ProviderTag,
    /// Global ledger index (see [`crate::keys::ledger_index`]).
    pub key_index: i64,
    pub requests_remaining: Option<i64>,
    pub requests_limit: Option<i64>,
    pub tokens_remaining: Option<i64>,
    pub tokens_limit: Option<i64>,
    pub reset_time: Option<String>,
    /// Whether the attempt this snapshot records succeeded.
    pub succeeded: bool,
    pub timestamp: DateTime<Utc>,
}

/// Computes the next daily reset instant for a fixed UTC hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetClock {
    reset_hour_utc: u32,
}

impl Default for ResetClock {
    fn default() -> Self {
        Self {
            reset_hour_utc: DEFAULT_RESET_HOUR_UTC,
        }
    }
}

impl ResetClock {
    pub fn new(reset_hour_utc: u32) -> Result<Self> {
        if reset_hour_utc > 23 {
            bail!("reset hour must be in 0..=23, got {}", reset_hour_utc);
        }
        Ok(Self { reset_hour_utc })
    }

    pub fn reset_hour_utc(&self) -> u32 {
        self.reset_hour_utc
    }

    /// Today's reset if the current UTC hour is before the reset hour,
    /// otherwise tomorrow's.
    pub fn next_reset(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.date_naive();
        let day = if now.hour() >= self.reset_hour_utc {
            today.succ_opt().unwrap_or(today)
        } else {
            today
        };
        let naive = day
            .and_hms_opt(self.reset_hour_utc, 0, 0)
            .unwrap_or_else(|| day.and_time(chrono::NaiveTime::MIN));
        Utc.from_utc_datetime(&naive)
    }

    pub fn until_reset(&self, now: DateTime<Utc>) -> Duration {
        let remaining = self.next_reset(now) - now;
        remaining.max(Duration::zero())
    }

    /// Remaining time until reset as `"{hours}h{minutes}m"`.
    pub fn format_until_reset(&self, now: DateTime<Utc>) -> String {
        format_hours_minutes(self.until_reset(now))
    }
}

/// Format a duration as `"{hours}h{minutes}m"`, truncating seconds.
pub fn format_hours_minutes(d: Duration) -> String {
    let total_minutes = d.num_minutes().max(0);
    format!("{}h{}m", total_minutes / 60, total_minutes % 60)
}

/// Daily allowance for one provider plus the timezone that defines a
/// calendar day for reset purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaPolicy {
    pub daily_limit: i64,
    pub local_offset: FixedOffset,
}

impl QuotaPolicy {
    pub fn new(daily_limit: i64, local_offset: FixedOffset) -> Self {
        Self {
            daily_limit,
            local_offset,
        }
    }

    /// Remaining allowance before the current attempt.
    ///
    /// A missing snapshot, or one recorded on a different local calendar
    /// day than `now`, means a full bucket.
    pub fn prior_remaining(&self, latest: Option<&QuotaSnapshot>, now: DateTime<Utc>) -> i64 {
        match latest {
            Some(snap) if self.same_local_day(snap.timestamp, now) => snap
                .requests_remaining
                .unwrap_or(self.daily_limit)
                .max(0),
            _ => self.daily_limit,
        }
    }

    /// Remaining allowance to record after the attempt. Failed attempts do
    /// not consume quota; the result never goes below zero.
    pub fn next_remaining(
        &self,
        latest: Option<&QuotaSnapshot>,
        succeeded: bool,
        now: DateTime<Utc>,
    ) -> i64 {
        let prior = self.prior_remaining(latest, now);
        if succeeded {
            (prior - 1).max(0)
        } else {
            prior
        }
    }

    /// Whether a snapshot belongs to the same local calendar day as `now`.
    pub fn is_current(&self, snapshot: &QuotaSnapshot, now: DateTime<Utc>) -> bool {
        self.same_local_day(snapshot.timestamp, now)
    }

    fn same_local_day(&self, a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
        a.with_timezone(&self.local_offset).date_naive()
            == b.with_timezone(&self.local_offset).date_naive()
    }
}

/// Build the snapshot for an attempt against a provider that does not
/// report usage itself.
pub fn estimate_snapshot(
    policy: &QuotaPolicy,
    clock: &ResetClock,
    provider: ProviderTag,
    key_index: i64,
    latest: Option<&QuotaSnapshot>,
    succeeded: bool,
    now: DateTime<Utc>,
) -> QuotaSnapshot {
    QuotaSnapshot {
        provider,
        key_index,
        requests_remaining: Some(policy.next_remaining(latest, succeeded, now)),
        requests_limit: Some(policy.daily_limit),
        tokens_remaining: None,
        tokens_limit: None,
        reset_time: Some(clock.format_until_reset(now)),
        succeeded,
        timestamp: now,
    }
}

/// Rate-limit counts reported by a provider in its response headers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaReport {
    pub requests_remaining: Option<i64>,
    pub requests_limit: Option<i64>,
    pub tokens_remaining: Option<i64>,
    pub tokens_limit: Option<i64>,
    pub reset_requests: Option<String>,
}

impl QuotaReport {
    /// Parse rate-limit headers. Accepts both bare names
    /// (`remaining-requests`) and the `x-ratelimit-` prefixed form, case
    /// insensitively. Returns `None` when no request count is present.
    pub fn from_headers<'a, I>(headers: I) -> Option<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut report = QuotaReport::default();
        for (name, value) in headers {
            let name = name.to_ascii_lowercase();
            let key = name.strip_prefix("x-ratelimit-").unwrap_or(&name);
            let value = value.trim();
            match key {
                "remaining-requests" => report.requests_remaining = value.parse().ok(),
                "limit-requests" => report.requests_limit = value.parse().ok(),
                "remaining-tokens" => report.tokens_remaining = value.parse().ok(),
                "limit-tokens" => report.tokens_limit = value.parse().ok(),
                "reset-requests" if !value.is_empty() => {
                    report.reset_requests = Some(value.to_string())
                }
                _ => {}
            }
        }
        if report.requests_remaining.is_none() && report.requests_limit.is_none() {
            return None;
        }
        Some(report)
    }

    /// Record the reported values verbatim.
    pub fn into_snapshot(
        self,
        provider: ProviderTag,
        key_index: i64,
        succeeded: bool,
        now: DateTime<Utc>,
    ) -> QuotaSnapshot {
        QuotaSnapshot {
            provider,
            key_index,
            requests_remaining: self.requests_remaining,
            requests_limit: self.requests_limit,
            tokens_remaining: self.tokens_remaining,
            tokens_limit: self.tokens_limit,
            reset_time: self.reset_requests,
            succeeded,
            timestamp: now,
        }
    }
}
