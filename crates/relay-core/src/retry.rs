//! Retry classification and backoff.

use crate::headers::{self, Headers};
use chrono::{DateTime, Utc};
use rand::Rng;
use relay_proto::Method;
use std::time::Duration;

pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(300);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(3);
pub const DEFAULT_JITTER: Duration = Duration::from_millis(100);
/// Longest wait a server can impose through `Retry-After`.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// How many times, and how long to wait between, attempts of one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound of the random delay added to computed backoff.
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter: DEFAULT_JITTER,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Total attempts, never less than one.
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Transport failures are retried for safe methods only.
    pub fn retry_transport(&self, method: Method) -> bool {
        method.is_safe()
    }

    /// 429 and every 5xx are retried for safe methods only.
    pub fn retry_status(&self, method: Method, status: u16) -> bool {
        method.is_safe() && is_retryable_status(status)
    }

    /// `min(base * 2^(attempt-1), cap)` plus jitter. `attempt` is 1-based.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let computed = self
            .base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);
        computed + self.jitter_sample()
    }

    /// `Retry-After` when the server sent a usable one, backoff otherwise.
    pub fn delay_for(&self, attempt: u32, response_headers: Option<&Headers>) -> Duration {
        response_headers
            .and_then(retry_after)
            .unwrap_or_else(|| self.backoff(attempt))
    }

    fn jitter_sample(&self) -> Duration {
        let max = u64::try_from(self.jitter.as_millis()).unwrap_or(0);
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max))
    }
}

pub fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

/// Parses `Retry-After` as delta-seconds or an HTTP date.
pub fn retry_after(response_headers: &Headers) -> Option<Duration> {
    parse_retry_after(headers::get(response_headers, "retry-after")?, Utc::now())
}

pub(crate) fn parse_retry_after(raw: &str, now: DateTime<Utc>) -> Option<Duration> {
    let raw = raw.trim();
    let wait = if let Ok(seconds) = raw.parse::<u64>() {
        Duration::from_secs(seconds)
    } else if let Ok(seconds) = raw.parse::<f64>()
        && seconds >= 0.0
    {
        // Out-of-range values (1e300, inf) saturate to the ceiling.
        Duration::try_from_secs_f64(seconds).unwrap_or(MAX_RETRY_AFTER)
    } else {
        let at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
        (at - now).to_std().unwrap_or(Duration::ZERO)
    };
    Some(wait.min(MAX_RETRY_AFTER))
}
