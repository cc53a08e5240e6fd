//! Circuit breaker and per-bucket health counters.
//!
//! Both are fed by the same server feedback the rate limiter receives and
//! live inside its buckets; this module only holds the state machines and
//! the snapshot types.

use relay_proto::ProviderId;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Consecutive failures that open the breaker.
pub const BREAKER_FAILURE_THRESHOLD: u32 = 5;
/// How long an open breaker rejects calls before admitting a trial call.
pub const BREAKER_COOL_OFF: Duration = Duration::from_secs(30);
/// Latency samples kept per bucket.
pub const LATENCY_SAMPLES: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half-open",
        })
    }
}

/// Outcome of one attempt as the breaker and health counters see it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The server answered with this status.
    Status(u16),
    /// The request never produced a response.
    Transport,
}

impl Outcome {
    /// 429, 5xx and transport errors count against the breaker.
    pub fn is_failure(self) -> bool {
        match self {
            Self::Status(code) => code == 429 || code >= 500,
            Self::Transport => true,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Breaker {
    state: BreakerState,
    consecutive_failures: u32,
    open_until: Option<Instant>,
    /// While half-open, when the outstanding trial call's lease runs out. A trial
    /// that never reports back stops blocking the bucket after this.
    trial_until: Option<Instant>,
    threshold: u32,
    cool_off: Duration,
}

impl Default for Breaker {
    fn default() -> Self {
        Self::new(BREAKER_FAILURE_THRESHOLD, BREAKER_COOL_OFF)
    }
}

impl Breaker {
    pub(crate) fn new(threshold: u32, cool_off: Duration) -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            open_until: None,
            trial_until: None,
            threshold: threshold.max(1),
            cool_off,
        }
    }

    /// `Err(retry_in)` when the call must be rejected.
    pub(crate) fn admit(&mut self, now: Instant) -> Result<(), Duration> {
        match self.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => {
                let until = self.open_until.unwrap_or(now);
                if until > now {
                    return Err(until - now);
                }
                self.state = BreakerState::HalfOpen;
                self.lease_trial(now);
                Ok(())
            }
            BreakerState::HalfOpen => match self.trial_until {
                Some(until) if until > now => Err(until - now),
                _ => {
                    self.lease_trial(now);
                    Ok(())
                }
            },
        }
    }

    fn lease_trial(&mut self, now: Instant) {
        self.trial_until = now.checked_add(self.cool_off);
    }

    pub(crate) fn record(&mut self, outcome: Outcome, now: Instant) {
        if !outcome.is_failure() {
            self.state = BreakerState::Closed;
            self.consecutive_failures = 0;
            self.open_until = None;
            self.trial_until = None;
            return;
        }
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let trip = match self.state {
            BreakerState::HalfOpen => true,
            BreakerState::Closed => self.consecutive_failures >= self.threshold,
            BreakerState::Open => false,
        };
        if trip {
            self.state = BreakerState::Open;
            self.open_until = now.checked_add(self.cool_off);
            self.trial_until = None;
        }
    }

    pub(crate) fn state(&self, now: Instant) -> BreakerState {
        match (self.state, self.open_until) {
            (BreakerState::Open, Some(until)) if until <= now => BreakerState::HalfOpen,
            (state, _) => state,
        }
    }

    pub(crate) fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub(crate) fn retry_in(&self, now: Instant) -> Option<Duration> {
        match self.state {
            BreakerState::Open => self
                .open_until
                .map(|until| until.saturating_duration_since(now)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct HealthStats {
    requests: u64,
    success: u64,
    too_many_requests: u64,
    server_errors: u64,
    transport_errors: u64,
    latencies_ms: VecDeque<u64>,
}

impl HealthStats {
    pub(crate) fn record(&mut self, outcome: Outcome, latency: Duration) {
        self.requests += 1;
        match outcome {
            Outcome::Status(code) if (200..300).contains(&code) => self.success += 1,
            Outcome::Status(429) => self.too_many_requests += 1,
            Outcome::Status(code) if code >= 500 => self.server_errors += 1,
            Outcome::Transport => self.transport_errors += 1,
            Outcome::Status(_) => {}
        }
        if self.latencies_ms.len() == LATENCY_SAMPLES {
            self.latencies_ms.pop_front();
        }
        self.latencies_ms
            .push_back(u64::try_from(latency.as_millis()).unwrap_or(u64::MAX));
    }

    fn percentile(&self, p: f64) -> u64 {
        if self.latencies_ms.is_empty() {
            return 0;
        }
        let mut sorted: Vec<u64> = self.latencies_ms.iter().copied().collect();
        sorted.sort_unstable();
        let rank = (p * sorted.len() as f64).ceil() as usize;
        sorted[rank.clamp(1, sorted.len()) - 1]
    }
}

/// Health counters for one (provider, subject) bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthEntry {
    pub provider: ProviderId,
    pub subject: String,
    pub requests: u64,
    pub success: u64,
    pub too_many_requests: u64,
    pub server_errors_5xx: u64,
    pub transport_errors: u64,
    pub p50_latency_ms: u64,
    pub p95_latency_ms: u64,
}

impl HealthEntry {
    pub(crate) fn from_stats(provider: ProviderId, subject: &str, stats: &HealthStats) -> Self {
        Self {
            provider,
            subject: subject.to_string(),
            requests: stats.requests,
            success: stats.success,
            too_many_requests: stats.too_many_requests,
            server_errors_5xx: stats.server_errors,
            transport_errors: stats.transport_errors,
            p50_latency_ms: stats.percentile(0.50),
            p95_latency_ms: stats.percentile(0.95),
        }
    }
}

/// Breaker state for one (provider, subject) bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerEntry {
    pub provider: ProviderId,
    pub subject: String,
    pub state: BreakerState,
    pub consecutive_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_in_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breaker_opens_after_threshold() {
        let now = Instant::now();
        let mut breaker = Breaker::default();
        for _ in 0..BREAKER_FAILURE_THRESHOLD - 1 {
            breaker.record(Outcome::Status(503), now);
        }
        assert!(breaker.admit(now).is_ok());
        breaker.record(Outcome::Transport, now);
        let retry_in = breaker.admit(now).unwrap_err();
        assert_eq!(retry_in, BREAKER_COOL_OFF);
        assert_eq!(breaker.state(now), BreakerState::Open);
    }

    #[test]
    fn test_breaker_half_open_admits_one_trial() {
        let now = Instant::now();
        let mut breaker = Breaker::new(1, Duration::from_millis(10));
        breaker.record(Outcome::Status(429), now);
        let later = now + Duration::from_millis(20);
        assert_eq!(breaker.state(later), BreakerState::HalfOpen);
        assert!(breaker.admit(later).is_ok());
        assert!(breaker.admit(later).is_err());

        breaker.record(Outcome::Status(500), later);
        assert_eq!(breaker.state(later), BreakerState::Open);
    }

    #[test]
    fn test_unreported_trial_lease_expires() {
        let now = Instant::now();
        let cool_off = Duration::from_secs(30);
        let mut breaker = Breaker::new(1, cool_off);
        breaker.record(Outcome::Transport, now);

        let trial_at = now + cool_off;
        assert!(breaker.admit(trial_at).is_ok());
        let almost = trial_at + cool_off - Duration::from_millis(1);
        assert_eq!(breaker.admit(almost), Err(Duration::from_millis(1)));

        let expired = trial_at + cool_off;
        assert!(breaker.admit(expired).is_ok());
        assert!(breaker.admit(expired).is_err());
        breaker.record(Outcome::Status(200), expired);
        assert!(breaker.admit(expired).is_ok());
    }

    #[test]
    fn test_breaker_closes_on_success() {
        let now = Instant::now();
        let mut breaker = Breaker::new(2, Duration::from_secs(30));
        breaker.record(Outcome::Status(502), now);
        breaker.record(Outcome::Status(502), now);
        breaker.record(Outcome::Status(200), now);
        assert_eq!(breaker.state(now), BreakerState::Closed);
        assert_eq!(breaker.consecutive_failures(), 0);
        assert!(breaker.admit(now).is_ok());
    }

    #[test]
    fn test_client_errors_do_not_trip_breaker() {
        let now = Instant::now();
        let mut breaker = Breaker::new(1, Duration::from_secs(30));
        breaker.record(Outcome::Status(404), now);
        assert_eq!(breaker.state(now), BreakerState::Closed);
    }

    #[test]
    fn test_health_counts_and_percentiles() {
        let mut stats = HealthStats::default();
        stats.record(Outcome::Status(200), Duration::from_millis(100));
        stats.record(Outcome::Status(429), Duration::from_millis(220));
        stats.record(Outcome::Status(502), Duration::from_millis(340));
        let entry = HealthEntry::from_stats(ProviderId::Cloudflare, "core", &stats);
        assert_eq!(entry.requests, 3);
        assert_eq!(entry.success, 1);
        assert_eq!(entry.too_many_requests, 1);
        assert_eq!(entry.server_errors_5xx, 1);
        assert_eq!(entry.p50_latency_ms, 220);
        assert_eq!(entry.p95_latency_ms, 340);
    }

    #[test]
    fn test_latency_window_is_bounded() {
        let mut stats = HealthStats::default();
        for ms in 0..(LATENCY_SAMPLES as u64 + 10) {
            stats.record(Outcome::Status(200), Duration::from_millis(ms));
        }
        assert_eq!(stats.latencies_ms.len(), LATENCY_SAMPLES);
        assert_eq!(stats.latencies_ms.front(), Some(&10));
    }
}
