//! Token-bucket rate limiting keyed by (provider, subject).
//!
//! Besides the bucket itself, each key carries:
//! - a cooldown set from server feedback (`Retry-After`, exhausted
//!   `X-RateLimit-Remaining` with `X-RateLimit-Reset`)
//! - a circuit breaker
//! - an optional in-flight concurrency cap
//! - health counters
//!
//! The bucket map sits behind one mutex that is never held across an await.

use crate::context::CallContext;
use crate::error::{RelayError, Result};
use crate::headers::{self, Headers};
use crate::health::{Breaker, BreakerEntry, HealthEntry, HealthStats, Outcome};
use crate::providers::ProviderSpec;
use crate::retry;
use chrono::Utc;
use relay_proto::ProviderId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Values above this in `X-RateLimit-Reset` are read as a Unix epoch.
const RESET_EPOCH_THRESHOLD: i64 = 1_000_000_000;
/// Longest cooldown server feedback can put on a bucket.
pub const MAX_COOLDOWN: Duration = retry::MAX_RETRY_AFTER;

/// Rate, burst and concurrency for one provider.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitPolicy {
    pub rate_per_sec: f64,
    pub burst: u32,
    /// `0` disables the concurrency cap.
    pub max_concurrency: usize,
}

impl RateLimitPolicy {
    pub fn new(rate_per_sec: f64, burst: u32) -> Self {
        Self {
            rate_per_sec,
            burst,
            max_concurrency: 0,
        }
    }

    pub fn with_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    fn capacity(&self) -> f64 {
        f64::from(self.burst.max(1))
    }

    fn rate(&self) -> f64 {
        if self.rate_per_sec.is_finite() && self.rate_per_sec > 0.0 {
            self.rate_per_sec
        } else {
            1.0
        }
    }
}

impl From<&ProviderSpec> for RateLimitPolicy {
    fn from(spec: &ProviderSpec) -> Self {
        Self {
            rate_per_sec: spec.rate_per_sec,
            burst: spec.burst,
            max_concurrency: spec.max_concurrency,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BucketKey {
    provider: ProviderId,
    subject: String,
}

impl BucketKey {
    fn new(provider: ProviderId, subject: &str) -> Self {
        Self {
            provider,
            subject: subject.trim().to_string(),
        }
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    capacity: f64,
    rate: f64,
    last_refill: Instant,
    cooldown_until: Option<Instant>,
    slots: Option<Arc<Semaphore>>,
    breaker: Breaker,
    health: HealthStats,
}

impl Bucket {
    fn new(policy: &RateLimitPolicy, now: Instant) -> Self {
        Self {
            tokens: policy.capacity(),
            capacity: policy.capacity(),
            rate: policy.rate(),
            last_refill: now,
            cooldown_until: None,
            slots: (policy.max_concurrency > 0)
                .then(|| Arc::new(Semaphore::new(policy.max_concurrency))),
            breaker: Breaker::default(),
            health: HealthStats::default(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
            self.last_refill = now;
        }
    }

    /// `Ok` when a token was taken, `Err(wait)` otherwise.
    fn try_take(&mut self, now: Instant) -> std::result::Result<(), Duration> {
        if let Some(until) = self.cooldown_until {
            if until > now {
                return Err(until - now);
            }
            self.cooldown_until = None;
        }
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return Ok(());
        }
        Err(Duration::try_from_secs_f64((1.0 - self.tokens) / self.rate).unwrap_or(MAX_COOLDOWN))
    }

    fn extend_cooldown(&mut self, until: Instant) {
        if self.cooldown_until.is_none_or(|current| current < until) {
            self.cooldown_until = Some(until);
        }
    }
}

/// Proof that an attempt was admitted. Dropping it frees the concurrency slot.
#[derive(Debug)]
pub struct Permit {
    _slot: Option<OwnedSemaphorePermit>,
}

/// Shared rate limiter. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    buckets: Mutex<HashMap<BucketKey, Bucket>>,
    policies: Mutex<HashMap<ProviderId, RateLimitPolicy>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the registry defaults for `provider`. Applies to buckets
    /// created afterwards.
    pub fn set_policy(&self, provider: ProviderId, policy: RateLimitPolicy) {
        if let Ok(mut policies) = self.inner.policies.lock() {
            policies.insert(provider, policy);
        }
    }

    pub fn policy(&self, provider: ProviderId) -> RateLimitPolicy {
        self.inner
            .policies
            .lock()
            .ok()
            .and_then(|policies| policies.get(&provider).copied())
            .unwrap_or_else(|| RateLimitPolicy::from(ProviderSpec::get(provider)))
    }

    fn buckets(&self) -> MutexGuard<'_, HashMap<BucketKey, Bucket>> {
        // A poisoned map only means another caller panicked mid-update; the
        // counters are still usable.
        self.inner
            .buckets
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Waits for a token for `(provider, subject)`.
    ///
    /// Fails with `CircuitOpen` without waiting while the breaker is open,
    /// with `DeadlineExceeded` as soon as the required wait would cross the
    /// caller's deadline, and with `Cancelled` when the token fires.
    pub async fn acquire(
        &self,
        provider: ProviderId,
        subject: &str,
        ctx: &CallContext,
    ) -> Result<Permit> {
        let key = BucketKey::new(provider, subject);
        let policy = self.policy(provider);
        let slots = loop {
            ctx.check()?;
            let wait = {
                let mut buckets = self.buckets();
                let now = Instant::now();
                let bucket = buckets
                    .entry(key.clone())
                    .or_insert_with(|| Bucket::new(&policy, now));
                if let Err(retry_in) = bucket.breaker.admit(now) {
                    return Err(RelayError::CircuitOpen {
                        provider,
                        subject: key.subject.clone(),
                        retry_in,
                    });
                }
                match bucket.try_take(now) {
                    Ok(()) => break bucket.slots.clone(),
                    Err(wait) => wait,
                }
            };
            debug!(provider = %provider, subject = %key.subject, wait_ms = wait.as_millis() as u64, "rate limit wait");
            ctx.sleep(wait).await?;
        };

        let slot = match slots {
            Some(semaphore) => {
                let acquired = ctx.run(semaphore.acquire_owned()).await?;
                Some(acquired.map_err(|_| RelayError::Cancelled)?)
            }
            None => None,
        };
        Ok(Permit { _slot: slot })
    }

    /// Reports a response so cooldown, breaker and health track the server.
    pub fn feedback(
        &self,
        provider: ProviderId,
        subject: &str,
        status: u16,
        response_headers: &Headers,
        latency: Duration,
    ) {
        let now = Instant::now();
        let cooldown = cooldown_from(status, response_headers);
        let key = BucketKey::new(provider, subject);
        let policy = self.policy(provider);
        let mut buckets = self.buckets();
        let bucket = buckets
            .entry(key)
            .or_insert_with(|| Bucket::new(&policy, now));
        if let Some(wait) = cooldown {
            warn!(provider = %provider, status, cooldown_ms = wait.as_millis() as u64, "server requested cooldown");
            if let Some(until) = now.checked_add(wait) {
                bucket.extend_cooldown(until);
            }
        }
        bucket.breaker.record(Outcome::Status(status), now);
        bucket.health.record(Outcome::Status(status), latency);
    }

    /// Reports an attempt that never got a response.
    pub fn feedback_transport_error(&self, provider: ProviderId, subject: &str, latency: Duration) {
        let now = Instant::now();
        let key = BucketKey::new(provider, subject);
        let policy = self.policy(provider);
        let mut buckets = self.buckets();
        let bucket = buckets
            .entry(key)
            .or_insert_with(|| Bucket::new(&policy, now));
        bucket.breaker.record(Outcome::Transport, now);
        bucket.health.record(Outcome::Transport, latency);
    }

    /// Health counters for every bucket of `provider`, sorted by subject.
    pub fn health_snapshot(&self, provider: ProviderId) -> Vec<HealthEntry> {
        let buckets = self.buckets();
        let mut entries: Vec<HealthEntry> = buckets
            .iter()
            .filter(|(key, _)| key.provider == provider)
            .map(|(key, bucket)| HealthEntry::from_stats(key.provider, &key.subject, &bucket.health))
            .collect();
        entries.sort_by(|a, b| a.subject.cmp(&b.subject));
        entries
    }

    /// Breaker state of every bucket, sorted by provider then subject.
    pub fn breaker_snapshot(&self) -> Vec<BreakerEntry> {
        let now = Instant::now();
        let buckets = self.buckets();
        let mut entries: Vec<BreakerEntry> = buckets
            .iter()
            .map(|(key, bucket)| BreakerEntry {
                provider: key.provider,
                subject: key.subject.clone(),
                state: bucket.breaker.state(now),
                consecutive_failures: bucket.breaker.consecutive_failures(),
                retry_in_ms: bucket
                    .breaker
                    .retry_in(now)
                    .map(|wait| wait.as_millis() as u64),
            })
            .collect();
        entries.sort_by(|a, b| (a.provider, &a.subject).cmp(&(b.provider, &b.subject)));
        entries
    }

    /// Drops all buckets.
    pub fn reset(&self) {
        self.buckets().clear();
    }
}

/// Cooldown requested by the server, if any, capped at [`MAX_COOLDOWN`].
fn cooldown_from(status: u16, response_headers: &Headers) -> Option<Duration> {
    requested_cooldown(status, response_headers).map(|wait| wait.min(MAX_COOLDOWN))
}

fn requested_cooldown(status: u16, response_headers: &Headers) -> Option<Duration> {
    if matches!(status, 429 | 503)
        && let Some(wait) = retry::retry_after(response_headers)
    {
        return Some(wait);
    }
    let remaining = headers::get(response_headers, "x-ratelimit-remaining")?;
    if remaining.parse::<f64>().ok()? > 0.0 {
        return None;
    }
    let reset: i64 = headers::get(response_headers, "x-ratelimit-reset")?
        .parse::<f64>()
        .ok()? as i64;
    if reset > RESET_EPOCH_THRESHOLD {
        let secs = reset - Utc::now().timestamp();
        return Some(Duration::from_secs(u64::try_from(secs).unwrap_or(0)));
    }
    Some(Duration::from_secs(u64::try_from(reset).unwrap_or(0)))
}
