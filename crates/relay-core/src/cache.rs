//! In-memory response cache with conditional revalidation.
//!
//! Entries are keyed by a SHA-256 over method, absolute URL, auth scope
//! fingerprint and accept header, so two credentials never share an entry
//! and no secret is stored in the key. A fresh entry is served directly; an
//! expired one only lends its `ETag`/`Last-Modified` validators to the next
//! request.

use crate::headers::{self, Headers};
use relay_proto::{Method, ProviderId};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

pub const DEFAULT_CAPACITY: usize = 512;

/// Computes the cache key for one logical request.
pub fn cache_key(method: Method, url: &str, auth_scope: &str, accept: &str) -> String {
    let mut hasher = Sha256::new();
    for part in [method.as_str(), url, auth_scope, accept.trim()] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

/// Short, non-reversible fingerprint of a credential for cache scoping.
pub fn scope_fingerprint(secret: &str) -> String {
    if secret.trim().is_empty() {
        return String::new();
    }
    let digest = Sha256::digest(secret.trim().as_bytes());
    hex::encode(&digest[..8])
}

/// A stored response, enough to rebuild the normalized result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub status_code: u16,
    pub status: String,
    pub headers: Headers,
    pub body: String,
}

impl CachedResponse {
    pub fn etag(&self) -> Option<&str> {
        headers::get(&self.headers, "etag")
    }

    pub fn last_modified(&self) -> Option<&str> {
        headers::get(&self.headers, "last-modified")
    }

    pub fn has_validators(&self) -> bool {
        self.etag().is_some() || self.last_modified().is_some()
    }
}

/// Result of a cache lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// Within TTL; serve without a request.
    Fresh(CachedResponse),
    /// Expired but revalidatable; send its validators.
    Stale(CachedResponse),
    Miss,
}

#[derive(Debug)]
struct Entry {
    provider: ProviderId,
    subject: String,
    response: CachedResponse,
    stored_at: Instant,
    ttl: Duration,
}

/// Shared response cache. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ResponseCache {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    capacity: usize,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn lookup(&self, key: &str) -> Lookup {
        let entries = self.entries();
        let Some(entry) = entries.get(key) else {
            return Lookup::Miss;
        };
        if entry.stored_at.elapsed() < entry.ttl {
            Lookup::Fresh(entry.response.clone())
        } else if entry.response.has_validators() {
            Lookup::Stale(entry.response.clone())
        } else {
            Lookup::Miss
        }
    }

    /// Stores a successful response. Returns whether it was stored.
    ///
    /// Unsafe methods and `Cache-Control: no-store` responses are skipped.
    pub fn store(
        &self,
        provider: ProviderId,
        subject: &str,
        key: &str,
        method: Method,
        response: CachedResponse,
        ttl: Duration,
    ) -> bool {
        if !method.is_safe() || is_no_store(&response.headers) {
            return false;
        }
        let mut entries = self.entries();
        if !entries.contains_key(key) && entries.len() >= self.capacity {
            evict_oldest(&mut entries);
        }
        entries.insert(
            key.to_string(),
            Entry {
                provider,
                subject: subject.trim().to_string(),
                response,
                stored_at: Instant::now(),
                ttl,
            },
        );
        true
    }

    /// Marks an entry fresh again after a `304 Not Modified`.
    pub fn touch(&self, key: &str) {
        if let Some(entry) = self.entries().get_mut(key) {
            entry.stored_at = Instant::now();
        }
    }

    pub fn evict(&self, key: &str) {
        self.entries().remove(key);
    }

    /// Drops every entry stored for `(provider, subject)`.
    pub fn invalidate_subject(&self, provider: ProviderId, subject: &str) -> usize {
        let subject = subject.trim();
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, entry| !(entry.provider == provider && entry.subject == subject));
        let removed = before - entries.len();
        if removed > 0 {
            debug!(provider = %provider, subject, removed, "cache invalidated");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops everything.
    pub fn flush(&self) {
        self.entries().clear();
    }
}

fn evict_oldest(entries: &mut HashMap<String, Entry>) {
    let oldest = entries
        .iter()
        .min_by_key(|(_, entry)| entry.stored_at)
        .map(|(key, _)| key.clone());
    if let Some(key) = oldest {
        entries.remove(&key);
    }
}

fn is_no_store(response_headers: &Headers) -> bool {
    headers::get(response_headers, "cache-control").is_some_and(|value| {
        value
            .split(',')
            .any(|directive| directive.trim().eq_ignore_ascii_case("no-store"))
    })
}
