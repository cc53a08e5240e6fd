//! The request executor shared by every bridge.
//!
//! A bridge implements [`Bridge`] (auth, base URL, response envelope); the
//! [`Executor`] owns everything else: URL resolution, cache lookup and
//! revalidation, rate limiting, the retry loop, error normalization and the
//! audit trail.

use crate::audit::{AuditEvent, AuditKind, AuditSink, AuditWriter, JsonlAuditLog};
use crate::cache::{CachedResponse, Lookup, ResponseCache, cache_key};
use crate::config::BridgeConfig;
use crate::context::CallContext;
use crate::error::{RelayError, Result};
use crate::headers::{self, Headers};
use crate::normalize::{ErrorSource, normalize_http_error, transport_error};
use crate::providers::ProviderSpec;
use crate::rate_limit::RateLimiter;
use crate::redact::Redactor;
use crate::retry::RetryPolicy;
use crate::url::{self, PathJoin};
use async_trait::async_trait;
use relay_proto::{ApiError, Body, Method, ProviderId, Request, Response};
use reqwest::header::{HeaderName, HeaderValue};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// A request after URL resolution, ready for auth to be installed.
#[derive(Debug, Clone)]
pub struct Outgoing {
    pub method: Method,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Body,
    pub content_type: Option<String>,
}

impl Outgoing {
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.retain(|key, _| !key.eq_ignore_ascii_case(name));
        self.headers.insert(name.to_string(), value.into());
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers
            .keys()
            .any(|key| key.eq_ignore_ascii_case(name))
    }

    pub fn bearer(&mut self, token: &str) {
        self.set_header("Authorization", format!("Bearer {}", token.trim()));
    }
}

/// What the server sent back, before normalization.
#[derive(Debug, Clone, Copy)]
pub struct RawResponse<'a> {
    pub status_code: u16,
    pub status: &'a str,
    pub headers: &'a Headers,
    /// Trimmed, unredacted body.
    pub body: &'a str,
}

/// Provider-specific hooks the executor calls.
#[async_trait]
pub trait Bridge: Send + Sync {
    fn provider(&self) -> ProviderId;

    fn spec(&self) -> &'static ProviderSpec {
        ProviderSpec::get(self.provider())
    }

    /// Base URL for `request` when the request does not carry its own.
    fn base_url(&self, request: &Request) -> String;

    fn path_join(&self, _request: &Request) -> PathJoin {
        self.spec().path_join
    }

    /// Adjusts the logical request before URL resolution.
    fn prepare(&self, _request: &mut Request) {}

    /// Fingerprint separating cache entries of different credentials.
    fn auth_scope(&self) -> String;

    /// Installs credentials and provider headers.
    async fn install_auth(&self, outgoing: &mut Outgoing, ctx: &CallContext) -> Result<()>;

    /// Flattens the provider envelope into `data`/`list`.
    fn normalize_response(&self, raw: RawResponse<'_>) -> Response;

    fn is_success(&self, response: &Response) -> bool {
        response.is_success()
    }

    fn normalize_error(&self, raw: RawResponse<'_>) -> ApiError {
        normalize_http_error(
            ErrorSource {
                provider: self.provider(),
                status_code: raw.status_code,
                headers: raw.headers,
                body: raw.body,
                request_id_headers: self.spec().request_id_headers,
            },
            self.redactor(),
        )
    }

    fn retry_status(&self, policy: &RetryPolicy, method: Method, status: u16) -> bool {
        policy.retry_status(method, status)
    }

    fn retry_transport(&self, policy: &RetryPolicy, method: Method) -> bool {
        policy.retry_transport(method)
    }

    fn redactor(&self) -> &Redactor;

    /// Extra fields for every audit event, e.g. `auth_mode`.
    fn audit_fields(&self) -> BTreeMap<String, Value> {
        BTreeMap::new()
    }
}

/// Response fields every bridge fills the same way: status, redacted
/// headers and body, and the request id from the provider's header list.
pub fn base_response(raw: RawResponse<'_>, request_id_headers: &[&str], redactor: &Redactor) -> Response {
    let request_id = request_id_headers
        .iter()
        .copied()
        .chain(["X-Request-Id"])
        .find_map(|name| headers::get(raw.headers, name))
        .map(|id| redactor.redact_string(id))
        .unwrap_or_default();
    Response {
        status_code: raw.status_code,
        status: raw.status.to_string(),
        request_id,
        headers: raw
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), redactor.redact_string(v)))
            .collect(),
        body: redactor.redact_string(raw.body),
        ..Response::default()
    }
}

/// Drives calls for one bridge.
pub struct Executor<B: Bridge> {
    bridge: B,
    http: reqwest::Client,
    cache: Option<ResponseCache>,
    cache_ttl: Duration,
    limiter: RateLimiter,
    sinks: Vec<Arc<dyn AuditSink>>,
    retry: RetryPolicy,
    subject: String,
    log_context: BTreeMap<String, String>,
}

impl<B: Bridge> std::fmt::Debug for Executor<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("provider", &self.bridge.provider())
            .field("cache", &self.cache.is_some())
            .field("sinks", &self.sinks.len())
            .field("retry", &self.retry)
            .field("subject", &self.subject)
            .finish_non_exhaustive()
    }
}

impl<B: Bridge> Executor<B> {
    /// Builds an executor with private collaborators derived from `config`.
    pub fn new(bridge: B, config: &BridgeConfig) -> Result<Self> {
        let spec = bridge.spec();
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent_or(spec).to_string())
            .build()?;
        let limiter = RateLimiter::new();
        limiter.set_policy(bridge.provider(), config.rate_policy(spec));
        let mut sinks: Vec<Arc<dyn AuditSink>> = Vec::new();
        if let Some(path) = &config.log_path {
            sinks.push(Arc::new(AuditWriter::spawn(JsonlAuditLog::new(path))?));
        }
        Ok(Self {
            cache: (!config.disable_cache).then(ResponseCache::new),
            cache_ttl: spec.cache_ttl,
            limiter,
            sinks,
            retry: RetryPolicy::with_max_retries(config.max_retries),
            subject: config.subject().to_string(),
            log_context: config.log_context.clone(),
            bridge,
            http,
        })
    }

    /// Shares a process-wide cache. Ignored when caching is disabled.
    pub fn with_cache(mut self, cache: ResponseCache) -> Self {
        if self.cache.is_some() {
            self.cache = Some(cache);
        }
        self
    }

    /// Shares a process-wide limiter; this bridge's policy is copied into it.
    pub fn with_limiter(mut self, limiter: RateLimiter) -> Self {
        limiter.set_policy(self.bridge.provider(), self.limiter.policy(self.bridge.provider()));
        self.limiter = limiter;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn bridge(&self) -> &B {
        &self.bridge
    }

    pub fn cache(&self) -> Option<&ResponseCache> {
        self.cache.as_ref()
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Flushes every audit sink.
    pub fn flush(&self) {
        for sink in &self.sinks {
            sink.flush();
        }
    }

    /// Executes one logical call, retrying per policy.
    pub async fn execute(&self, mut request: Request, ctx: &CallContext) -> Result<Response> {
        let provider = self.bridge.provider();
        self.bridge.prepare(&mut request);
        let method = request.method;
        let base = request
            .base_url
            .clone()
            .filter(|b| !b.trim().is_empty())
            .unwrap_or_else(|| self.bridge.base_url(&request));
        let endpoint = url::resolve(
            self.bridge.path_join(&request),
            &base,
            &request.path,
            &request.params,
        )?;
        let sanitized = url::sanitize_url(&endpoint);
        let accept = request
            .headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("accept"))
            .map_or(self.bridge.spec().accept, |(_, v)| v.as_str())
            .to_string();
        let key = cache_key(method, &endpoint, &self.bridge.auth_scope(), &accept);

        let mut stale = None;
        if let Some(cache) = &self.cache {
            if method.is_safe() {
                match cache.lookup(&key) {
                    Lookup::Fresh(entry) => {
                        debug!(provider = %provider, path = %sanitized, "cache hit");
                        let response = self.replay(&entry);
                        self.emit_cache_hit(&request, &sanitized, &response);
                        return Ok(response);
                    }
                    Lookup::Stale(entry) => stale = Some(entry),
                    Lookup::Miss => {}
                }
            } else {
                cache.evict(&key);
            }
        }

        let attempts = self.retry.attempts();
        for attempt in 1..=attempts {
            let permit = self.limiter.acquire(provider, &self.subject, ctx).await?;

            let mut outgoing = Outgoing {
                method,
                url: endpoint.clone(),
                headers: request.headers.clone(),
                body: request.body.clone(),
                content_type: request.content_type.clone(),
            };
            if !outgoing.has_header("Accept") {
                outgoing.set_header("Accept", accept.clone());
            }
            if let Some(entry) = &stale {
                if let Some(etag) = entry.etag()
                    && !outgoing.has_header("If-None-Match")
                {
                    outgoing.set_header("If-None-Match", etag);
                }
                if let Some(modified) = entry.last_modified()
                    && !outgoing.has_header("If-Modified-Since")
                {
                    outgoing.set_header("If-Modified-Since", modified);
                }
            }
            self.bridge.install_auth(&mut outgoing, ctx).await?;
            let builder = self.build(outgoing).await?;

            self.emit(
                self.event(AuditKind::Request, &request)
                    .field("method", method.as_str())
                    .field("path", sanitized.clone())
                    .field("attempt", attempt),
            );
            let started = Instant::now();
            let sent = ctx.run(read_response(builder)).await;
            let elapsed = started.elapsed();
            let duration_ms = elapsed.as_millis() as u64;

            let (status_code, status, response_headers, body) = match sent {
                Ok(Ok(parts)) => parts,
                Ok(Err(err)) => {
                    drop(permit);
                    self.limiter
                        .feedback_transport_error(provider, &self.subject, elapsed);
                    let api_err = transport_error(provider, &err, self.bridge.redactor());
                    self.emit_response_error(&request, &sanitized, attempt, duration_ms, &api_err.message);
                    if attempt < attempts && self.bridge.retry_transport(&self.retry, method) {
                        warn!(provider = %provider, attempt, error = %api_err.message, "transport error, retrying");
                        ctx.sleep(self.retry.delay_for(attempt, None)).await?;
                        continue;
                    }
                    return Err(api_err.into());
                }
                Err(ctx_err) => {
                    self.emit_response_error(&request, &sanitized, attempt, duration_ms, &ctx_err.to_string());
                    return Err(ctx_err);
                }
            };

            self.limiter
                .feedback(provider, &self.subject, status_code, &response_headers, elapsed);
            let raw = RawResponse {
                status_code,
                status: &status,
                headers: &response_headers,
                body: &body,
            };

            if status_code == 304
                && let (Some(entry), Some(cache)) = (&stale, &self.cache)
            {
                self.emit_response(&request, &sanitized, attempt, duration_ms, status_code, &self.bridge.normalize_response(raw).request_id);
                cache.touch(&key);
                let response = self.replay(entry);
                self.emit_cache_hit(&request, &sanitized, &response);
                return Ok(response);
            }

            let response = self.bridge.normalize_response(raw);
            self.emit_response(&request, &sanitized, attempt, duration_ms, status_code, &response.request_id);

            if self.bridge.is_success(&response) {
                if let Some(cache) = &self.cache {
                    if method.is_safe() {
                        cache.store(
                            provider,
                            &self.subject,
                            &key,
                            method,
                            CachedResponse {
                                status_code,
                                status: status.clone(),
                                headers: response.headers.clone(),
                                body: body.clone(),
                            },
                            self.cache_ttl,
                        );
                    } else {
                        cache.invalidate_subject(provider, &self.subject);
                    }
                }
                info!(provider = %provider, method = %method, status = status_code, attempt, duration_ms, "request completed");
                return Ok(response);
            }

            let api_err = self.bridge.normalize_error(raw);
            drop(permit);
            if attempt < attempts && self.bridge.retry_status(&self.retry, method, status_code) {
                warn!(provider = %provider, status = status_code, attempt, "retryable status, retrying");
                ctx.sleep(self.retry.delay_for(attempt, Some(&response_headers)))
                    .await?;
                continue;
            }
            return Err(api_err.into());
        }
        Err(ApiError::transport(provider.as_str(), "request failed").into())
    }

    /// Rebuilds a normalized response from a cache entry.
    fn replay(&self, entry: &CachedResponse) -> Response {
        let mut response = self.bridge.normalize_response(RawResponse {
            status_code: 200,
            status: &entry.status,
            headers: &entry.headers,
            body: &entry.body,
        });
        response.from_cache = true;
        response
    }

    async fn build(&self, outgoing: Outgoing) -> Result<reqwest::RequestBuilder> {
        let method = reqwest::Method::from_bytes(outgoing.method.as_str().as_bytes())
            .map_err(|e| RelayError::Config(e.to_string()))?;
        let mut builder = self.http.request(method, &outgoing.url);
        let mut content_type = outgoing.content_type.filter(|c| !c.trim().is_empty());
        builder = match outgoing.body {
            Body::Empty => builder,
            Body::Raw(bytes) => builder.body(bytes),
            Body::Json(value) => {
                content_type.get_or_insert_with(|| "application/json".to_string());
                builder.body(serde_json::to_vec(&value)?)
            }
            Body::File(path) => {
                let bytes = tokio::fs::read(&path).await.map_err(|e| {
                    RelayError::Config(format!("failed to read media file {}: {e}", path.display()))
                })?;
                content_type.get_or_insert_with(|| "application/octet-stream".to_string());
                builder.body(bytes)
            }
        };
        for (name, value) in &outgoing.headers {
            let name = HeaderName::from_bytes(name.trim().as_bytes())
                .map_err(|e| RelayError::Config(format!("invalid header name {name:?}: {e}")))?;
            let value = HeaderValue::from_str(value.trim())
                .map_err(|e| RelayError::Config(format!("invalid value for header {name}: {e}")))?;
            builder = builder.header(name, value);
        }
        if let Some(content_type) = content_type {
            builder = builder.header(reqwest::header::CONTENT_TYPE, content_type.trim());
        }
        Ok(builder)
    }

    fn event(&self, kind: AuditKind, request: &Request) -> AuditEvent {
        AuditEvent::new(self.bridge.provider().component(), kind)
            .context(&self.log_context)
            .extend(&self.bridge.audit_fields())
            .extend(&request.log_fields)
    }

    fn emit(&self, event: AuditEvent) {
        if self.sinks.is_empty() {
            return;
        }
        let event = event.redact_with(self.bridge.redactor());
        for sink in &self.sinks {
            sink.record(&event);
        }
    }

    fn emit_response(
        &self,
        request: &Request,
        sanitized: &str,
        attempt: u32,
        duration_ms: u64,
        status: u16,
        request_id: &str,
    ) {
        let mut event = self
            .event(AuditKind::Response, request)
            .field("method", request.method.as_str())
            .field("path", sanitized)
            .field("attempt", attempt)
            .field("status", status)
            .field("duration_ms", duration_ms);
        if !request_id.is_empty() {
            event = event.field("request_id", request_id);
        }
        self.emit(event);
    }

    fn emit_response_error(
        &self,
        request: &Request,
        sanitized: &str,
        attempt: u32,
        duration_ms: u64,
        error: &str,
    ) {
        self.emit(
            self.event(AuditKind::ResponseError, request)
                .field("method", request.method.as_str())
                .field("path", sanitized)
                .field("attempt", attempt)
                .field("duration_ms", duration_ms)
                .field("error", error),
        );
    }

    fn emit_cache_hit(&self, request: &Request, sanitized: &str, response: &Response) {
        let mut event = self
            .event(AuditKind::CacheHit, request)
            .field("method", request.method.as_str())
            .field("path", sanitized)
            .field("status", response.status_code);
        if !response.request_id.is_empty() {
            event = event.field("request_id", response.request_id.clone());
        }
        self.emit(event);
    }
}

async fn read_response(
    builder: reqwest::RequestBuilder,
) -> std::result::Result<(u16, String, Headers, String), reqwest::Error> {
    let response = builder.send().await?;
    let status = response.status();
    let status_text = match status.canonical_reason() {
        Some(reason) => format!("{} {reason}", status.as_u16()),
        None => status.as_u16().to_string(),
    };
    let response_headers = headers::from_header_map(response.headers());
    let body = response.text().await?;
    Ok((status.as_u16(), status_text, response_headers, body.trim().to_string()))
}
