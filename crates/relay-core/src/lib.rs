//! # relay-core
//!
//! Runtime shared by every Relay bridge.
//!
//! This crate provides:
//! - The request [`Executor`] and the [`Bridge`] trait providers implement
//! - Token-bucket rate limiting with circuit breakers and health stats
//! - A response cache with ETag / Last-Modified revalidation
//! - Secret redaction and JSONL audit logging
//! - Configuration from YAML files and `RELAY_*` environment variables
//! - The [`turns`] parser that segments interactive CLI output into turns

pub mod audit;
pub mod cache;
mod config;
mod context;
mod error;
mod executor;
pub mod headers;
pub mod health;
pub mod normalize;
mod providers;
pub mod rate_limit;
mod redact;
pub mod retry;
mod text;
pub mod turns;
pub mod url;

pub use audit::{
    AuditEvent, AuditKind, AuditSink, AuditWriter, ChannelSink, JsonlAuditLog, MemorySink,
};
pub use cache::{CachedResponse, ResponseCache};
pub use config::{BridgeConfig, DEFAULT_TIMEOUT, RelayConfig};
pub use context::CallContext;
pub use error::{RelayError, Result};
pub use executor::{Bridge, Executor, Outgoing, RawResponse, base_response};
pub use headers::Headers;
pub use providers::ProviderSpec;
pub use rate_limit::{RateLimitPolicy, RateLimiter};
pub use redact::{MASK, Redactor, redact};
pub use retry::RetryPolicy;
pub use text::{cap_line_bytes, first_non_blank, trim_line_ending, truncate_with_ellipsis};
pub use url::PathJoin;
