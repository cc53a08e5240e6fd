//! Normalized provider failure.

use crate::response::JsonObject;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A redacted, typed failure from a provider call.
///
/// `status_code` is the HTTP status as returned by the server, or `-1`
/// when the request never produced a response (transport failure).
/// Every string field has already passed through the redactor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    /// Provider label used in the display form (e.g. `cloudflare`).
    pub provider: String,
    pub status_code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Symbolic status such as `PERMISSION_DENIED`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<JsonObject>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub raw_body: String,
}

impl ApiError {
    pub const TRANSPORT_STATUS: i32 = -1;

    /// A failure that never reached the server. `message` must already be redacted.
    pub fn transport(provider: impl Into<String>, message: impl Into<String>) -> Self {
        let mut message = message.into();
        if message.trim().is_empty() {
            message = "request failed".to_string();
        }
        Self {
            provider: provider.into(),
            status_code: Self::TRANSPORT_STATUS,
            message,
            ..Self::default()
        }
    }

    pub fn is_transport(&self) -> bool {
        self.status_code == Self::TRANSPORT_STATUS
    }

    pub fn is_rate_limited(&self) -> bool {
        self.status_code == 429
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let provider = if self.provider.is_empty() {
            "provider"
        } else {
            self.provider.as_str()
        };
        let mut parts = Vec::with_capacity(6);
        if self.status_code != 0 {
            parts.push(format!("status={}", self.status_code));
        }
        let labelled = [
            ("code", &self.code),
            ("status_text", &self.status),
            ("type", &self.error_type),
            ("title", &self.title),
            ("reason", &self.reason),
        ];
        for (label, value) in labelled {
            if let Some(value) = value.as_deref().filter(|v| !v.trim().is_empty()) {
                parts.push(format!("{label}={value}"));
            }
        }
        if !self.message.trim().is_empty() {
            parts.push(format!("message={}", self.message));
        }
        if parts.is_empty() {
            write!(f, "{provider} api error")
        } else {
            write!(f, "{provider} api error: {}", parts.join(", "))
        }
    }
}

impl std::error::Error for ApiError {}
