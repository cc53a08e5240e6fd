//! Secret redaction for anything a bridge logs or returns.
//!
//! Every string that leaves the runtime (audit fields, response bodies,
//! header values, error messages, sanitized URLs) passes through a
//! [`Redactor`]. The built-in rules cover:
//! - `Bearer` tokens and `Authorization: Basic|Token` credentials
//! - PEM private key blocks (delimiters kept, body removed)
//! - JWT triplets (`eyJ…`)
//! - credential query parameters and `key: value` pairs
//! - Google-style `AIza…` API keys
//!
//! Redaction is idempotent: applying it twice gives the same result as once.
//! Text with no secret in it is returned unchanged.

use regex::Regex;
use std::borrow::Cow;
use std::sync::LazyLock;

/// Mask used in place of secret material.
pub const MASK: &str = "***";

struct Rule {
    regex: Regex,
    replacement: &'static str,
}

impl Rule {
    fn new(pattern: &str, replacement: &'static str) -> Self {
        Self {
            regex: Regex::new(pattern).expect("invalid built-in redaction pattern"),
            replacement,
        }
    }
}

// Order matters: the PEM rule runs before anything that could eat part of a
// key body, and the bearer rule runs before the JWT rule so a bearer JWT
// collapses to `Bearer ***`.
static BUILTIN_RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        Rule::new(
            r"(?s)(-----BEGIN [A-Z ]*PRIVATE KEY-----).*?(-----END [A-Z ]*PRIVATE KEY-----)",
            "${1}***${2}",
        ),
        // Only token-shaped bearer values are masked; plain words are not.
        Rule::new(
            r"(?i)\bbearer\s+(?:[A-Za-z0-9._~+/=-]*[0-9][A-Za-z0-9._~+/=-]*|[A-Za-z0-9._~+/=-]*[A-Za-z0-9][._~+/=][A-Za-z0-9][A-Za-z0-9._~+/=-]*|[A-Za-z._~+/=-]{20,})",
            "Bearer ***",
        ),
        Rule::new(
            r#"(?i)\b(authorization["']?\s*[:=]\s*["']?)(basic|token)\s+[A-Za-z0-9._~+/=-]+"#,
            "${1}${2} ***",
        ),
        Rule::new(
            r"\beyJ[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+\.[A-Za-z0-9_-]*",
            "eyJ***.***.***",
        ),
        Rule::new(
            r"(?i)([?&](?:key|api_key|access_token|refresh_token|client_secret|assertion)=)[^&#\s]+",
            "${1}***",
        ),
        Rule::new(
            r"(?i)\b((?:client_secret|refresh_token|access_token|assertion)\s*[=:]\s*)[A-Za-z0-9._~+/-]+",
            "${1}***",
        ),
        Rule::new(
            r#"(?i)("(?:client_secret|refresh_token|access_token|assertion|private_key)"\s*:\s*")[^"]+"#,
            "${1}***",
        ),
        Rule::new(r"AIza[0-9A-Za-z_-]{20,}", "AIza***"),
    ]
});

/// A provider-specific rule added on top of the built-ins.
#[derive(Debug, Clone)]
struct ExtraRule {
    regex: Regex,
    replacement: String,
}

/// Redacts secrets from text and JSON string values.
///
/// # Example
///
/// ```
/// use relay_core::Redactor;
///
/// let redactor = Redactor::new();
/// let out = redactor.redact("Authorization: Bearer eyJhbGciOi.xx.yy");
/// assert_eq!(out, "Authorization: Bearer ***");
/// ```
#[derive(Debug, Clone, Default)]
pub struct Redactor {
    extra: Vec<ExtraRule>,
}

impl Redactor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a rule applied after the built-ins.
    ///
    /// The replacement may reference capture groups (`${1}`). It must not
    /// itself match `pattern`, or redaction stops being idempotent.
    pub fn with_rule(
        mut self,
        pattern: &str,
        replacement: impl Into<String>,
    ) -> Result<Self, regex::Error> {
        self.extra.push(ExtraRule {
            regex: Regex::new(pattern)?,
            replacement: replacement.into(),
        });
        Ok(self)
    }

    /// Returns a redacted copy of `input`.
    pub fn redact<'a>(&self, input: &'a str) -> Cow<'a, str> {
        if input.trim().is_empty() {
            return Cow::Borrowed(input);
        }
        let mut out = Cow::Borrowed(input);
        for rule in BUILTIN_RULES.iter() {
            if rule.regex.is_match(&out) {
                out = Cow::Owned(rule.regex.replace_all(&out, rule.replacement).into_owned());
            }
        }
        for rule in &self.extra {
            if rule.regex.is_match(&out) {
                out = Cow::Owned(
                    rule.regex
                        .replace_all(&out, rule.replacement.as_str())
                        .into_owned(),
                );
            }
        }
        out
    }

    /// Owned convenience wrapper around [`Redactor::redact`].
    pub fn redact_string(&self, input: &str) -> String {
        self.redact(input).into_owned()
    }

    /// Redacts every string inside a JSON value in place.
    ///
    /// Keys, numbers, booleans and the shape of the value are untouched.
    pub fn redact_json(&self, value: &mut serde_json::Value) {
        match value {
            serde_json::Value::String(text) => {
                let redacted = match self.redact(text) {
                    Cow::Owned(redacted) => Some(redacted),
                    Cow::Borrowed(_) => None,
                };
                if let Some(redacted) = redacted {
                    *text = redacted;
                }
            }
            serde_json::Value::Array(items) => {
                for item in items {
                    self.redact_json(item);
                }
            }
            serde_json::Value::Object(map) => {
                for item in map.values_mut() {
                    self.redact_json(item);
                }
            }
            _ => {}
        }
    }
}

/// Redacts with the built-in rules only.
pub fn redact(input: &str) -> Cow<'_, str> {
    static DEFAULT: LazyLock<Redactor> = LazyLock::new(Redactor::new);
    DEFAULT.redact(input)
}
