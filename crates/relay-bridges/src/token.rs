//! Credentials for bridges that authenticate with Bearer tokens.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relay_core::{RelayError, Result};
use std::fmt;
use tokio_util::sync::CancellationToken;

/// An access token and its expiry, when known.
#[derive(Clone, PartialEq, Eq)]
pub struct Token {
    pub value: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Token {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            expires_at: None,
        }
    }

    pub fn expiring_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("value", &relay_core::MASK)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Supplies Bearer tokens, e.g. a cached OAuth token or a freshly signed JWT.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self, cancel: &CancellationToken) -> Result<Token>;

    /// Short label written to audit records as `auth_source`.
    fn source(&self) -> String;
}

/// Fetches a token and rejects blank or expired values.
pub(crate) async fn bearer_value(
    provider: &dyn TokenProvider,
    cancel: &CancellationToken,
) -> Result<String> {
    if cancel.is_cancelled() {
        return Err(RelayError::Cancelled);
    }
    let token = provider.token(cancel).await?;
    let value = token.value.trim();
    if value.is_empty() {
        return Err(RelayError::Auth(format!(
            "token provider {} returned an empty token",
            provider.source()
        )));
    }
    if token.is_expired(Utc::now()) {
        return Err(RelayError::Auth(format!(
            "token from {} has expired",
            provider.source()
        )));
    }
    Ok(value.to_string())
}

/// A fixed token, typically from configuration.
#[derive(Clone)]
pub struct StaticToken {
    token: Token,
    source: String,
}

impl StaticToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            token: Token::new(value),
            source: "static".to_string(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }
}

impl fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticToken")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self, _cancel: &CancellationToken) -> Result<Token> {
        Ok(self.token.clone())
    }

    fn source(&self) -> String {
        self.source.clone()
    }
}

/// Reads the token from an environment variable on every call, so rotated
/// values are picked up without a restart.
#[derive(Debug, Clone)]
pub struct EnvToken {
    var: String,
}

impl EnvToken {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

#[async_trait]
impl TokenProvider for EnvToken {
    async fn token(&self, _cancel: &CancellationToken) -> Result<Token> {
        match std::env::var(&self.var) {
            Ok(value) if !value.trim().is_empty() => Ok(Token::new(value.trim())),
            _ => Err(RelayError::Auth(format!("{} is not set", self.var))),
        }
    }

    fn source(&self) -> String {
        format!("env:{}", self.var)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_static_token_round_trip() {
        let provider = StaticToken::new(" tok-1 ").with_source("config");
        let value = bearer_value(&provider, &CancellationToken::new()).await.unwrap();
        assert_eq!(value, "tok-1");
        assert_eq!(provider.source(), "config");
    }

    #[tokio::test]
    async fn test_blank_token_rejected() {
        let err = bearer_value(&StaticToken::new("   "), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Auth(_)));
    }

    #[tokio::test]
    async fn test_expired_token_rejected() {
        struct Expired;

        #[async_trait]
        impl TokenProvider for Expired {
            async fn token(&self, _cancel: &CancellationToken) -> Result<Token> {
                Ok(Token::new("old").expiring_at(Utc::now() - Duration::minutes(1)))
            }

            fn source(&self) -> String {
                "expired".to_string()
            }
        }

        let err = bearer_value(&Expired, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("expired"));
    }

    #[tokio::test]
    async fn test_cancelled_before_fetch() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = bearer_value(&StaticToken::new("tok"), &cancel).await.unwrap_err();
        assert!(matches!(err, RelayError::Cancelled));
    }

    #[tokio::test]
    async fn test_env_token_missing_var() {
        let provider = EnvToken::new("RELAY_TEST_TOKEN_THAT_IS_NEVER_SET");
        let err = provider.token(&CancellationToken::new()).await.unwrap_err();
        assert!(err.to_string().contains("RELAY_TEST_TOKEN_THAT_IS_NEVER_SET"));
        assert_eq!(provider.source(), "env:RELAY_TEST_TOKEN_THAT_IS_NEVER_SET");
    }

    #[test]
    fn test_debug_hides_value() {
        let rendered = format!("{:?}", Token::new("secret-value"));
        assert!(!rendered.contains("secret-value"));
    }
}
