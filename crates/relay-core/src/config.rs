//! Bridge configuration.
//!
//! Values come from three places, later ones winning: the provider registry
//! defaults, a YAML file (`RelayConfig::from_file`), and `RELAY_<PROVIDER>_*`
//! environment variables (`BridgeConfig::from_env`).

use crate::error::{RelayError, Result};
use crate::providers::ProviderSpec;
use crate::rate_limit::RateLimitPolicy;
use relay_proto::{AuthMode, ProviderId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for one bridge client.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    pub base_url: Option<String>,
    pub upload_base_url: Option<String>,
    pub custom_app_base_url: Option<String>,
    pub user_agent: Option<String>,
    pub timeout_secs: Option<u64>,
    pub max_retries: u32,
    pub log_path: Option<PathBuf>,
    /// Copied into every audit event as `ctx_<key>`.
    pub log_context: BTreeMap<String, String>,
    pub disable_cache: bool,
    pub auth_mode: Option<AuthMode>,
    pub api_key: Option<String>,
    pub token: Option<String>,
    pub rate_per_sec: Option<f64>,
    pub burst: Option<u32>,
    pub max_concurrency: Option<usize>,
}

// Credentials never appear in debug output.
impl fmt::Debug for BridgeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mask = |value: &Option<String>| value.as_ref().map(|_| "***");
        f.debug_struct("BridgeConfig")
            .field("base_url", &self.base_url)
            .field("upload_base_url", &self.upload_base_url)
            .field("custom_app_base_url", &self.custom_app_base_url)
            .field("user_agent", &self.user_agent)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("log_path", &self.log_path)
            .field("log_context", &self.log_context)
            .field("disable_cache", &self.disable_cache)
            .field("auth_mode", &self.auth_mode)
            .field("api_key", &mask(&self.api_key))
            .field("token", &mask(&self.token))
            .field("rate_per_sec", &self.rate_per_sec)
            .field("burst", &self.burst)
            .field("max_concurrency", &self.max_concurrency)
            .finish()
    }
}

impl BridgeConfig {
    /// Loads `.env` if present, then reads `RELAY_<PROVIDER>_*` variables.
    pub fn from_env(provider: ProviderId) -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(provider, |name| std::env::var(name).ok())
    }

    /// Like [`BridgeConfig::from_env`] with an explicit variable source.
    pub fn from_lookup<F>(provider: ProviderId, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let prefix = format!("RELAY_{}_", provider.env_prefix());
        let var = |suffix: &str| {
            lookup(&format!("{prefix}{suffix}"))
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let parse_err = |suffix: &str, value: &str| {
            RelayError::Config(format!("{prefix}{suffix}: invalid value {value:?}"))
        };

        let mut config = Self {
            base_url: var("BASE_URL"),
            upload_base_url: var("UPLOAD_BASE_URL"),
            custom_app_base_url: var("CUSTOM_APP_BASE_URL"),
            user_agent: var("USER_AGENT"),
            log_path: var("LOG_PATH").map(PathBuf::from),
            api_key: var("API_KEY"),
            token: var("TOKEN"),
            ..Self::default()
        };
        if let Some(raw) = var("MAX_RETRIES") {
            config.max_retries = raw.parse().map_err(|_| parse_err("MAX_RETRIES", &raw))?;
        }
        if let Some(raw) = var("TIMEOUT_SECS") {
            config.timeout_secs = Some(raw.parse().map_err(|_| parse_err("TIMEOUT_SECS", &raw))?);
        }
        if let Some(raw) = var("AUTH_MODE") {
            config.auth_mode = Some(raw.parse().map_err(RelayError::Config)?);
        }
        if let Some(raw) = var("DISABLE_CACHE") {
            config.disable_cache = parse_bool(&raw).ok_or_else(|| parse_err("DISABLE_CACHE", &raw))?;
        }
        if let Some(account) = var("ACCOUNT") {
            config.log_context.insert("account_alias".to_string(), account);
        }
        Ok(config)
    }

    /// Fills every unset field from `other`.
    pub fn merged_over(mut self, other: &BridgeConfig) -> Self {
        fn fill<T: Clone>(slot: &mut Option<T>, fallback: &Option<T>) {
            if slot.is_none() {
                slot.clone_from(fallback);
            }
        }
        fill(&mut self.base_url, &other.base_url);
        fill(&mut self.upload_base_url, &other.upload_base_url);
        fill(&mut self.custom_app_base_url, &other.custom_app_base_url);
        fill(&mut self.user_agent, &other.user_agent);
        fill(&mut self.timeout_secs, &other.timeout_secs);
        fill(&mut self.log_path, &other.log_path);
        fill(&mut self.auth_mode, &other.auth_mode);
        fill(&mut self.api_key, &other.api_key);
        fill(&mut self.token, &other.token);
        fill(&mut self.rate_per_sec, &other.rate_per_sec);
        fill(&mut self.burst, &other.burst);
        fill(&mut self.max_concurrency, &other.max_concurrency);
        if self.max_retries == 0 {
            self.max_retries = other.max_retries;
        }
        self.disable_cache |= other.disable_cache;
        for (key, value) in &other.log_context {
            self.log_context
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout_secs
            .filter(|secs| *secs > 0)
            .map_or(DEFAULT_TIMEOUT, Duration::from_secs)
    }

    pub fn base_url_or<'a>(&'a self, spec: &'a ProviderSpec) -> &'a str {
        non_blank(self.base_url.as_deref()).unwrap_or(spec.base_url)
    }

    pub fn upload_base_url_or<'a>(&'a self, spec: &'a ProviderSpec) -> Option<&'a str> {
        non_blank(self.upload_base_url.as_deref()).or(spec.upload_base_url)
    }

    pub fn custom_app_base_url_or<'a>(&'a self, spec: &'a ProviderSpec) -> Option<&'a str> {
        non_blank(self.custom_app_base_url.as_deref()).or(spec.custom_app_base_url)
    }

    pub fn user_agent_or<'a>(&'a self, spec: &'a ProviderSpec) -> &'a str {
        non_blank(self.user_agent.as_deref()).unwrap_or(spec.user_agent)
    }

    pub fn rate_policy(&self, spec: &ProviderSpec) -> RateLimitPolicy {
        let defaults = RateLimitPolicy::from(spec);
        RateLimitPolicy {
            rate_per_sec: self.rate_per_sec.unwrap_or(defaults.rate_per_sec),
            burst: self.burst.unwrap_or(defaults.burst),
            max_concurrency: self.max_concurrency.unwrap_or(defaults.max_concurrency),
        }
    }

    /// Rate-limit and cache subject: the `account_alias` log context value.
    pub fn subject(&self) -> &str {
        self.log_context
            .get("account_alias")
            .map_or("", |alias| alias.trim())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// File-level configuration: one section per bridge plus a shared audit log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelayConfig {
    pub audit_log: Option<PathBuf>,
    pub bridges: BTreeMap<ProviderId, BridgeConfig>,
}

impl RelayConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            RelayError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::parse_yaml(&content)
    }

    pub fn parse_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).map_err(|e| RelayError::Config(e.to_string()))
    }

    /// The section for `provider`, with the shared audit log as fallback.
    pub fn bridge(&self, provider: ProviderId) -> BridgeConfig {
        let mut config = self.bridges.get(&provider).cloned().unwrap_or_default();
        if config.log_path.is_none() {
            config.log_path.clone_from(&self.audit_log);
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_from_lookup_reads_prefixed_vars() {
        let config = BridgeConfig::from_lookup(
            ProviderId::GooglePlay,
            lookup(&[
                ("RELAY_GOOGLE_PLAY_TOKEN", " ya29.token "),
                ("RELAY_GOOGLE_PLAY_MAX_RETRIES", "2"),
                ("RELAY_GOOGLE_PLAY_AUTH_MODE", "oauth"),
                ("RELAY_GOOGLE_PLAY_ACCOUNT", "studio"),
                ("RELAY_GOOGLE_PLAY_DISABLE_CACHE", "yes"),
                ("RELAY_YOUTUBE_API_KEY", "ignored"),
            ]),
        )
        .unwrap();
        assert_eq!(config.token.as_deref(), Some("ya29.token"));
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.auth_mode, Some(AuthMode::Oauth));
        assert_eq!(config.subject(), "studio");
        assert!(config.disable_cache);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_invalid_env_value_is_config_error() {
        let err = BridgeConfig::from_lookup(
            ProviderId::Cloudflare,
            lookup(&[("RELAY_CLOUDFLARE_MAX_RETRIES", "many")]),
        )
        .unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));
        assert!(err.to_string().contains("RELAY_CLOUDFLARE_MAX_RETRIES"));
    }

    #[test]
    fn test_debug_masks_credentials() {
        let config = BridgeConfig {
            api_key: Some("AIzaSecret".to_string()),
            token: Some("tok".to_string()),
            ..BridgeConfig::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("AIzaSecret"));
        assert!(!debug.contains("\"tok\""));
    }

    #[test]
    fn test_defaults_come_from_registry() {
        let spec = ProviderSpec::get(ProviderId::Youtube);
        let config = BridgeConfig::default();
        assert_eq!(config.timeout(), DEFAULT_TIMEOUT);
        assert_eq!(config.base_url_or(spec), "https://www.googleapis.com");
        assert_eq!(
            config.upload_base_url_or(spec),
            Some("https://www.googleapis.com/upload")
        );
        assert_eq!(config.rate_policy(spec).burst, 6);
    }

    #[test]
    fn test_merged_over_fills_gaps_only() {
        let env = BridgeConfig {
            api_key: Some("from-env".to_string()),
            ..BridgeConfig::default()
        };
        let file = BridgeConfig {
            api_key: Some("from-file".to_string()),
            base_url: Some("http://127.0.0.1:9".to_string()),
            max_retries: 3,
            ..BridgeConfig::default()
        };
        let merged = env.merged_over(&file);
        assert_eq!(merged.api_key.as_deref(), Some("from-env"));
        assert_eq!(merged.base_url.as_deref(), Some("http://127.0.0.1:9"));
        assert_eq!(merged.max_retries, 3);
    }

    #[test]
    fn test_relay_config_from_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("relay.yml");
        std::fs::write(
            &path,
            r"
audit_log: /tmp/relay-audit.jsonl
bridges:
  cloudflare:
    max_retries: 2
    log_context:
      account_alias: main
  google-places:
    api_key: AIzaTest
",
        )
        .unwrap();
        let config = RelayConfig::from_file(&path).unwrap();
        let cf = config.bridge(ProviderId::Cloudflare);
        assert_eq!(cf.max_retries, 2);
        assert_eq!(cf.subject(), "main");
        assert_eq!(cf.log_path.as_deref(), Some(Path::new("/tmp/relay-audit.jsonl")));
        assert_eq!(
            config.bridge(ProviderId::GooglePlaces).api_key.as_deref(),
            Some("AIzaTest")
        );
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let err = RelayConfig::parse_yaml("bridges:\n  cloudflare:\n    retries: 2\n").unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));
    }
}
