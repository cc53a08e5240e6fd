//! Provider identifiers and authentication modes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The providers Relay ships bridges for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderId {
    Cloudflare,
    GooglePlaces,
    Youtube,
    GooglePlay,
    Appstore,
}

impl ProviderId {
    pub const ALL: [ProviderId; 5] = [
        Self::Cloudflare,
        Self::GooglePlaces,
        Self::Youtube,
        Self::GooglePlay,
        Self::Appstore,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cloudflare => "cloudflare",
            Self::GooglePlaces => "google-places",
            Self::Youtube => "youtube",
            Self::GooglePlay => "google-play",
            Self::Appstore => "appstore",
        }
    }

    /// Component name written to audit records.
    pub fn component(self) -> &'static str {
        match self {
            Self::Cloudflare => "cloudflarebridge",
            Self::GooglePlaces => "googleplacesbridge",
            Self::Youtube => "youtubebridge",
            Self::GooglePlay => "googleplaybridge",
            Self::Appstore => "appstorebridge",
        }
    }

    /// Upper-snake name used in environment variable prefixes.
    pub fn env_prefix(self) -> &'static str {
        match self {
            Self::Cloudflare => "CLOUDFLARE",
            Self::GooglePlaces => "GOOGLE_PLACES",
            Self::Youtube => "YOUTUBE",
            Self::GooglePlay => "GOOGLE_PLAY",
            Self::Appstore => "APPSTORE",
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown provider: {0}")]
pub struct ParseProviderError(pub String);

impl FromStr for ProviderId {
    type Err = ParseProviderError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase().replace('_', "-");
        match normalized.as_str() {
            "cloudflare" | "cf" => Ok(Self::Cloudflare),
            "google-places" | "googleplaces" | "places" => Ok(Self::GooglePlaces),
            "youtube" | "yt" => Ok(Self::Youtube),
            "google-play" | "googleplay" | "play" => Ok(Self::GooglePlay),
            "appstore" | "app-store" | "apple" | "apple-appstore" => Ok(Self::Appstore),
            _ => Err(ParseProviderError(raw.trim().to_string())),
        }
    }
}

/// How a bridge authenticates its calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMode {
    /// Static API key in a header or query parameter.
    #[default]
    ApiKey,
    /// OAuth access token from a token provider, sent as Bearer.
    Oauth,
    /// Signed JWT assertion (App Store Connect), sent as Bearer.
    TokenJwt,
}

impl AuthMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ApiKey => "api-key",
            Self::Oauth => "oauth",
            Self::TokenJwt => "token-jwt",
        }
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthMode {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "api-key" | "apikey" | "key" => Ok(Self::ApiKey),
            "oauth" => Ok(Self::Oauth),
            "token-jwt" | "jwt" | "token" => Ok(Self::TokenJwt),
            other => Err(format!("unknown auth mode: {other}")),
        }
    }
}
