//! Static defaults for every supported provider.

use crate::url::PathJoin;
use relay_proto::ProviderId;
use std::time::Duration;

/// Defaults a bridge starts from before configuration overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSpec {
    pub id: ProviderId,
    pub base_url: &'static str,
    pub upload_base_url: Option<&'static str>,
    pub custom_app_base_url: Option<&'static str>,
    pub user_agent: &'static str,
    pub accept: &'static str,
    /// Checked in order; the first non-empty value becomes the request id.
    pub request_id_headers: &'static [&'static str],
    pub path_join: PathJoin,
    /// Steady-state tokens per second.
    pub rate_per_sec: f64,
    pub burst: u32,
    pub cache_ttl: Duration,
    /// Maximum attempts in flight per bucket. `0` means unbounded.
    pub max_concurrency: usize,
}

const USER_AGENT: &str = concat!("relay/", env!("CARGO_PKG_VERSION"));

static SPECS: [ProviderSpec; 5] = [
    ProviderSpec {
        id: ProviderId::Cloudflare,
        base_url: "https://api.cloudflare.com/client/v4",
        upload_base_url: None,
        custom_app_base_url: None,
        user_agent: USER_AGENT,
        accept: "application/json",
        request_id_headers: &["CF-Ray", "X-Request-ID"],
        path_join: PathJoin::KeepBasePath,
        rate_per_sec: 4.0,
        burst: 8,
        cache_ttl: Duration::from_secs(15),
        max_concurrency: 4,
    },
    ProviderSpec {
        id: ProviderId::GooglePlaces,
        base_url: "https://places.googleapis.com",
        upload_base_url: None,
        custom_app_base_url: None,
        user_agent: USER_AGENT,
        accept: "application/json",
        request_id_headers: &["X-Request-Id", "X-Google-Request-Id"],
        path_join: PathJoin::Reference,
        rate_per_sec: 5.0,
        burst: 10,
        cache_ttl: Duration::from_secs(30),
        max_concurrency: 8,
    },
    ProviderSpec {
        id: ProviderId::Youtube,
        base_url: "https://www.googleapis.com",
        upload_base_url: Some("https://www.googleapis.com/upload"),
        custom_app_base_url: None,
        user_agent: USER_AGENT,
        accept: "application/json",
        request_id_headers: &["X-Google-Request-Id", "X-Request-Id"],
        path_join: PathJoin::Reference,
        rate_per_sec: 3.0,
        burst: 6,
        cache_ttl: Duration::from_secs(30),
        max_concurrency: 4,
    },
    ProviderSpec {
        id: ProviderId::GooglePlay,
        base_url: "https://androidpublisher.googleapis.com",
        upload_base_url: Some("https://androidpublisher.googleapis.com"),
        custom_app_base_url: Some("https://playcustomapp.googleapis.com"),
        user_agent: USER_AGENT,
        accept: "application/json",
        request_id_headers: &["X-Google-Request-Id", "X-Request-Id"],
        path_join: PathJoin::Reference,
        rate_per_sec: 2.0,
        burst: 4,
        cache_ttl: Duration::from_secs(15),
        max_concurrency: 2,
    },
    ProviderSpec {
        id: ProviderId::Appstore,
        base_url: "https://api.appstoreconnect.apple.com",
        upload_base_url: None,
        custom_app_base_url: None,
        user_agent: USER_AGENT,
        accept: "application/json",
        request_id_headers: &["x-request-id", "X-Request-ID"],
        path_join: PathJoin::Reference,
        rate_per_sec: 2.0,
        burst: 4,
        cache_ttl: Duration::from_secs(15),
        max_concurrency: 2,
    },
];

impl ProviderSpec {
    pub fn get(id: ProviderId) -> &'static ProviderSpec {
        match id {
            ProviderId::Cloudflare => &SPECS[0],
            ProviderId::GooglePlaces => &SPECS[1],
            ProviderId::Youtube => &SPECS[2],
            ProviderId::GooglePlay => &SPECS[3],
            ProviderId::Appstore => &SPECS[4],
        }
    }

    pub fn all() -> &'static [ProviderSpec] {
        &SPECS
    }
}
