//! Provider bridges for Relay.
//!
//! Each module implements [`relay_core::Bridge`] for one API and exposes a
//! `client(&BridgeConfig)` constructor that pairs the bridge with its
//! pagination strategy:
//!
//! | Module | Auth | Pagination |
//! |---|---|---|
//! | [`cloudflare`] | Bearer API token | `page`/`per_page`, `result_info` sentinel |
//! | [`google_places`] | `X-Goog-Api-Key` (+ field mask) | `nextPageToken` |
//! | [`youtube`] | `key` param or OAuth Bearer | `nextPageToken` → `pageToken` |
//! | [`google_play`] | OAuth Bearer | `nextPageToken` |
//! | [`appstore`] | App JWT Bearer | `links.next` |
//!
//! [`AnyClient`] picks the bridge from a [`ProviderId`] at runtime.

pub mod appstore;
pub mod cloudflare;
pub mod google_places;
pub mod google_play;
pub mod youtube;

mod client;
mod envelope;
mod pagination;
mod token;

pub use client::Client;
pub use pagination::{DEFAULT_MAX_PAGES, DEFAULT_PER_PAGE, Pagination, items};
pub use token::{EnvToken, StaticToken, Token, TokenProvider};

use relay_core::{AuditSink, BridgeConfig, CallContext, Result};
use relay_proto::{JsonObject, ProviderId, Request, Response};
use std::sync::Arc;

/// A client for any supported provider.
#[derive(Debug)]
pub enum AnyClient {
    Cloudflare(Client<cloudflare::CloudflareBridge>),
    GooglePlaces(Client<google_places::GooglePlacesBridge>),
    Youtube(Client<youtube::YoutubeBridge>),
    GooglePlay(Client<google_play::GooglePlayBridge>),
    Appstore(Client<appstore::AppstoreBridge>),
}

macro_rules! dispatch {
    ($self:expr, $client:ident => $body:expr) => {
        match $self {
            AnyClient::Cloudflare($client) => $body,
            AnyClient::GooglePlaces($client) => $body,
            AnyClient::Youtube($client) => $body,
            AnyClient::GooglePlay($client) => $body,
            AnyClient::Appstore($client) => $body,
        }
    };
}

impl AnyClient {
    pub fn from_config(provider: ProviderId, config: &BridgeConfig) -> Result<Self> {
        Ok(match provider {
            ProviderId::Cloudflare => Self::Cloudflare(cloudflare::client(config)?),
            ProviderId::GooglePlaces => Self::GooglePlaces(google_places::client(config)?),
            ProviderId::Youtube => Self::Youtube(youtube::client(config)?),
            ProviderId::GooglePlay => Self::GooglePlay(google_play::client(config)?),
            ProviderId::Appstore => Self::Appstore(appstore::client(config)?),
        })
    }

    pub fn provider(&self) -> ProviderId {
        dispatch!(self, c => relay_core::Bridge::provider(c.bridge()))
    }

    /// Adds an audit sink to the underlying executor.
    #[must_use]
    pub fn with_sink(self, sink: Arc<dyn AuditSink>) -> Self {
        match self {
            Self::Cloudflare(c) => Self::Cloudflare(c.map_executor(|e| e.with_sink(sink))),
            Self::GooglePlaces(c) => Self::GooglePlaces(c.map_executor(|e| e.with_sink(sink))),
            Self::Youtube(c) => Self::Youtube(c.map_executor(|e| e.with_sink(sink))),
            Self::GooglePlay(c) => Self::GooglePlay(c.map_executor(|e| e.with_sink(sink))),
            Self::Appstore(c) => Self::Appstore(c.map_executor(|e| e.with_sink(sink))),
        }
    }

    pub async fn call(&self, request: Request, ctx: &CallContext) -> Result<Response> {
        dispatch!(self, c => c.call(request, ctx).await)
    }

    pub async fn list_all(
        &self,
        request: Request,
        max_pages: usize,
        ctx: &CallContext,
    ) -> Result<Vec<JsonObject>> {
        dispatch!(self, c => c.list_all(request, max_pages, ctx).await)
    }

    pub fn flush(&self) {
        dispatch!(self, c => c.flush());
    }
}
