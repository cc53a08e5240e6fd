//! YouTube Data API v3.
//!
//! Two auth modes: `api-key` sends the key as the `key` query parameter,
//! `oauth` sends a Bearer token from a [`TokenProvider`]. Uploads go to the
//! upload base URL with the request path appended to it.

use crate::client::Client;
use crate::envelope::{apply_array, array_field, parse_body, required, secret_redactor};
use crate::pagination::Pagination;
use crate::token::{StaticToken, TokenProvider, bearer_value};
use async_trait::async_trait;
use relay_core::cache::scope_fingerprint;
use relay_core::url::PathJoin;
use relay_core::{
    Bridge, BridgeConfig, CallContext, Executor, Outgoing, ProviderSpec, RawResponse, Redactor,
    RelayError, Result, base_response,
};
use relay_proto::{AuthMode, ProviderId, Request, Response};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

enum Auth {
    ApiKey(String),
    Oauth(Arc<dyn TokenProvider>),
}

pub struct YoutubeBridge {
    base_url: String,
    upload_base_url: String,
    auth: Auth,
    redactor: Redactor,
}

impl YoutubeBridge {
    /// Auth from configuration alone; `oauth` mode uses `config.token`.
    pub fn new(config: &BridgeConfig) -> Result<Self> {
        Self::build(config, None)
    }

    /// `oauth` mode with an explicit token source.
    pub fn with_token_provider(config: &BridgeConfig, tokens: Arc<dyn TokenProvider>) -> Result<Self> {
        Self::build(config, Some(tokens))
    }

    fn build(config: &BridgeConfig, tokens: Option<Arc<dyn TokenProvider>>) -> Result<Self> {
        let spec = ProviderSpec::get(ProviderId::Youtube);
        let mode = config
            .auth_mode
            .unwrap_or(if tokens.is_some() { AuthMode::Oauth } else { AuthMode::ApiKey });
        let auth = match mode {
            AuthMode::ApiKey => {
                let key = required(config.api_key.as_ref(), "youtube api key")?;
                Auth::ApiKey(key)
            }
            AuthMode::Oauth => match tokens {
                Some(tokens) => Auth::Oauth(tokens),
                None => {
                    let token = required(config.token.as_ref(), "youtube oauth token")?;
                    Auth::Oauth(Arc::new(StaticToken::new(token).with_source("config")))
                }
            },
            AuthMode::TokenJwt => {
                return Err(RelayError::Config(
                    "youtube supports auth modes api-key and oauth".to_string(),
                ));
            }
        };
        let secrets: Vec<&str> = [config.api_key.as_deref(), config.token.as_deref()]
            .into_iter()
            .flatten()
            .collect();
        Ok(Self {
            base_url: config.base_url_or(spec).to_string(),
            upload_base_url: config
                .upload_base_url_or(spec)
                .unwrap_or(spec.base_url)
                .to_string(),
            redactor: secret_redactor(secrets)?,
            auth,
        })
    }

    pub fn auth_mode(&self) -> AuthMode {
        match self.auth {
            Auth::ApiKey(_) => AuthMode::ApiKey,
            Auth::Oauth(_) => AuthMode::Oauth,
        }
    }
}

impl std::fmt::Debug for YoutubeBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("YoutubeBridge")
            .field("base_url", &self.base_url)
            .field("upload_base_url", &self.upload_base_url)
            .field("auth_mode", &self.auth_mode())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Bridge for YoutubeBridge {
    fn provider(&self) -> ProviderId {
        ProviderId::Youtube
    }

    fn base_url(&self, request: &Request) -> String {
        if request.options.use_upload {
            self.upload_base_url.clone()
        } else {
            self.base_url.clone()
        }
    }

    fn path_join(&self, request: &Request) -> PathJoin {
        if request.options.use_upload {
            PathJoin::Append
        } else {
            self.spec().path_join
        }
    }

    fn prepare(&self, request: &mut Request) {
        if let Auth::ApiKey(key) = &self.auth {
            let has_key = request.params.get("key").is_some_and(|k| !k.is_empty());
            if !has_key {
                request.set_param("key", key);
            }
        }
        if request.options.use_upload {
            request.log_fields.insert("use_upload".to_string(), Value::Bool(true));
        }
    }

    fn auth_scope(&self) -> String {
        match &self.auth {
            Auth::ApiKey(key) => scope_fingerprint(key),
            Auth::Oauth(tokens) => format!("oauth:{}", tokens.source()),
        }
    }

    async fn install_auth(&self, outgoing: &mut Outgoing, ctx: &CallContext) -> Result<()> {
        if let Auth::Oauth(tokens) = &self.auth {
            let token = bearer_value(tokens.as_ref(), ctx.cancel_token()).await?;
            outgoing.bearer(&token);
        }
        Ok(())
    }

    fn normalize_response(&self, raw: RawResponse<'_>) -> Response {
        let mut response = base_response(raw, self.spec().request_id_headers, &self.redactor);
        match parse_body(raw.body) {
            Some(Value::Object(obj)) => {
                if let Some(items) = array_field(&obj, "items") {
                    response.list = items;
                }
                response.data = Some(obj);
            }
            Some(Value::Array(values)) => apply_array(&mut response, &values),
            _ => {}
        }
        response
    }

    fn redactor(&self) -> &Redactor {
        &self.redactor
    }

    fn audit_fields(&self) -> BTreeMap<String, Value> {
        let source = match &self.auth {
            Auth::ApiKey(_) => "config".to_string(),
            Auth::Oauth(tokens) => tokens.source(),
        };
        BTreeMap::from([
            ("auth_mode".to_string(), Value::from(self.auth_mode().as_str())),
            ("auth_source".to_string(), Value::from(source)),
        ])
    }
}

/// YouTube client; `nextPageToken` is sent back as `pageToken`.
pub fn client(config: &BridgeConfig) -> Result<Client<YoutubeBridge>> {
    let executor = Executor::new(YoutubeBridge::new(config)?, config)?;
    Ok(Client::new(executor, youtube_pagination()))
}

pub fn client_with_tokens(
    config: &BridgeConfig,
    tokens: Arc<dyn TokenProvider>,
) -> Result<Client<YoutubeBridge>> {
    let executor = Executor::new(YoutubeBridge::with_token_provider(config, tokens)?, config)?;
    Ok(Client::new(executor, youtube_pagination()))
}

fn youtube_pagination() -> Pagination {
    Pagination::cursor_pair("nextPageToken", "pageToken")
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::Headers;

    fn api_key_bridge() -> YoutubeBridge {
        YoutubeBridge::new(&BridgeConfig {
            api_key: Some("yt-key-0123456789".to_string()),
            ..BridgeConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_api_key_mode_adds_key_param_once() {
        let bridge = api_key_bridge();
        let mut request = Request::get("/youtube/v3/videos");
        bridge.prepare(&mut request);
        assert_eq!(request.params["key"], "yt-key-0123456789");

        let mut explicit = Request::get("/youtube/v3/videos").param("key", "other");
        bridge.prepare(&mut explicit);
        assert_eq!(explicit.params["key"], "other");
    }

    #[test]
    fn test_oauth_mode_requires_token() {
        let err = YoutubeBridge::new(&BridgeConfig {
            auth_mode: Some(AuthMode::Oauth),
            ..BridgeConfig::default()
        })
        .unwrap_err();
        assert!(err.to_string().contains("oauth token is required"));
    }

    #[test]
    fn test_token_jwt_mode_rejected() {
        let result = YoutubeBridge::new(&BridgeConfig {
            auth_mode: Some(AuthMode::TokenJwt),
            token: Some("jwt".to_string()),
            ..BridgeConfig::default()
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_upload_uses_upload_base_and_append() {
        let bridge = api_key_bridge();
        let request = Request::post("/youtube/v3/videos").upload();
        assert_eq!(bridge.base_url(&request), "https://www.googleapis.com/upload");
        assert_eq!(bridge.path_join(&request), PathJoin::Append);
        let plain = Request::get("/youtube/v3/videos");
        assert_eq!(bridge.base_url(&plain), "https://www.googleapis.com");
        assert_eq!(bridge.path_join(&plain), PathJoin::Reference);
    }

    #[test]
    fn test_token_provider_implies_oauth() {
        let bridge = YoutubeBridge::with_token_provider(
            &BridgeConfig::default(),
            Arc::new(StaticToken::new("ya29.abc").with_source("gcloud")),
        )
        .unwrap();
        assert_eq!(bridge.auth_mode(), AuthMode::Oauth);
        assert_eq!(bridge.audit_fields()["auth_source"], "gcloud");
    }

    #[test]
    fn test_items_and_top_level_array() {
        let bridge = api_key_bridge();
        let headers = Headers::new();
        let raw = |body| RawResponse {
            status_code: 200,
            status: "200 OK",
            headers: &headers,
            body,
        };
        let response = bridge.normalize_response(raw(r#"{"items":[{"id":"v1"}],"nextPageToken":"CAUQAA"}"#));
        assert_eq!(response.list.len(), 1);
        assert_eq!(response.data_str("nextPageToken"), Some("CAUQAA"));

        let response = bridge.normalize_response(raw(r#"[{"id":"a"},{"id":"b"}]"#));
        assert_eq!(response.list.len(), 2);
    }
}
