//! Google Play Developer API (androidpublisher) and Play Custom App API.

use crate::client::Client;
use crate::envelope::{apply_array, first_array, parse_body, required, secret_redactor};
use crate::pagination::Pagination;
use crate::token::{StaticToken, TokenProvider, bearer_value};
use async_trait::async_trait;
use relay_core::{
    Bridge, BridgeConfig, CallContext, Executor, Outgoing, ProviderSpec, RawResponse, Redactor,
    Result, base_response,
};
use relay_proto::{ProviderId, Request, Response};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct GooglePlayBridge {
    base_url: String,
    upload_base_url: String,
    custom_app_base_url: String,
    tokens: Arc<dyn TokenProvider>,
    redactor: Redactor,
}

impl GooglePlayBridge {
    /// Bearer token taken from `config.token`.
    pub fn new(config: &BridgeConfig) -> Result<Self> {
        let token = required(config.token.as_ref(), "google play access token")?;
        Self::with_token_provider(config, Arc::new(StaticToken::new(token).with_source("config")))
    }

    pub fn with_token_provider(config: &BridgeConfig, tokens: Arc<dyn TokenProvider>) -> Result<Self> {
        let spec = ProviderSpec::get(ProviderId::GooglePlay);
        let base_url = config.base_url_or(spec).to_string();
        Ok(Self {
            upload_base_url: config
                .upload_base_url_or(spec)
                .map_or_else(|| base_url.clone(), str::to_string),
            custom_app_base_url: config
                .custom_app_base_url_or(spec)
                .map_or_else(|| base_url.clone(), str::to_string),
            redactor: secret_redactor(config.token.as_deref())?,
            base_url,
            tokens,
        })
    }
}

impl std::fmt::Debug for GooglePlayBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GooglePlayBridge")
            .field("base_url", &self.base_url)
            .field("upload_base_url", &self.upload_base_url)
            .field("custom_app_base_url", &self.custom_app_base_url)
            .field("auth_source", &self.tokens.source())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Bridge for GooglePlayBridge {
    fn provider(&self) -> ProviderId {
        ProviderId::GooglePlay
    }

    fn base_url(&self, request: &Request) -> String {
        if request.options.use_custom_app_base {
            self.custom_app_base_url.clone()
        } else if request.options.use_upload {
            self.upload_base_url.clone()
        } else {
            self.base_url.clone()
        }
    }

    fn prepare(&self, request: &mut Request) {
        if request.options.use_upload {
            request.log_fields.insert("use_upload".to_string(), Value::Bool(true));
        }
        if request.options.use_custom_app_base {
            request.log_fields.insert("custom_app".to_string(), Value::Bool(true));
        }
    }

    fn auth_scope(&self) -> String {
        format!("oauth:{}", self.tokens.source())
    }

    async fn install_auth(&self, outgoing: &mut Outgoing, ctx: &CallContext) -> Result<()> {
        let token = bearer_value(self.tokens.as_ref(), ctx.cancel_token()).await?;
        outgoing.bearer(&token);
        Ok(())
    }

    fn normalize_response(&self, raw: RawResponse<'_>) -> Response {
        let mut response = base_response(raw, self.spec().request_id_headers, &self.redactor);
        match parse_body(raw.body) {
            Some(Value::Object(obj)) => {
                if let Some(list) = first_array(&obj) {
                    response.list = list;
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
        BTreeMap::from([
            ("auth_mode".to_string(), Value::from("oauth")),
            ("auth_source".to_string(), Value::from(self.tokens.source())),
        ])
    }
}

pub fn client(config: &BridgeConfig) -> Result<Client<GooglePlayBridge>> {
    let executor = Executor::new(GooglePlayBridge::new(config)?, config)?;
    Ok(Client::new(executor, Pagination::cursor("nextPageToken")))
}

pub fn client_with_tokens(
    config: &BridgeConfig,
    tokens: Arc<dyn TokenProvider>,
) -> Result<Client<GooglePlayBridge>> {
    let executor = Executor::new(GooglePlayBridge::with_token_provider(config, tokens)?, config)?;
    Ok(Client::new(executor, Pagination::cursor("nextPageToken")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::Headers;

    fn bridge() -> GooglePlayBridge {
        GooglePlayBridge::new(&BridgeConfig {
            token: Some("ya29.play-token-1234".to_string()),
            ..BridgeConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_requires_token() {
        assert!(GooglePlayBridge::new(&BridgeConfig::default()).is_err());
    }

    #[test]
    fn test_base_url_by_request_option() {
        let bridge = bridge();
        assert_eq!(
            bridge.base_url(&Request::get("/androidpublisher/v3/applications/app/reviews")),
            "https://androidpublisher.googleapis.com"
        );
        assert_eq!(
            bridge.base_url(&Request::post("/playcustomapp/v1/accounts/1/customApps").custom_app_base()),
            "https://playcustomapp.googleapis.com"
        );
        assert_eq!(
            bridge.base_url(&Request::post("/upload/androidpublisher/v3/applications/app/edits/e/bundles").upload()),
            "https://androidpublisher.googleapis.com"
        );
    }

    #[test]
    fn test_list_is_first_array_field() {
        let headers = Headers::new();
        let response = bridge().normalize_response(RawResponse {
            status_code: 200,
            status: "200 OK",
            headers: &headers,
            body: r#"{"pageInfo":{"totalResults":2},"reviews":[{"reviewId":"r1"},{"reviewId":"r2"}],"tokenPagination":{"nextPageToken":"t"}}"#,
        });
        assert_eq!(response.list.len(), 2);
        assert!(response.data.unwrap().contains_key("pageInfo"));
    }

    #[test]
    fn test_audit_fields_name_token_source() {
        let fields = bridge().audit_fields();
        assert_eq!(fields["auth_mode"], "oauth");
        assert_eq!(fields["auth_source"], "config");
    }
}
