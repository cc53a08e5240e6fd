//! App Store Connect API.
//!
//! Calls carry an App JWT as Bearer. Bodies follow JSON:API: `data` holds a
//! resource or a list of them and `links.next` points at the next page.

use crate::client::Client;
use crate::envelope::{apply_array, array_field, parse_body, required, secret_redactor};
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

pub struct AppstoreBridge {
    base_url: String,
    tokens: Arc<dyn TokenProvider>,
    redactor: Redactor,
}

impl AppstoreBridge {
    /// Signed JWT taken from `config.token`.
    pub fn new(config: &BridgeConfig) -> Result<Self> {
        let jwt = required(config.token.as_ref(), "app store connect jwt")?;
        Self::with_token_provider(config, Arc::new(StaticToken::new(jwt).with_source("config")))
    }

    /// JWTs minted per call by `tokens`, e.g. a signer that refreshes before
    /// the 20 minute expiry.
    pub fn with_token_provider(config: &BridgeConfig, tokens: Arc<dyn TokenProvider>) -> Result<Self> {
        let spec = ProviderSpec::get(ProviderId::Appstore);
        Ok(Self {
            base_url: config.base_url_or(spec).to_string(),
            redactor: secret_redactor(config.token.as_deref())?,
            tokens,
        })
    }
}

impl std::fmt::Debug for AppstoreBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppstoreBridge")
            .field("base_url", &self.base_url)
            .field("auth_source", &self.tokens.source())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Bridge for AppstoreBridge {
    fn provider(&self) -> ProviderId {
        ProviderId::Appstore
    }

    fn base_url(&self, _request: &Request) -> String {
        self.base_url.clone()
    }

    fn auth_scope(&self) -> String {
        format!("jwt:{}", self.tokens.source())
    }

    async fn install_auth(&self, outgoing: &mut Outgoing, ctx: &CallContext) -> Result<()> {
        let jwt = bearer_value(self.tokens.as_ref(), ctx.cancel_token()).await?;
        outgoing.bearer(&jwt);
        Ok(())
    }

    fn normalize_response(&self, raw: RawResponse<'_>) -> Response {
        let mut response = base_response(raw, self.spec().request_id_headers, &self.redactor);
        match parse_body(raw.body) {
            Some(Value::Object(obj)) => {
                if let Some(list) = array_field(&obj, "data") {
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
            ("auth_mode".to_string(), Value::from("token-jwt")),
            ("auth_source".to_string(), Value::from(self.tokens.source())),
        ])
    }
}

pub fn client(config: &BridgeConfig) -> Result<Client<AppstoreBridge>> {
    let executor = Executor::new(AppstoreBridge::new(config)?, config)?;
    Ok(Client::new(executor, Pagination::NextLink))
}

pub fn client_with_tokens(
    config: &BridgeConfig,
    tokens: Arc<dyn TokenProvider>,
) -> Result<Client<AppstoreBridge>> {
    let executor = Executor::new(AppstoreBridge::with_token_provider(config, tokens)?, config)?;
    Ok(Client::new(executor, Pagination::NextLink))
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::Headers;

    fn bridge() -> AppstoreBridge {
        AppstoreBridge::new(&BridgeConfig {
            token: Some("eyJhbGciOiJFUzI1NiJ9.payload.signature".to_string()),
            ..BridgeConfig::default()
        })
        .unwrap()
    }

    fn raw<'a>(status_code: u16, headers: &'a Headers, body: &'a str) -> RawResponse<'a> {
        RawResponse {
            status_code,
            status: "",
            headers,
            body,
        }
    }

    #[test]
    fn test_data_array_becomes_list() {
        let headers = Headers::new();
        let response = bridge().normalize_response(raw(
            200,
            &headers,
            r#"{"data":[{"type":"apps","id":"1"}],"links":{"self":"s","next":"https://api.appstoreconnect.apple.com/v1/apps?cursor=Mg"}}"#,
        ));
        assert_eq!(response.list.len(), 1);
        assert!(response.data.unwrap().contains_key("links"));
    }

    #[test]
    fn test_single_resource_keeps_list_empty() {
        let headers = Headers::new();
        let response = bridge().normalize_response(raw(200, &headers, r#"{"data":{"type":"apps","id":"1"}}"#));
        assert!(response.list.is_empty());
        assert!(response.data.is_some());
    }

    #[test]
    fn test_json_api_error_status_overrides_http_status() {
        let headers = Headers::from([("x-request-id".to_string(), "req-9".to_string())]);
        let err = bridge().normalize_error(raw(
            400,
            &headers,
            r#"{"errors":[{"status":"409","code":"ENTITY_ERROR","title":"Conflict","detail":"Version already exists"}]}"#,
        ));
        assert_eq!(err.status_code, 409);
        assert_eq!(err.code.as_deref(), Some("ENTITY_ERROR"));
        assert_eq!(err.message, "Version already exists");
        assert_eq!(err.request_id.as_deref(), Some("req-9"));
    }

    #[test]
    fn test_jwt_redacted_from_body() {
        let headers = Headers::new();
        let response = bridge().normalize_response(raw(
            200,
            &headers,
            r#"{"echo":"eyJhbGciOiJFUzI1NiJ9.payload.signature"}"#,
        ));
        assert!(!response.body.contains("payload.signature"));
    }
}
