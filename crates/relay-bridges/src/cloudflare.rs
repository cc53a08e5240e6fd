//! Cloudflare API v4.
//!
//! Bearer API token; responses use the `{success, errors, messages, result}`
//! envelope, and `success: false` is a failure even on a 2xx.

use crate::client::Client;
use crate::envelope::{apply_array, parse_body, required, secret_redactor};
use crate::pagination::Pagination;
use async_trait::async_trait;
use relay_core::cache::scope_fingerprint;
use relay_core::normalize::objects;
use relay_core::{
    Bridge, BridgeConfig, CallContext, Executor, Outgoing, ProviderSpec, RawResponse, Redactor,
    Result, base_response,
};
use relay_proto::{JsonObject, ProviderId, Request, Response};
use serde_json::Value;
use std::collections::BTreeMap;

pub struct CloudflareBridge {
    base_url: String,
    api_token: String,
    redactor: Redactor,
}

impl CloudflareBridge {
    pub fn new(config: &BridgeConfig) -> Result<Self> {
        let api_token = required(config.token.as_ref().or(config.api_key.as_ref()), "cloudflare api token")?;
        let spec = ProviderSpec::get(ProviderId::Cloudflare);
        Ok(Self {
            base_url: config.base_url_or(spec).to_string(),
            redactor: secret_redactor([api_token.as_str()])?,
            api_token,
        })
    }
}

impl std::fmt::Debug for CloudflareBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudflareBridge")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Bridge for CloudflareBridge {
    fn provider(&self) -> ProviderId {
        ProviderId::Cloudflare
    }

    fn base_url(&self, _request: &Request) -> String {
        self.base_url.clone()
    }

    fn auth_scope(&self) -> String {
        scope_fingerprint(&self.api_token)
    }

    async fn install_auth(&self, outgoing: &mut Outgoing, _ctx: &CallContext) -> Result<()> {
        outgoing.bearer(&self.api_token);
        Ok(())
    }

    fn normalize_response(&self, raw: RawResponse<'_>) -> Response {
        let mut response = base_response(raw, self.spec().request_id_headers, &self.redactor);
        match parse_body(raw.body) {
            Some(Value::Object(obj)) => apply_envelope(&mut response, obj),
            Some(Value::Array(values)) => apply_array(&mut response, &values),
            _ => {}
        }
        response
    }

    fn redactor(&self) -> &Redactor {
        &self.redactor
    }

    fn audit_fields(&self) -> BTreeMap<String, Value> {
        BTreeMap::from([("auth_mode".to_string(), Value::from("token"))])
    }
}

fn apply_envelope(response: &mut Response, mut obj: JsonObject) {
    if let Some(success) = obj.get("success").and_then(Value::as_bool) {
        response.success = Some(success);
    }
    if let Some(messages) = obj.get("messages").and_then(Value::as_array) {
        response.messages = objects(messages);
    }
    match obj.remove("result") {
        Some(Value::Object(result)) => response.data = Some(result),
        Some(Value::Array(values)) => {
            response.list = objects(&values);
            // Keep paging metadata reachable for the result_info sentinel.
            if let Some(info) = obj.remove("result_info") {
                response.data = Some(JsonObject::from_iter([("result_info".to_string(), info)]));
            }
        }
        Some(Value::Null) | None => response.data = Some(obj),
        Some(scalar) => {
            response.data = Some(JsonObject::from_iter([("value".to_string(), scalar)]));
        }
    }
}

/// Cloudflare client with page-number pagination (`per_page` 100).
pub fn client(config: &BridgeConfig) -> Result<Client<CloudflareBridge>> {
    let executor = Executor::new(CloudflareBridge::new(config)?, config)?;
    Ok(Client::new(executor, Pagination::page_number()))
}
