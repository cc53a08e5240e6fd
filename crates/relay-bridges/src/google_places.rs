//! Google Places API (New).

use crate::client::Client;
use crate::envelope::{apply_array, array_field, parse_body, required, secret_redactor};
use crate::pagination::Pagination;
use async_trait::async_trait;
use relay_core::cache::scope_fingerprint;
use relay_core::{
    Bridge, BridgeConfig, CallContext, Executor, Outgoing, ProviderSpec, RawResponse, Redactor,
    Result, base_response,
};
use relay_proto::{ProviderId, Request, Response};
use serde_json::Value;
use std::collections::BTreeMap;

pub const API_KEY_HEADER: &str = "X-Goog-Api-Key";
pub const FIELD_MASK_HEADER: &str = "X-Goog-FieldMask";

pub struct GooglePlacesBridge {
    base_url: String,
    api_key: String,
    redactor: Redactor,
}

impl GooglePlacesBridge {
    pub fn new(config: &BridgeConfig) -> Result<Self> {
        let api_key = required(config.api_key.as_ref(), "google places api key")?;
        let spec = ProviderSpec::get(ProviderId::GooglePlaces);
        Ok(Self {
            base_url: config.base_url_or(spec).to_string(),
            redactor: secret_redactor([api_key.as_str()])?,
            api_key,
        })
    }
}

impl std::fmt::Debug for GooglePlacesBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GooglePlacesBridge")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Bridge for GooglePlacesBridge {
    fn provider(&self) -> ProviderId {
        ProviderId::GooglePlaces
    }

    fn base_url(&self, _request: &Request) -> String {
        self.base_url.clone()
    }

    fn prepare(&self, request: &mut Request) {
        let mask = request
            .options
            .field_mask
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string);
        if let Some(mask) = mask {
            request.headers.insert(FIELD_MASK_HEADER.to_string(), mask.clone());
            request.log_fields.insert("field_mask".to_string(), Value::String(mask));
        }
    }

    fn auth_scope(&self) -> String {
        scope_fingerprint(&self.api_key)
    }

    async fn install_auth(&self, outgoing: &mut Outgoing, _ctx: &CallContext) -> Result<()> {
        outgoing.set_header(API_KEY_HEADER, self.api_key.clone());
        Ok(())
    }

    fn normalize_response(&self, raw: RawResponse<'_>) -> Response {
        let mut response = base_response(raw, self.spec().request_id_headers, &self.redactor);
        match parse_body(raw.body) {
            Some(Value::Object(obj)) => {
                if let Some(list) = array_field(&obj, "places").or_else(|| array_field(&obj, "suggestions")) {
                    response.list = list;
                    response.data = Some(obj);
                } else if let Some(Value::Object(place)) = obj.get("place") {
                    response.data = Some(place.clone());
                } else {
                    response.data = Some(obj);
                }
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
        BTreeMap::from([("auth_mode".to_string(), Value::from("api-key"))])
    }
}

/// Places client; search pages continue through `nextPageToken`.
pub fn client(config: &BridgeConfig) -> Result<Client<GooglePlacesBridge>> {
    let executor = Executor::new(GooglePlacesBridge::new(config)?, config)?;
    Ok(Client::new(executor, Pagination::cursor("nextPageToken")))
}
