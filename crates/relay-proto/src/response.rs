//! Normalized response returned to bridge callers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A JSON object as decoded from a provider body.
pub type JsonObject = serde_json::Map<String, serde_json::Value>;

/// Provider response after normalization.
///
/// `body` and header values are redacted copies. `data` and `list` are
/// decoded from the provider envelope by the bridge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status_code: u16,
    pub status: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub request_id: String,
    /// Provider-level success flag, for envelopes that carry one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonObject>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub list: Vec<JsonObject>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<JsonObject>,
    /// Served from the response cache instead of the network.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub from_cache: bool,
}

impl Response {
    /// 2xx and, when the envelope carries a success flag, that flag is true.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code) && self.success.unwrap_or(true)
    }

    /// Looks up a string field in `data`.
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data
            .as_ref()
            .and_then(|data| data.get(key))
            .and_then(serde_json::Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_requires_2xx_and_flag() {
        let mut resp = Response {
            status_code: 200,
            ..Response::default()
        };
        assert!(resp.is_success());

        resp.success = Some(false);
        assert!(!resp.is_success());

        resp.success = None;
        resp.status_code = 404;
        assert!(!resp.is_success());
    }

    #[test]
    fn test_serialization_omits_empty_fields() {
        let resp = Response {
            status_code: 204,
            status: "204 No Content".to_string(),
            ..Response::default()
        };
        let value = serde_json::to_value(&resp).unwrap();
        let obj = value.as_object().unwrap();
        assert!(obj.contains_key("status_code"));
        assert!(!obj.contains_key("list"));
        assert!(!obj.contains_key("from_cache"));
    }
}
