//! Helpers shared by the provider adapters.

use relay_core::normalize::objects;
use relay_core::{MASK, RelayError, Redactor, Result};
use relay_proto::{JsonObject, Response};
use serde_json::Value;

/// Built-in redaction plus literal rules for the configured secrets, so a
/// key that matches no generic pattern still never leaks.
pub(crate) fn secret_redactor<'a>(secrets: impl IntoIterator<Item = &'a str>) -> Result<Redactor> {
    let mut redactor = Redactor::new();
    for secret in secrets {
        let secret = secret.trim();
        // Short values would mask ordinary words.
        if secret.len() < 8 {
            continue;
        }
        redactor = redactor
            .with_rule(&regex::escape(secret), MASK)
            .map_err(|e| RelayError::Config(format!("redaction rule: {e}")))?;
    }
    Ok(redactor)
}

/// Required non-blank configuration value.
pub(crate) fn required(value: Option<&String>, what: &str) -> Result<String> {
    value
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| RelayError::Config(format!("{what} is required")))
}

/// Parses a body that may be an object or a top-level array.
pub(crate) fn parse_body(body: &str) -> Option<Value> {
    if body.trim().is_empty() {
        return None;
    }
    serde_json::from_str(body).ok()
}

/// Fills `list` from a top-level array body.
pub(crate) fn apply_array(response: &mut Response, values: &[Value]) {
    response.list = objects(values);
}

pub(crate) fn array_field(obj: &JsonObject, key: &str) -> Option<Vec<JsonObject>> {
    obj.get(key).and_then(Value::as_array).map(|v| objects(v))
}

/// The first array-valued field of `obj`, in key order.
pub(crate) fn first_array(obj: &JsonObject) -> Option<Vec<JsonObject>> {
    obj.values()
        .find_map(Value::as_array)
        .map(|values| objects(values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_secret_redactor_masks_literal_secret() {
        let redactor = secret_redactor(["plain-secret-123", "short"]).unwrap();
        assert_eq!(redactor.redact("value=plain-secret-123"), "value=***");
        assert_eq!(redactor.redact("short stays"), "short stays");
    }

    #[test]
    fn test_required_rejects_blank() {
        assert!(required(Some(&"  ".to_string()), "api key").is_err());
        assert!(required(None, "api key").is_err());
        assert_eq!(required(Some(&" k ".to_string()), "api key").unwrap(), "k");
    }

    #[test]
    fn test_first_array_uses_key_order() {
        let obj = json!({"b": [{"x": 1}], "a": "scalar", "c": [{"y": 2}]});
        let list = first_array(obj.as_object().unwrap()).unwrap();
        assert_eq!(list[0]["x"], 1);
    }
}
