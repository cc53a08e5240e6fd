//! Turning provider error bodies into [`ApiError`] values.
//!
//! Recognized envelopes, checked in this order:
//! - `{"errors": [{code, title, detail, message, status, reason}, …]}`
//!   (Cloudflare, App Store JSON:API)
//! - `{"error": {code, status, message, errors: [{reason}], details: […]}}`
//!   (Google APIs)
//! - `{"error": "invalid_grant", "error_description": "…"}` (OAuth endpoints)
//! - `{"success": false, "messages": [{message}]}`
//! - a bare top-level `message`
//!
//! Anything else keeps the (redacted, truncated) body as the message.

use crate::headers::{self, Headers};
use crate::redact::Redactor;
use crate::text::truncate_with_ellipsis;
use relay_proto::{ApiError, JsonObject, ProviderId};
use serde_json::Value;

/// Longest non-JSON body copied into an error message.
const MAX_MESSAGE_CHARS: usize = 512;

/// Inputs for [`normalize_http_error`].
#[derive(Debug, Clone, Copy)]
pub struct ErrorSource<'a> {
    pub provider: ProviderId,
    pub status_code: u16,
    pub headers: &'a Headers,
    pub body: &'a str,
    pub request_id_headers: &'a [&'a str],
}

/// Builds a redacted error from a non-success HTTP response.
pub fn normalize_http_error(source: ErrorSource<'_>, redactor: &Redactor) -> ApiError {
    let body = source.body.trim();
    let mut err = ApiError {
        provider: source.provider.as_str().to_string(),
        status_code: if source.status_code == 0 {
            ApiError::TRANSPORT_STATUS
        } else {
            i32::from(source.status_code)
        },
        request_id: request_id(source.headers, source.request_id_headers, redactor),
        raw_body: redactor.redact_string(body),
        ..ApiError::default()
    };

    if body.is_empty() {
        err.message = "empty response body".to_string();
        return err;
    }
    let Some(parsed) = parse_object(body) else {
        err.message = truncate_with_ellipsis(&redactor.redact(body), MAX_MESSAGE_CHARS);
        return err;
    };

    if let Some(list) = parsed.get("errors").and_then(Value::as_array).filter(|l| !l.is_empty()) {
        apply_error_list(&mut err, list, redactor);
    } else if let Some(obj) = parsed.get("error").and_then(Value::as_object) {
        apply_error_object(&mut err, obj, redactor);
    } else if let Some(code) = string_field(&parsed, "error") {
        err.code = Some(redactor.redact_string(&code));
        err.message = string_field(&parsed, "error_description")
            .map(|d| redactor.redact_string(&d))
            .unwrap_or_default();
    }

    if err.message.is_empty()
        && let Some(messages) = parsed.get("messages").and_then(Value::as_array)
        && let Some(first) = messages
            .iter()
            .filter_map(Value::as_object)
            .find_map(|m| string_field(m, "message"))
    {
        err.message = redactor.redact_string(&first);
    }
    if err.message.is_empty()
        && let Some(message) = string_field(&parsed, "message")
    {
        err.message = redactor.redact_string(&message);
    }
    if let Some(kind) = string_field(&parsed, "type") {
        err.error_type = Some(redactor.redact_string(&kind));
    }
    if let Some(doc) = string_field(&parsed, "documentation_url") {
        err.documentation_url = Some(redactor.redact_string(&doc));
    }
    if err.message.trim().is_empty() {
        err.message = format!("{} api request failed", source.provider);
    }
    err
}

/// Builds an error for a request that never produced a response.
pub fn transport_error(provider: ProviderId, error: &dyn std::fmt::Display, redactor: &Redactor) -> ApiError {
    ApiError::transport(
        provider.as_str(),
        redactor.redact_string(&error.to_string()),
    )
}

fn apply_error_list(err: &mut ApiError, list: &[Value], redactor: &Redactor) {
    err.details = redacted_objects(list, redactor);
    let Some(first) = err.details.first() else {
        return;
    };
    err.code = scalar_field(first, "code");
    err.title = string_field(first, "title");
    err.reason = string_field(first, "reason");
    err.message = string_field(first, "detail")
        .or_else(|| string_field(first, "message"))
        .unwrap_or_default();
    // JSON:API carries the HTTP status as a string and it wins.
    if let Some(status) = first.get("status").and_then(Value::as_str)
        && let Ok(parsed) = status.trim().parse::<i32>()
        && parsed > 0
    {
        err.status_code = parsed;
    }
    if err.code.is_none() {
        err.code = err
            .details
            .iter()
            .find_map(|detail| scalar_field(detail, "code"));
    }
}

fn apply_error_object(err: &mut ApiError, obj: &JsonObject, redactor: &Redactor) {
    err.code = scalar_field(obj, "code")
        .or_else(|| (err.status_code > 0).then(|| err.status_code.to_string()));
    err.status = string_field(obj, "status").map(|s| redactor.redact_string(&s));
    err.message = string_field(obj, "message")
        .map(|m| redactor.redact_string(&m))
        .unwrap_or_default();
    let nested = obj
        .get("errors")
        .and_then(Value::as_array)
        .map(|list| redacted_objects(list, redactor))
        .unwrap_or_default();
    err.reason = nested.iter().find_map(|e| string_field(e, "reason"));
    err.details = obj
        .get("details")
        .and_then(Value::as_array)
        .map(|list| redacted_objects(list, redactor))
        .filter(|details| !details.is_empty())
        .unwrap_or(nested);
}

fn request_id(response_headers: &Headers, names: &[&str], redactor: &Redactor) -> Option<String> {
    names
        .iter()
        .copied()
        .chain(["X-Request-Id"])
        .find_map(|name| headers::get(response_headers, name))
        .map(|id| redactor.redact_string(id))
}

/// Parses a body as a JSON object.
pub fn parse_object(body: &str) -> Option<JsonObject> {
    match serde_json::from_str::<Value>(body.trim()).ok()? {
        Value::Object(obj) => Some(obj),
        _ => None,
    }
}

/// Keeps the object elements of a JSON array.
pub fn objects(values: &[Value]) -> Vec<JsonObject> {
    values
        .iter()
        .filter_map(|value| value.as_object().cloned())
        .collect()
}

fn redacted_objects(values: &[Value], redactor: &Redactor) -> Vec<JsonObject> {
    objects(values)
        .into_iter()
        .map(|obj| {
            let mut value = Value::Object(obj);
            redactor.redact_json(&mut value);
            match value {
                Value::Object(obj) => obj,
                _ => JsonObject::new(),
            }
        })
        .collect()
}

/// Trimmed non-empty string field.
pub fn string_field(obj: &JsonObject, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// String or integer field rendered as a string.
fn scalar_field(obj: &JsonObject, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => match n.as_i64() {
            Some(0) => None,
            Some(i) => Some(i.to_string()),
            None => Some(n.to_string()),
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalize(provider: ProviderId, status: u16, pairs: &[(&str, &str)], body: &str) -> ApiError {
        let headers = headers::from_pairs(pairs.iter().copied());
        normalize_http_error(
            ErrorSource {
                provider,
                status_code: status,
                headers: &headers,
                body,
                request_id_headers: &["CF-Ray", "X-Request-ID"],
            },
            &Redactor::new(),
        )
    }

    #[test]
    fn test_cloudflare_errors_list() {
        let err = normalize(
            ProviderId::Cloudflare,
            403,
            &[("CF-Ray", "8f1e-SJC")],
            r#"{"success":false,"errors":[{"code":10000,"message":"Authentication error"}],"messages":[]}"#,
        );
        assert_eq!(err.status_code, 403);
        assert_eq!(err.code.as_deref(), Some("10000"));
        assert_eq!(err.message, "Authentication error");
        assert_eq!(err.request_id.as_deref(), Some("8f1e-SJC"));
        assert_eq!(err.details.len(), 1);
        assert_eq!(
            err.to_string(),
            "cloudflare api error: status=403, code=10000, message=Authentication error"
        );
    }

    #[test]
    fn test_google_error_object() {
        let err = normalize(
            ProviderId::Youtube,
            403,
            &[("X-Request-Id", "req-9")],
            r#"{"error":{"code":403,"status":"PERMISSION_DENIED","message":"quota exceeded","errors":[{"reason":"quotaExceeded","domain":"youtube.quota"}]}}"#,
        );
        assert_eq!(err.code.as_deref(), Some("403"));
        assert_eq!(err.status.as_deref(), Some("PERMISSION_DENIED"));
        assert_eq!(err.reason.as_deref(), Some("quotaExceeded"));
        assert_eq!(err.message, "quota exceeded");
        assert_eq!(err.request_id.as_deref(), Some("req-9"));
        assert_eq!(err.details[0]["domain"], "youtube.quota");
    }

    #[test]
    fn test_google_code_defaults_to_http_status() {
        let err = normalize(
            ProviderId::GooglePlaces,
            400,
            &[],
            r#"{"error":{"message":"bad field mask"}}"#,
        );
        assert_eq!(err.code.as_deref(), Some("400"));
    }

    #[test]
    fn test_jsonapi_string_status_overrides_http_status() {
        let err = normalize(
            ProviderId::Appstore,
            400,
            &[],
            r#"{"errors":[{"status":"409","code":"ENTITY_ERROR","title":"Conflict","detail":"already exists"}]}"#,
        );
        assert_eq!(err.status_code, 409);
        assert_eq!(err.code.as_deref(), Some("ENTITY_ERROR"));
        assert_eq!(err.title.as_deref(), Some("Conflict"));
        assert_eq!(err.message, "already exists");
    }

    #[test]
    fn test_oauth_error_string() {
        let err = normalize(
            ProviderId::GooglePlay,
            400,
            &[],
            r#"{"error":"invalid_grant","error_description":"Token has been expired or revoked."}"#,
        );
        assert_eq!(err.code.as_deref(), Some("invalid_grant"));
        assert_eq!(err.message, "Token has been expired or revoked.");
    }

    #[test]
    fn test_success_false_messages() {
        let err = normalize(
            ProviderId::Cloudflare,
            200,
            &[],
            r#"{"success":false,"errors":[],"messages":[{"message":"zone paused"}]}"#,
        );
        assert_eq!(err.message, "zone paused");
    }

    #[test]
    fn test_empty_and_non_json_bodies() {
        let err = normalize(ProviderId::Cloudflare, 502, &[], "   ");
        assert_eq!(err.message, "empty response body");

        let err = normalize(
            ProviderId::Cloudflare,
            502,
            &[],
            "<html>bad gateway Bearer abc.def</html>",
        );
        assert_eq!(err.message, "<html>bad gateway Bearer ***</html>");
        assert_eq!(err.raw_body, "<html>bad gateway Bearer ***</html>");
    }

    #[test]
    fn test_unrecognized_json_gets_default_message() {
        let err = normalize(ProviderId::GooglePlaces, 500, &[], r#"{"ok":false}"#);
        assert_eq!(err.message, "google-places api request failed");
    }

    #[test]
    fn test_secrets_redacted_everywhere() {
        let err = normalize(
            ProviderId::Youtube,
            401,
            &[],
            r#"{"error":{"message":"bad key AIzaSyA1234567890abcdefghijkl","details":[{"hint":"Bearer zzz.yyy"}]}}"#,
        );
        let json = serde_json::to_string(&err).unwrap();
        assert!(!json.contains("AIzaSyA1234567890"));
        assert!(!json.contains("zzz.yyy"));
    }

    #[test]
    fn test_request_id_falls_back_to_generic_header() {
        let headers = headers::from_pairs([("x-request-id", "generic-1")]);
        let err = normalize_http_error(
            ErrorSource {
                provider: ProviderId::Youtube,
                status_code: 500,
                headers: &headers,
                body: "",
                request_id_headers: &["X-Google-Request-Id"],
            },
            &Redactor::new(),
        );
        assert_eq!(err.request_id.as_deref(), Some("generic-1"));
    }

    #[test]
    fn test_transport_error_redacted() {
        let err = transport_error(
            ProviderId::Cloudflare,
            &"connect failed for https://h.test/?key=abc",
            &Redactor::new(),
        );
        assert_eq!(err.status_code, -1);
        assert_eq!(err.message, "connect failed for https://h.test/?key=***");
    }
}
