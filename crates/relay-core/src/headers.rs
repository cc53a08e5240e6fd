//! Response header helpers.
//!
//! Headers travel through the runtime as a `BTreeMap` keyed by lowercase
//! name, with repeated headers joined by `", "`.

use reqwest::header::HeaderMap;
use std::collections::BTreeMap;

pub type Headers = BTreeMap<String, String>;

/// Flattens a reqwest header map. Non-UTF-8 values are skipped.
pub fn from_header_map(map: &HeaderMap) -> Headers {
    let mut out = Headers::new();
    for (name, value) in map {
        let Ok(value) = value.to_str() else {
            continue;
        };
        out.entry(name.as_str().to_ascii_lowercase())
            .and_modify(|existing: &mut String| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    out
}

/// Case-insensitive lookup of a trimmed, non-empty header value.
pub fn get<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    let value = match headers.get(name) {
        Some(value) => Some(value),
        None => headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value),
    }?;
    let value = value.trim();
    (!value.is_empty()).then_some(value)
}

/// Builds a header map from literal pairs. Test and fixture helper.
pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Headers {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderValue, SET_COOKIE};

    #[test]
    fn test_repeated_headers_joined() {
        let mut map = HeaderMap::new();
        map.append(SET_COOKIE, HeaderValue::from_static("a=1"));
        map.append(SET_COOKIE, HeaderValue::from_static("b=2"));
        map.insert("CF-Ray", HeaderValue::from_static("8f1e-SJC"));
        let headers = from_header_map(&map);
        assert_eq!(headers.get("set-cookie").map(String::as_str), Some("a=1, b=2"));
        assert_eq!(get(&headers, "CF-Ray"), Some("8f1e-SJC"));
    }

    #[test]
    fn test_get_ignores_blank_values() {
        let headers = from_pairs([("X-Request-Id", "  "), ("ETag", "\"v1\"")]);
        assert_eq!(get(&headers, "x-request-id"), None);
        assert_eq!(get(&headers, "etag"), Some("\"v1\""));
    }
}
