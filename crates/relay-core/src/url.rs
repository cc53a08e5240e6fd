//! URL assembly for bridge requests.
//!
//! Three ways to combine a base URL with a request path:
//!
//! | Strategy | base `https://h/client/v4` + `/zones` |
//! |---|---|
//! | [`PathJoin::Reference`] (RFC 3986) | `https://h/zones` |
//! | [`PathJoin::Append`] | `https://h/client/v4/zones` |
//! | [`PathJoin::KeepBasePath`] | `https://h/client/v4/zones` (and `/client/v4/zones` stays as is) |
//!
//! Absolute `http://`/`https://` paths bypass the base in every strategy.
//! Query parameters are merged with trimmed keys and values and encoded in
//! sorted key order, so the result never depends on insertion order.

use crate::error::{RelayError, Result};
use crate::redact::redact;
use std::collections::BTreeMap;
use url::Url;
use url::form_urlencoded;

/// How a relative request path combines with the base URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PathJoin {
    /// RFC 3986 reference resolution: a leading `/` replaces the base path.
    #[default]
    Reference,
    /// Always append the request path to the base path.
    Append,
    /// Append unless the request path already starts with the base path.
    KeepBasePath,
}

/// Resolves `path` against `base` with the given strategy.
pub fn resolve(
    strategy: PathJoin,
    base: &str,
    path: &str,
    params: &BTreeMap<String, String>,
) -> Result<String> {
    match strategy {
        PathJoin::Reference => resolve_url(base, path, params),
        PathJoin::Append => join_url(base, path, params),
        PathJoin::KeepBasePath => resolve_under_base(base, path, params),
    }
}

/// RFC 3986 reference resolution with merged query parameters.
pub fn resolve_url(base: &str, path: &str, params: &BTreeMap<String, String>) -> Result<String> {
    let path = required_path(path)?;
    if is_absolute(path) {
        return absolute(path, params);
    }
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    let mut url = parse_base(base)?
        .join(&path)
        .map_err(|e| RelayError::InvalidUrl(format!("{path}: {e}")))?;
    url.set_fragment(None);
    apply_params(&mut url, params);
    Ok(url.to_string())
}

/// Appends `path` to the base path, keeping any base path segments.
pub fn join_url(base: &str, path: &str, params: &BTreeMap<String, String>) -> Result<String> {
    let path = required_path(path)?;
    if is_absolute(path) {
        return absolute(path, params);
    }
    let (rel_path, rel_query) = split_query(path);
    let mut url = parse_base(base)?;
    let joined = format!(
        "{}/{}",
        url.path().trim_end_matches('/'),
        rel_path.trim_start_matches('/')
    );
    url.set_path(&joined);
    merge_relative_query(&mut url, rel_query);
    apply_params(&mut url, params);
    Ok(url.to_string())
}

/// Keeps the base path unless the request path already begins with it.
pub fn resolve_under_base(
    base: &str,
    path: &str,
    params: &BTreeMap<String, String>,
) -> Result<String> {
    let path = required_path(path)?;
    if is_absolute(path) {
        return absolute(path, params);
    }
    let (rel_path, rel_query) = split_query(path);
    let mut url = parse_base(base)?;
    let resolved = under_base_path(url.path(), rel_path);
    url.set_path(&resolved);
    url.set_fragment(None);
    merge_relative_query(&mut url, rel_query);
    apply_params(&mut url, params);
    Ok(url.to_string())
}

fn under_base_path(base_path: &str, request_path: &str) -> String {
    let request = format!("/{}", request_path.trim().trim_start_matches('/'));
    let base = format!("/{}", base_path.trim().trim_matches('/'));
    if base == "/" {
        return request;
    }
    if request == base || request.starts_with(&format!("{base}/")) {
        return request;
    }
    format!("{base}{request}")
}

/// Drops the query string. Unparseable input is returned unchanged.
pub fn strip_query(raw: &str) -> String {
    if raw.trim().is_empty() {
        return raw.to_string();
    }
    match Url::parse(raw) {
        Ok(mut url) => {
            url.set_query(None);
            url.to_string()
        }
        Err(_) => raw.to_string(),
    }
}

/// Form of a URL safe for logs: secrets redacted, password and query removed.
pub fn sanitize_url(raw: &str) -> String {
    let redacted = redact(raw);
    match Url::parse(&redacted) {
        Ok(mut url) => {
            url.set_query(None);
            // Only fails for cannot-be-a-base URLs, which carry no password.
            let _ = url.set_password(None);
            url.to_string()
        }
        Err(_) => redacted.into_owned(),
    }
}

fn required_path(path: &str) -> Result<&str> {
    let path = path.trim();
    if path.is_empty() {
        return Err(RelayError::InvalidUrl("request path is required".to_string()));
    }
    Ok(path)
}

fn is_absolute(path: &str) -> bool {
    path.starts_with("http://") || path.starts_with("https://")
}

fn absolute(path: &str, params: &BTreeMap<String, String>) -> Result<String> {
    let mut url =
        Url::parse(path).map_err(|e| RelayError::InvalidUrl(format!("{}: {e}", sanitize_url(path))))?;
    apply_params(&mut url, params);
    Ok(url.to_string())
}

fn parse_base(base: &str) -> Result<Url> {
    let base = base.trim();
    if base.is_empty() {
        return Err(RelayError::InvalidUrl("base url is required".to_string()));
    }
    Url::parse(base).map_err(|e| RelayError::InvalidUrl(format!("{}: {e}", sanitize_url(base))))
}

fn split_query(path: &str) -> (&str, Option<&str>) {
    let path = path.split('#').next().unwrap_or(path);
    match path.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path, None),
    }
}

/// Adds the query carried by a relative path on top of the base's query.
fn merge_relative_query(url: &mut Url, rel_query: Option<&str>) {
    let Some(rel_query) = rel_query.filter(|q| !q.is_empty()) else {
        return;
    };
    let mut merged = query_map(url);
    for (key, value) in form_urlencoded::parse(rel_query.as_bytes()) {
        merged
            .entry(key.into_owned())
            .or_default()
            .push(value.into_owned());
    }
    write_query(url, &merged);
}

/// Sets each parameter, replacing existing values for the same key.
fn apply_params(url: &mut Url, params: &BTreeMap<String, String>) {
    if params.is_empty() {
        return;
    }
    let mut merged = query_map(url);
    for (key, value) in params {
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        merged.insert(key.to_string(), vec![value.trim().to_string()]);
    }
    write_query(url, &merged);
}

fn query_map(url: &Url) -> BTreeMap<String, Vec<String>> {
    let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (key, value) in url.query_pairs() {
        map.entry(key.into_owned())
            .or_default()
            .push(value.into_owned());
    }
    map
}

fn write_query(url: &mut Url, pairs: &BTreeMap<String, Vec<String>>) {
    if pairs.is_empty() {
        url.set_query(None);
        return;
    }
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, values) in pairs {
        for value in values {
            serializer.append_pair(key, value);
        }
    }
    url.set_query(Some(&serializer.finish()));
}
