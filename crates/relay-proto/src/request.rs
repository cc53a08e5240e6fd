//! Logical request shape handed from a bridge to the executor.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// HTTP methods the bridges issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    #[default]
    Get,
    Head,
    Options,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    /// Safe methods are the only ones that may be cached or retried.
    pub fn is_safe(self) -> bool {
        matches!(self, Self::Get | Self::Head | Self::Options)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a method string is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported http method: {0}")]
pub struct ParseMethodError(pub String);

impl FromStr for Method {
    type Err = ParseMethodError;

    /// Parses case-insensitively; a blank string means `GET`.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let upper = raw.trim().to_ascii_uppercase();
        match upper.as_str() {
            "" | "GET" => Ok(Self::Get),
            "HEAD" => Ok(Self::Head),
            "OPTIONS" => Ok(Self::Options),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            _ => Err(ParseMethodError(raw.trim().to_string())),
        }
    }
}

/// Request payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Body {
    #[default]
    Empty,
    /// Bytes sent verbatim.
    Raw(Vec<u8>),
    /// Structured value serialized as JSON.
    Json(serde_json::Value),
    /// File streamed as the body (media uploads).
    File(PathBuf),
}

impl Body {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Raw(bytes) => bytes.is_empty(),
            Self::Json(_) | Self::File(_) => false,
        }
    }

    /// The JSON object carried by this body, if any.
    pub fn as_json_object_mut(&mut self) -> Option<&mut serde_json::Map<String, serde_json::Value>> {
        match self {
            Self::Json(serde_json::Value::Object(map)) => Some(map),
            _ => None,
        }
    }
}

/// Provider-specific switches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Field mask header (Google Places).
    pub field_mask: Option<String>,
    /// Route through the provider's upload base URL.
    pub use_upload: bool,
    /// Route through the provider's custom-app base URL (Google Play).
    pub use_custom_app_base: bool,
}

/// A logical bridge call.
///
/// Holds the unresolved path and parameters; the executor resolves the
/// absolute URL. Parameter keys and values are trimmed on insertion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Request {
    pub method: Method,
    /// Overrides the bridge's base URL for this call.
    pub base_url: Option<String>,
    pub path: String,
    pub params: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
    pub body: Body,
    pub content_type: Option<String>,
    pub options: RequestOptions,
    /// Extra audit fields merged into every event of this call.
    pub log_fields: BTreeMap<String, serde_json::Value>,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into().trim().to_string(),
            ..Self::default()
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    /// Adds a query parameter; blank keys are ignored.
    pub fn param(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.set_param(key, value);
        self
    }

    pub fn set_param(&mut self, key: impl AsRef<str>, value: impl AsRef<str>) {
        let key = key.as_ref().trim();
        if key.is_empty() {
            return;
        }
        self.params
            .insert(key.to_string(), value.as_ref().trim().to_string());
    }

    pub fn header(mut self, key: impl AsRef<str>, value: impl Into<String>) -> Self {
        let key = key.as_ref().trim();
        if !key.is_empty() {
            self.headers.insert(key.to_string(), value.into());
        }
        self
    }

    pub fn json(mut self, value: serde_json::Value) -> Self {
        self.body = Body::Json(value);
        self
    }

    pub fn raw(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.body = Body::Raw(bytes.into());
        self
    }

    pub fn media_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.body = Body::File(path.into());
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn field_mask(mut self, mask: impl Into<String>) -> Self {
        self.options.field_mask = Some(mask.into());
        self
    }

    pub fn upload(mut self) -> Self {
        self.options.use_upload = true;
        self
    }

    pub fn custom_app_base(mut self) -> Self {
        self.options.use_custom_app_base = true;
        self
    }

    pub fn base_url(mut self, base: impl Into<String>) -> Self {
        self.base_url = Some(base.into());
        self
    }

    pub fn log_field(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.log_fields.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_parse_is_case_insensitive() {
        assert_eq!("get".parse::<Method>().unwrap(), Method::Get);
        assert_eq!(" Post ".parse::<Method>().unwrap(), Method::Post);
        assert_eq!("".parse::<Method>().unwrap(), Method::Get);
        assert!("TRACE".parse::<Method>().is_err());
    }

    #[test]
    fn test_safe_methods() {
        assert!(Method::Get.is_safe());
        assert!(Method::Head.is_safe());
        assert!(Method::Options.is_safe());
        assert!(!Method::Post.is_safe());
        assert!(!Method::Delete.is_safe());
    }

    #[test]
    fn test_params_are_trimmed_and_blank_keys_dropped() {
        let req = Request::get("/zones")
            .param(" page ", " 2 ")
            .param("  ", "ignored");
        assert_eq!(req.params.len(), 1);
        assert_eq!(req.params.get("page").map(String::as_str), Some("2"));
    }

    #[test]
    fn test_method_serializes_uppercase() {
        let json = serde_json::to_string(&Method::Patch).unwrap();
        assert_eq!(json, "\"PATCH\"");
    }
}
