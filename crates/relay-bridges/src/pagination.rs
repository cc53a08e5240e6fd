//! Page-walking strategies used by `list_all`.

use relay_proto::{JsonObject, Request, Response};
use serde_json::Value;

/// Pages fetched by `list_all` when the caller passes `0`.
pub const DEFAULT_MAX_PAGES: usize = 10;
/// `per_page` sent by page-number pagination unless the request sets one.
pub const DEFAULT_PER_PAGE: u32 = 100;

/// Envelope keys searched for list items when the bridge left `list` empty.
const LIST_KEYS: [&str; 5] = ["result", "items", "data", "places", "suggestions"];

/// How the next page is requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pagination {
    /// `page`/`per_page` query parameters. Stops at an empty or short page,
    /// or when `result_info.page >= result_info.total_pages`.
    PageNumber { per_page: u32 },
    /// A continuation token read from `response_field` of the response data
    /// and sent back as `request_field`, inside the JSON body when the
    /// request has one and as a query parameter otherwise.
    Cursor {
        response_field: String,
        request_field: String,
    },
    /// Absolute URL in `links.next` (JSON:API).
    NextLink,
}

impl Pagination {
    pub fn page_number() -> Self {
        Self::PageNumber {
            per_page: DEFAULT_PER_PAGE,
        }
    }

    /// Cursor read and sent under the same field name. Blank means
    /// `nextPageToken`.
    pub fn cursor(field: &str) -> Self {
        let field = non_blank_or(field, "nextPageToken");
        Self::Cursor {
            response_field: field.clone(),
            request_field: field,
        }
    }

    pub fn cursor_pair(response_field: &str, request_field: &str) -> Self {
        Self::Cursor {
            response_field: non_blank_or(response_field, "nextPageToken"),
            request_field: non_blank_or(request_field, "pageToken"),
        }
    }

    pub(crate) fn first_page(&self, request: &mut Request) {
        if let Self::PageNumber { per_page } = self {
            if !request.params.contains_key("per_page") {
                request.set_param("per_page", per_page.to_string());
            }
            request.set_param("page", "1");
        }
    }

    /// Rewrites `request` for the page after `response`. Returns `false`
    /// when `response` was the last page.
    pub(crate) fn advance(&self, request: &mut Request, response: &Response, batch_len: usize) -> bool {
        match self {
            Self::PageNumber { per_page } => {
                if batch_len == 0 {
                    return false;
                }
                let requested = request
                    .params
                    .get("per_page")
                    .and_then(|raw| raw.trim().parse::<usize>().ok())
                    .filter(|n| *n > 0)
                    .unwrap_or(*per_page as usize);
                if batch_len < requested || last_page_by_result_info(response) {
                    return false;
                }
                let page = request
                    .params
                    .get("page")
                    .and_then(|raw| raw.trim().parse::<u64>().ok())
                    .unwrap_or(1);
                request.set_param("page", (page + 1).to_string());
                true
            }
            Self::Cursor {
                response_field,
                request_field,
            } => {
                let Some(next) = data_str(response, &[response_field.as_str()]) else {
                    return false;
                };
                if let Some(body) = request.body.as_json_object_mut() {
                    body.insert(request_field.clone(), Value::String(next));
                } else {
                    request.set_param(request_field, next);
                }
                true
            }
            Self::NextLink => {
                let Some(next) = data_str(response, &["links", "next"]) else {
                    return false;
                };
                request.path = next;
                request.params.clear();
                true
            }
        }
    }
}

fn non_blank_or(value: &str, fallback: &str) -> String {
    let value = value.trim();
    if value.is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

fn data_str(response: &Response, path: &[&str]) -> Option<String> {
    let (last, parents) = path.split_last()?;
    let mut obj = response.data.as_ref()?;
    for key in parents {
        obj = obj.get(*key)?.as_object()?;
    }
    obj.get(*last)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn last_page_by_result_info(response: &Response) -> bool {
    let Some(info) = response
        .data
        .as_ref()
        .and_then(|data| data.get("result_info"))
        .and_then(Value::as_object)
    else {
        return false;
    };
    match (
        info.get("page").and_then(Value::as_u64),
        info.get("total_pages").and_then(Value::as_u64),
    ) {
        (Some(page), Some(total)) => page >= total,
        _ => false,
    }
}

/// List items of a response: `list` when the bridge filled it, otherwise
/// the first array under a well-known envelope key of `data`.
pub fn items(response: &Response) -> Vec<JsonObject> {
    if !response.list.is_empty() {
        return response.list.clone();
    }
    let Some(data) = &response.data else {
        return Vec::new();
    };
    LIST_KEYS
        .iter()
        .find_map(|key| data.get(*key).and_then(Value::as_array))
        .map(|values| relay_core::normalize::objects(values))
        .unwrap_or_default()
}
