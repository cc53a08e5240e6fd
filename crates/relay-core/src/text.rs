//! Small string helpers shared by the runtime and the turn parser.

/// Truncates to at most `max_chars` characters, appending "..." when cut.
///
/// Used to keep non-JSON error bodies readable inside error messages.
///
/// # Examples
///
/// ```
/// use relay_core::truncate_with_ellipsis;
///
/// assert_eq!(truncate_with_ellipsis("upstream timeout", 8), "upstream...");
/// assert_eq!(truncate_with_ellipsis("ok", 8), "ok");
/// ```
pub fn truncate_with_ellipsis(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

/// Removes trailing `\r` and `\n` characters only.
pub fn trim_line_ending(line: &str) -> &str {
    line.trim_end_matches(['\r', '\n'])
}

/// Caps a raw line at `max_bytes`, backing off to a UTF-8 boundary when the
/// cut falls inside a character.
pub fn cap_line_bytes(line: &str, max_bytes: usize) -> &str {
    if max_bytes == 0 || line.len() <= max_bytes {
        return line;
    }
    let mut end = max_bytes;
    while end > 0 && !line.is_char_boundary(end) {
        end -= 1;
    }
    &line[..end]
}

/// First value that is non-empty after trimming, trimmed.
pub fn first_non_blank<'a, I>(values: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    values
        .into_iter()
        .map(str::trim)
        .find(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_counts_chars_not_bytes() {
        assert_eq!(truncate_with_ellipsis("→→→→", 2), "→→...");
        assert_eq!(truncate_with_ellipsis("abc", 3), "abc");
        assert_eq!(truncate_with_ellipsis("abc", 0), "...");
    }

    #[test]
    fn test_trim_line_ending_keeps_other_whitespace() {
        assert_eq!(trim_line_ending("  DONE \r\n"), "  DONE ");
        assert_eq!(trim_line_ending("\r\r"), "");
    }

    #[test]
    fn test_cap_line_bytes() {
        assert_eq!(cap_line_bytes("abcdef", 4), "abcd");
        assert_eq!(cap_line_bytes("ab🦀", 3), "ab");
        assert_eq!(cap_line_bytes("abc", 0), "abc");
    }

    #[test]
    fn test_first_non_blank() {
        assert_eq!(first_non_blank(["", "  ", " ray-1 ", "x"]), Some("ray-1"));
        assert_eq!(first_non_blank(["", " "]), None);
    }
}
