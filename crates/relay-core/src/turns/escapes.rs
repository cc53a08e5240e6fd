//! Escape decoding for byte sequences given on the command line.

/// Decodes a flag value such as `\r`, `\r\n` or `"\x1b[A"` into raw bytes.
///
/// The trimmed value is read as the body of a double-quoted literal
/// (surrounding quotes are optional). When the literal is malformed the
/// trimmed value is returned unchanged, so `\q` stays `\q`.
pub fn decode_escapes(value: &str) -> Vec<u8> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    let quoted = if trimmed.starts_with('"') {
        trimmed.to_string()
    } else {
        format!("\"{trimmed}\"")
    };
    unquote(&quoted).unwrap_or_else(|| trimmed.as_bytes().to_vec())
}

fn unquote(quoted: &str) -> Option<Vec<u8>> {
    let bytes = quoted.as_bytes();
    if bytes.len() < 2 || bytes[0] != b'"' || bytes[bytes.len() - 1] != b'"' {
        return None;
    }
    let body = &quoted[1..quoted.len() - 1];
    let mut out = Vec::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        match c {
            '"' | '\n' => return None,
            '\\' => decode_one(&mut chars, &mut out)?,
            _ => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
    Some(out)
}

fn decode_one(chars: &mut std::str::Chars<'_>, out: &mut Vec<u8>) -> Option<()> {
    let c = chars.next()?;
    let simple = match c {
        'a' => Some(0x07),
        'b' => Some(0x08),
        'f' => Some(0x0c),
        'n' => Some(b'\n'),
        'r' => Some(b'\r'),
        't' => Some(b'\t'),
        'v' => Some(0x0b),
        '\\' => Some(b'\\'),
        '"' => Some(b'"'),
        _ => None,
    };
    if let Some(byte) = simple {
        out.push(byte);
        return Some(());
    }
    match c {
        'x' => out.push(u8::try_from(hex_value(chars, 2)?).ok()?),
        'u' | 'U' => {
            let digits = if c == 'u' { 4 } else { 8 };
            let ch = char::from_u32(hex_value(chars, digits)?)?;
            let mut buf = [0u8; 4];
            out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
        }
        '0'..='7' => {
            let mut value = c.to_digit(8)?;
            for _ in 0..2 {
                value = value * 8 + chars.next()?.to_digit(8)?;
            }
            out.push(u8::try_from(value).ok()?);
        }
        _ => return None,
    }
    Some(())
}

fn hex_value(chars: &mut std::str::Chars<'_>, digits: usize) -> Option<u32> {
    let mut value = 0u32;
    for _ in 0..digits {
        value = value * 16 + chars.next()?.to_digit(16)?;
    }
    Some(value)
}
