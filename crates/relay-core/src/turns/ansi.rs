//! Byte-level ANSI escape removal.

const ESC: u8 = 0x1b;
const BEL: u8 = 0x07;

/// Removes CSI (`ESC [ … letter`) and OSC (`ESC ] … BEL` or `ESC ] … ESC \`)
/// sequences. Any other `ESC` drops itself and the byte after it.
///
/// An unterminated CSI consumes input up to and including the next ASCII
/// letter, so `"start\x1b[end"` becomes `"startnd"`.
pub fn strip_ansi(input: &str) -> String {
    let bytes = input.as_bytes();
    if !bytes.contains(&ESC) {
        return input.to_string();
    }
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == ESC && i + 1 < bytes.len() {
            match bytes[i + 1] {
                b'[' => {
                    i += 2;
                    while i < bytes.len() {
                        let c = bytes[i];
                        i += 1;
                        if c.is_ascii_alphabetic() {
                            break;
                        }
                    }
                }
                b']' => {
                    i += 2;
                    while i < bytes.len() {
                        if bytes[i] == BEL {
                            i += 1;
                            break;
                        }
                        if bytes[i] == ESC && bytes.get(i + 1) == Some(&b'\\') {
                            i += 2;
                            break;
                        }
                        i += 1;
                    }
                }
                _ => i += 1,
            }
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removes_csi_and_osc() {
        let input = "\x1b[31mred\x1b[0m plain \x1b]0;title\x07done";
        assert_eq!(strip_ansi(input), "red plain done");
    }

    #[test]
    fn test_osc_with_string_terminator() {
        assert_eq!(strip_ansi("a\x1b]8;;http://x\x1b\\b"), "ab");
    }

    #[test]
    fn test_incomplete_csi_eats_through_next_letter() {
        assert_eq!(strip_ansi("start\x1b[end"), "startnd");
    }

    #[test]
    fn test_other_escape_drops_one_byte() {
        // ESC followed by '(' drops only the '('.
        assert_eq!(strip_ansi("x\x1b(By"), "xBy");
    }

    #[test]
    fn test_trailing_escape_kept() {
        assert_eq!(strip_ansi("tail\x1b"), "tail\x1b");
    }

    #[test]
    fn test_plain_and_unicode_untouched() {
        assert_eq!(strip_ansi(""), "");
        assert_eq!(strip_ansi("│ résumé ✓"), "│ résumé ✓");
        assert_eq!(strip_ansi("\x1b[1m✓\x1b[22m ok"), "✓ ok");
    }
}
