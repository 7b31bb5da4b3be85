//! C-style escape interpretation for DTS string literals.

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringParseError {
    #[error("escape at end of string")]
    TrailingEscape,
    #[error("hex escape with no valid digits")]
    HexEscapeNoDigits,
}

/// Interprets the escapes in the raw (quote-stripped) text of a string
/// literal.
pub fn unescape(raw: &str) -> Result<String, StringParseError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next().ok_or(StringParseError::TrailingEscape)? {
            'a' => out.push('\x07'),
            'b' => out.push('\x08'),
            'v' => out.push('\x0b'),
            'f' => out.push('\x0c'),
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            '0' => out.push('\0'),
            'x' => {
                let mut value = chars
                    .next()
                    .and_then(|c| c.to_digit(16))
                    .ok_or(StringParseError::HexEscapeNoDigits)?;
                if let Some(second) = chars.peek().and_then(|c| c.to_digit(16)) {
                    chars.next();
                    value = (value << 4) + second;
                }
                out.push(value as u8 as char);
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn plain_strings_pass_through() {
        assert_eq!(unescape("hello, world").unwrap(), "hello, world");
        assert_eq!(unescape("").unwrap(), "");
    }

    #[test]
    fn common_escapes() {
        assert_eq!(unescape(r#"a\nb\t\\c\""#).unwrap(), "a\nb\t\\c\"");
        assert_eq!(unescape(r"\x41\x6").unwrap(), "A\x06");
    }

    #[test]
    fn broken_escapes_error() {
        assert_eq!(unescape("abc\\"), Err(StringParseError::TrailingEscape));
        assert_eq!(unescape(r"\xzz"), Err(StringParseError::HexEscapeNoDigits));
    }
}
