//! Brace/quote-aware scanner for extracting complete function literals

use crate::error::SigdecError;

/// Locate one complete function literal starting at `start`.
///
/// From `start`, scanning jumps to the first opening brace and tracks brace
/// depth from there, ignoring braces inside string literals (all three
/// quote styles). The returned span runs from `start` through the closing
/// brace, inclusive. `name` is only used for error context.
///
/// Reaching end of input with unbalanced braces is fatal: a partial
/// function body must never be handed to the evaluator.
pub fn locate<'a>(config: &'a str, start: usize, name: &str) -> Result<&'a str, SigdecError> {
    let bytes = config.as_bytes();

    let open = bytes
        .get(start..)
        .unwrap_or_default()
        .iter()
        .position(|&b| b == b'{')
        .map(|p| start + p)
        .ok_or_else(|| SigdecError::AlgorithmNotFound {
            stage: "function scan",
            wanted: name.to_string(),
        })?;

    let mut depth = 1usize;
    let mut str_delim: u8 = 0;
    let mut pos = open + 1;

    while pos < bytes.len() {
        let b = bytes[pos];
        match b {
            b'{' if str_delim == 0 => depth += 1,
            b'}' if str_delim == 0 => {
                depth -= 1;
                if depth == 0 {
                    return Ok(&config[start..=pos]);
                }
            }
            b'`' | b'"' | b'\'' => {
                if !is_escaped(bytes, pos) {
                    if str_delim == 0 {
                        str_delim = b;
                    } else if str_delim == b {
                        str_delim = 0;
                    }
                }
            }
            _ => {}
        }
        pos += 1;
    }

    Err(SigdecError::UnterminatedFunction {
        wanted: name.to_string(),
    })
}

/// A delimiter is escaped when preceded by an odd run of backslashes;
/// an even run escapes itself and leaves the delimiter active.
fn is_escaped(bytes: &[u8], pos: usize) -> bool {
    let mut backslashes = 0;
    while backslashes < pos && bytes[pos - 1 - backslashes] == b'\\' {
        backslashes += 1;
    }
    backslashes % 2 == 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_function_span() {
        let src = r#"foo=function(a){return a}"#;
        let span = locate(src, 0, "foo").unwrap();
        assert_eq!(span, src);
    }

    #[test]
    fn test_brace_inside_string_is_ignored() {
        let src = r#"foo=function(a){if(a){return "}"}return a}"#;
        let span = locate(src, 0, "foo").unwrap();
        assert_eq!(span, src);
    }

    #[test]
    fn test_nested_braces() {
        let src = "f=function(a){for(;;){if(a){a--}}return a};var g=1;";
        let span = locate(src, 0, "f").unwrap();
        assert_eq!(span, "f=function(a){for(;;){if(a){a--}}return a}");
    }

    #[test]
    fn test_escaped_quote_does_not_close_string() {
        // The \" keeps the string open, so the } after it is still quoted.
        let src = r#"f=function(a){return "\"}"}"#;
        let span = locate(src, 0, "f").unwrap();
        assert_eq!(span, src);
    }

    #[test]
    fn test_double_backslash_closes_string() {
        // "\\" is a complete string, so the next } really closes the body.
        let src = r#"f=function(a){return "\\"}; trailing"#;
        let span = locate(src, 0, "f").unwrap();
        assert_eq!(span, r#"f=function(a){return "\\"}"#);
    }

    #[test]
    fn test_other_quote_kind_inside_string() {
        let src = r#"f=function(a){var b='`{';return b}"#;
        let span = locate(src, 0, "f").unwrap();
        assert_eq!(span, src);
    }

    #[test]
    fn test_start_offset_respected() {
        let src = "var x={a:1};later=function(a){return a+1}";
        let start = src.find("later").unwrap();
        let span = locate(src, start, "later").unwrap();
        assert_eq!(span, "later=function(a){return a+1}");
    }

    #[test]
    fn test_unterminated_function_fails() {
        let src = "f=function(a){if(a){return a}";
        let err = locate(src, 0, "f").unwrap_err();
        match err {
            SigdecError::UnterminatedFunction { wanted } => assert_eq!(wanted, "f"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_no_opening_brace_fails() {
        let err = locate("no braces here", 0, "f").unwrap_err();
        assert!(matches!(err, SigdecError::AlgorithmNotFound { .. }));
    }
}
