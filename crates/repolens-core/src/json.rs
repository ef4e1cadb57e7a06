//! Locating JSON objects inside free-form model output.
//!
//! Completion providers often wrap the requested object in prose or a
//! Markdown code fence. [`json_object_candidates`] yields every balanced
//! `{ ... }` region in order, honouring string literals and escapes so
//! braces inside strings do not confuse the depth count. Callers keep the
//! first candidate that parses as a JSON object, so `{placeholder}` in
//! leading prose does not hide the object that follows.

/// Balanced `{ ... }` regions of `text`, in order of their opening brace.
///
/// A region that fails to close is skipped and the scan resumes after its
/// `{`. After each candidate the scan also resumes just past its opening
/// brace, so objects nested in a non-JSON region are still offered.
pub fn json_object_candidates(text: &str) -> impl Iterator<Item = &str> {
    let bytes = text.as_bytes();
    let mut search_from = 0;
    std::iter::from_fn(move || {
        while let Some(offset) = text[search_from..].find('{') {
            let start = search_from + offset;
            search_from = start + 1;
            if let Some(end) = matching_brace(bytes, start) {
                return Some(&text[start..=end]);
            }
        }
        None
    })
}

/// Index of the `}` closing the object that opens at `start`.
fn matching_brace(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first(text: &str) -> Option<&str> {
        json_object_candidates(text).next()
    }

    fn all(text: &str) -> Vec<&str> {
        json_object_candidates(text).collect()
    }

    #[test]
    fn test_bare_object() {
        assert_eq!(first(r#"{"a":1}"#), Some(r#"{"a":1}"#));
    }

    #[test]
    fn test_object_in_prose() {
        let text = "Sure! Here is the analysis:\n{\"purpose\": \"x\"}\nLet me know if you need more.";
        assert_eq!(first(text), Some("{\"purpose\": \"x\"}"));
    }

    #[test]
    fn test_code_fence() {
        let text = "```json\n{\"a\": {\"b\": [1, 2]}}\n```";
        assert_eq!(first(text), Some("{\"a\": {\"b\": [1, 2]}}"));
    }

    #[test]
    fn test_braces_inside_strings() {
        let text = r#"{"code": "fn main() { println!(\"}\"); }", "n": 1} trailing"#;
        assert_eq!(
            first(text),
            Some(r#"{"code": "fn main() { println!(\"}\"); }", "n": 1}"#)
        );
    }

    #[test]
    fn test_candidates_in_order() {
        let text = r#"{"first": true} and {"second": true}"#;
        assert_eq!(
            all(text),
            vec![r#"{"first": true}"#, r#"{"second": true}"#]
        );
    }

    #[test]
    fn test_prose_braces_come_before_the_object() {
        let text = r#"The handler uses a {placeholder} token. {"purpose": "HTTP client"}"#;
        assert_eq!(all(text), vec!["{placeholder}", r#"{"purpose": "HTTP client"}"#]);
    }

    #[test]
    fn test_nested_object_is_offered_after_its_parent() {
        let text = r#"{ result: {"ok": true} }"#;
        assert_eq!(all(text), vec![text, r#"{"ok": true}"#]);
    }

    #[test]
    fn test_unclosed_then_valid() {
        let text = r#"use a { to open, then {"ok": 1}"#;
        // The stray brace swallows the rest and never closes, so the scan
        // restarts after it and finds the real object.
        assert_eq!(all(text), vec![r#"{"ok": 1}"#]);
    }

    #[test]
    fn test_no_object() {
        assert_eq!(first("no json here"), None);
        assert_eq!(first("{ never closed"), None);
        assert_eq!(first(""), None);
    }

    #[test]
    fn test_multibyte_text() {
        let text = "résumé → {\"ключ\": \"значение\"} ✓";
        assert_eq!(first(text), Some("{\"ключ\": \"значение\"}"));
    }
}
