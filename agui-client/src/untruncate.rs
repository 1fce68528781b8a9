//! Best-effort completion of truncated JSON.
//!
//! Tool-call arguments stream as JSON fragments; subscribers get an advisory
//! parse of the bytes seen so far. The completion balances quotes and
//! brackets, finishes dangling literals, and supplies `null` for a key that
//! has no value yet. The raw argument string is never altered by this.

use serde_json::Value;

/// Completes a truncated JSON prefix into a best-effort parseable string.
pub fn untruncate_json(input: &str) -> String {
    let mut closers: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    // Last significant character outside strings; decides whether an
    // unterminated string is an object key or a value.
    let mut last_sig: Option<char> = None;

    for c in input.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '{' => {
                closers.push('}');
                last_sig = Some(c);
            }
            '[' => {
                closers.push(']');
                last_sig = Some(c);
            }
            '}' | ']' => {
                closers.pop();
                last_sig = Some(c);
            }
            '"' => {
                in_string = true;
            }
            c if c.is_whitespace() => {}
            _ => last_sig = Some(c),
        }
    }

    let mut out = input.to_string();

    if in_string {
        if escaped {
            out.pop();
        }
        out.push('"');
        // A string opened right after '{' or ',' inside an object is a key.
        let key_position = closers.last() == Some(&'}')
            && matches!(last_sig, None | Some('{') | Some(','));
        if key_position {
            out.push_str(": null");
        }
    } else {
        complete_dangling_literal(&mut out);
    }

    while matches!(out.trim_end().chars().last(), Some(',')) {
        out.truncate(out.trim_end().len() - 1);
    }
    if out.trim_end().ends_with(':') {
        out.push_str(" null");
    }

    for closer in closers.into_iter().rev() {
        out.push(closer);
    }
    out
}

/// Advisory parse of a truncated JSON prefix.
pub fn parse_partial_json(input: &str) -> Option<Value> {
    if input.trim().is_empty() {
        return None;
    }
    serde_json::from_str(&untruncate_json(input)).ok()
}

/// Finishes a cut-off `true`/`false`/`null` or trims a half-written number
/// tail (`12.`, `3e`, `-`).
fn complete_dangling_literal(out: &mut String) {
    let tail_start = out
        .rfind(|c: char| matches!(c, ',' | ':' | '[' | '{') || c.is_whitespace())
        .map(|i| i + 1)
        .unwrap_or(0);
    let tail = out[tail_start..].to_string();
    if tail.is_empty() || tail.starts_with('"') {
        return;
    }
    for literal in ["true", "false", "null"] {
        if literal.starts_with(tail.as_str()) && literal != tail {
            out.push_str(&literal[tail.len()..]);
            return;
        }
    }
    while matches!(
        out.chars().last(),
        Some('.') | Some('-') | Some('+') | Some('e') | Some('E')
    ) {
        out.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// **Scenario**: the canonical streaming-args case: a string value cut
    /// mid-way parses to the prefix seen so far.
    #[test]
    fn cut_string_value_closes() {
        let parsed = parse_partial_json(r#"{"query":"te"#).unwrap();
        assert_eq!(parsed, json!({"query": "te"}));
    }

    #[test]
    fn open_containers_close_in_order() {
        let parsed = parse_partial_json(r#"{"a": [1, {"b": 2"#).unwrap();
        assert_eq!(parsed, json!({"a": [1, {"b": 2}]}));
    }

    #[test]
    fn key_without_value_gets_null() {
        let parsed = parse_partial_json(r#"{"a": 1, "b"#).unwrap();
        assert_eq!(parsed, json!({"a": 1, "b": null}));
        let parsed = parse_partial_json(r#"{"a":"#).unwrap();
        assert_eq!(parsed, json!({"a": null}));
    }

    #[test]
    fn trailing_comma_is_dropped() {
        let parsed = parse_partial_json(r#"{"a": 1,"#).unwrap();
        assert_eq!(parsed, json!({"a": 1}));
    }

    #[test]
    fn dangling_literal_completes() {
        let parsed = parse_partial_json(r#"{"done": tru"#).unwrap();
        assert_eq!(parsed, json!({"done": true}));
        let parsed = parse_partial_json(r#"{"v": nul"#).unwrap();
        assert_eq!(parsed, json!({"v": null}));
    }

    #[test]
    fn half_written_number_is_trimmed() {
        let parsed = parse_partial_json(r#"{"n": 12."#).unwrap();
        assert_eq!(parsed, json!({"n": 12}));
    }

    #[test]
    fn dangling_escape_is_dropped() {
        let parsed = parse_partial_json(r#"{"s": "a\"#).unwrap();
        assert_eq!(parsed, json!({"s": "a"}));
    }

    #[test]
    fn complete_json_is_unchanged() {
        let input = r#"{"query":"test"}"#;
        assert_eq!(untruncate_json(input), input);
    }

    #[test]
    fn empty_input_yields_none() {
        assert!(parse_partial_json("").is_none());
        assert!(parse_partial_json("   ").is_none());
    }
}
