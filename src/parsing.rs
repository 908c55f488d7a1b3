//! Parsing utilities for LLM responses.
//!
//! Defensive extraction of JSON from potentially messy model text: thinking
//! blocks, markdown fences, prose around an object, trailing commas and
//! single-quoted strings. Used as the best-effort fallback when a node's
//! output must satisfy a schema but the response is not clean JSON.

use serde_json::Value;

/// Strip `<think>...</think>` and `<thinking>...</thinking>` blocks and trim.
///
/// An unterminated block swallows the rest of the text.
pub fn strip_thinking(text: &str) -> String {
    let mut out = text.to_string();
    for (open, close) in [("<think>", "</think>"), ("<thinking>", "</thinking>")] {
        while let Some(start) = out.find(open) {
            match out[start..].find(close) {
                Some(offset) => {
                    let end = start + offset + close.len();
                    out.replace_range(start..end, "");
                }
                None => {
                    out.truncate(start);
                    break;
                }
            }
        }
    }
    out.trim().to_string()
}

/// Content of the first fenced code block, preferring one tagged `json`.
pub fn extract_code_block(text: &str) -> Option<&str> {
    let mut fallback = None;
    let mut rest = text;
    let mut offset = 0;

    while let Some(open) = rest.find("```") {
        let after = offset + open + 3;
        let Some(line_end) = text[after..].find('\n') else {
            break;
        };
        let lang = text[after..after + line_end].trim();
        let body_start = after + line_end + 1;
        let Some(close) = text[body_start..].find("```") else {
            break;
        };
        let body = text[body_start..body_start + close].trim();

        if lang.eq_ignore_ascii_case("json") {
            return Some(body);
        }
        if fallback.is_none() {
            fallback = Some(body);
        }

        offset = body_start + close + 3;
        rest = &text[offset..];
    }
    fallback
}

/// Find the first balanced `open ... close` span, ignoring brackets inside
/// string literals.
pub fn find_balanced(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let mut depth = 0usize;
    let mut in_string: Option<char> = None;
    let mut escaped = false;

    for (i, c) in text[start..].char_indices() {
        if let Some(quote) = in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == quote {
                in_string = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => in_string = Some(c),
            c if c == open => depth += 1,
            c if c == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Fix the malformations models produce most often: single-quoted strings,
/// trailing commas, and Python literals (`True`, `False`, `None`).
///
/// Returns `None` when the text needed no change.
pub fn repair_json(text: &str) -> Option<String> {
    let mut out = String::with_capacity(text.len());
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;
    let mut in_double = false;
    let mut in_single = false;

    while i < chars.len() {
        let c = chars[i];
        if in_double {
            out.push(c);
            if c == '\\' && i + 1 < chars.len() {
                out.push(chars[i + 1]);
                i += 1;
            } else if c == '"' {
                in_double = false;
            }
        } else if in_single {
            match c {
                '\\' if i + 1 < chars.len() && chars[i + 1] == '\'' => {
                    out.push('\'');
                    i += 1;
                }
                '\'' => {
                    out.push('"');
                    in_single = false;
                }
                '"' => out.push_str("\\\""),
                _ => out.push(c),
            }
        } else {
            match c {
                '"' => {
                    in_double = true;
                    out.push(c);
                }
                '\'' => {
                    in_single = true;
                    out.push('"');
                }
                ',' => {
                    let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
                    if !matches!(next, Some('}') | Some(']')) {
                        out.push(c);
                    }
                }
                _ => {
                    let word: String = chars[i..].iter().take_while(|c| c.is_alphabetic()).collect();
                    let replacement = match word.as_str() {
                        "True" => Some("true"),
                        "False" => Some("false"),
                        "None" => Some("null"),
                        _ => None,
                    };
                    match replacement {
                        Some(r) => {
                            out.push_str(r);
                            i += word.chars().count();
                            continue;
                        }
                        None if !word.is_empty() => {
                            out.push_str(&word);
                            i += word.chars().count();
                            continue;
                        }
                        None => out.push(c),
                    }
                }
            }
        }
        i += 1;
    }

    (out != text).then_some(out)
}

/// Best-effort extraction of structured data from model text.
///
/// Strategies, in order: direct parse, fenced code block, balanced object,
/// balanced array; each candidate is also retried after [`repair_json`].
pub fn extract_structured(text: &str) -> Option<Value> {
    let cleaned = strip_thinking(text);
    if cleaned.is_empty() {
        return None;
    }

    let candidates = [
        Some(cleaned.as_str()),
        extract_code_block(&cleaned),
        find_balanced(&cleaned, '{', '}'),
        find_balanced(&cleaned, '[', ']'),
    ];

    for candidate in candidates.into_iter().flatten() {
        if let Ok(value) = serde_json::from_str::<Value>(candidate) {
            return Some(value);
        }
        if let Some(repaired) = repair_json(candidate) {
            if let Ok(value) = serde_json::from_str::<Value>(&repaired) {
                return Some(value);
            }
        }
    }
    None
}

/// Truncate text for error messages.
pub(crate) fn snippet(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strips_think_blocks() {
        assert_eq!(strip_thinking("<think>hmm</think> answer "), "answer");
        assert_eq!(strip_thinking("a<thinking>x</thinking>b"), "ab");
        assert_eq!(strip_thinking("keep<think>never closed"), "keep");
    }

    #[test]
    fn prefers_json_fence() {
        let text = "```text\nnope\n```\nthen\n```json\n{\"a\": 1}\n```";
        assert_eq!(extract_code_block(text), Some("{\"a\": 1}"));
        assert_eq!(extract_code_block("```\n[1]\n```"), Some("[1]"));
    }

    #[test]
    fn balanced_ignores_braces_in_strings() {
        let text = r#"Result: {"a": "}{", "b": {"c": 2}} trailing"#;
        assert_eq!(
            find_balanced(text, '{', '}'),
            Some(r#"{"a": "}{", "b": {"c": 2}}"#)
        );
    }

    #[test]
    fn repairs_common_mistakes() {
        let repaired = repair_json("{'setup': 'Why?', 'tags': ['a',], 'ok': True,}").unwrap();
        let value: Value = serde_json::from_str(&repaired).unwrap();
        assert_eq!(value, json!({"setup": "Why?", "tags": ["a"], "ok": true}));
        assert!(repair_json(r#"{"clean": 1}"#).is_none());
    }

    #[test]
    fn extracts_from_prose() {
        let text = "Sure! Here it is:\n{\"setup\": \"x\", \"punchline\": \"y\"}\nEnjoy.";
        assert_eq!(
            extract_structured(text),
            Some(json!({"setup": "x", "punchline": "y"}))
        );
    }

    #[test]
    fn plain_text_yields_nothing() {
        assert_eq!(extract_structured("This is a mock response from the LLM."), None);
        assert_eq!(extract_structured("   "), None);
    }

    #[test]
    fn snippet_truncates_on_char_boundary() {
        assert_eq!(snippet("héllo world", 5), "héllo...");
        assert_eq!(snippet("short", 10), "short");
    }
}
