//! Recovering JSON values from model output.
//!
//! Models wrap JSON in markdown fences, surround it with prose, leave trailing
//! commas, or stop mid-document when they hit the token limit. Every entry point
//! here reports which of those it had to work around through [`ParseOutcome`].

use serde_json::Value;

/// Most `}` characters [`pad_closing_braces`] will append before giving up.
pub const MAX_BRACE_PADDING: usize = 10;

/// Result of a strict-then-repair parse cascade.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome<T> {
    /// The input parsed as-is.
    Strict(T),
    /// The input parsed after the listed repairs.
    Repaired(T, Vec<RepairNote>),
    /// Every repair stage was exhausted.
    Failed(String),
}

impl<T> ParseOutcome<T> {
    pub fn value(self) -> Option<T> {
        match self {
            ParseOutcome::Strict(value) | ParseOutcome::Repaired(value, _) => Some(value),
            ParseOutcome::Failed(_) => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ParseOutcome::Failed(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ParseOutcome<U> {
        match self {
            ParseOutcome::Strict(value) => ParseOutcome::Strict(f(value)),
            ParseOutcome::Repaired(value, notes) => ParseOutcome::Repaired(f(value), notes),
            ParseOutcome::Failed(reason) => ParseOutcome::Failed(reason),
        }
    }

    fn from_notes(value: T, notes: Vec<RepairNote>) -> Self {
        if notes.is_empty() {
            ParseOutcome::Strict(value)
        } else {
            ParseOutcome::Repaired(value, notes)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairNote {
    StrippedCodeFence,
    /// Text before the first `{`/`[` or after the last `}`/`]` was dropped.
    SlicedToJson,
    RemovedTrailingCommas,
    /// Unterminated strings and open brackets were closed.
    ClosedTruncation,
    /// This many `}` were appended.
    PaddedBraces(usize),
}

const FENCE: &str = "```";
const FENCE_LANGUAGES: &[&str] = &["json", "JSON", "javascript"];

/// Remove one surrounding markdown code fence, if present.
///
/// Returns the inner text and whether a fence was removed.
pub fn strip_code_fence(text: &str) -> (&str, bool) {
    let trimmed = text.trim();
    let Some(mut inner) = trimmed.strip_prefix(FENCE) else {
        return (trimmed, false);
    };
    for language in FENCE_LANGUAGES {
        if let Some(rest) = inner.strip_prefix(language) {
            inner = rest;
            break;
        }
    }
    let inner = inner.strip_suffix(FENCE).unwrap_or(inner);
    (inner.trim(), true)
}

/// Parse `text` as JSON, applying progressively more aggressive repairs.
///
/// Stages: code fence removal, direct parse, slicing to the outermost brackets,
/// trailing comma removal, and closing a truncated document.
pub fn parse_tolerant(text: &str) -> ParseOutcome<Value> {
    let mut notes = Vec::new();
    let (text, fenced) = strip_code_fence(text);
    if fenced {
        notes.push(RepairNote::StrippedCodeFence);
    }
    if text.is_empty() {
        return ParseOutcome::Failed("empty response".into());
    }

    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return ParseOutcome::from_notes(value, notes);
    }

    let Some(start) = text.find(['{', '[']) else {
        tracing::debug!(target: "dreams.ai", "no JSON start found in model output");
        return ParseOutcome::Failed("no JSON object or array found".into());
    };

    if let Some(end) = text.rfind(['}', ']']).filter(|end| *end > start) {
        let sliced = &text[start..=end];
        if sliced.len() != text.len() {
            let mut sliced_notes = notes.clone();
            sliced_notes.push(RepairNote::SlicedToJson);
            if let Ok(value) = serde_json::from_str::<Value>(sliced) {
                return ParseOutcome::Repaired(value, sliced_notes);
            }
        }

        let without_commas = remove_trailing_commas(sliced);
        if without_commas != sliced {
            if let Ok(value) = serde_json::from_str::<Value>(&without_commas) {
                let mut comma_notes = notes.clone();
                if sliced.len() != text.len() {
                    comma_notes.push(RepairNote::SlicedToJson);
                }
                comma_notes.push(RepairNote::RemovedTrailingCommas);
                return ParseOutcome::Repaired(value, comma_notes);
            }
        }
    }

    let tail = &text[start..];
    if let Some(closed) = close_truncated(tail) {
        let closed = remove_trailing_commas(&closed);
        match serde_json::from_str::<Value>(&closed) {
            Ok(value) => {
                if start > 0 {
                    notes.push(RepairNote::SlicedToJson);
                }
                notes.push(RepairNote::ClosedTruncation);
                return ParseOutcome::Repaired(value, notes);
            }
            Err(err) => {
                tracing::debug!(target: "dreams.ai", %err, "closing truncated output did not help");
            }
        }
    }

    ParseOutcome::Failed("model output is not recoverable JSON".into())
}

/// Parse the object starting at the first `{`, appending up to
/// [`MAX_BRACE_PADDING`] closing braces one at a time until it parses.
///
/// Anything after the first complete value is ignored.
pub fn pad_closing_braces(text: &str) -> ParseOutcome<Value> {
    let Some(start) = text.find('{') else {
        return ParseOutcome::Failed("no `{` in model output".into());
    };
    let mut candidate = text[start..].trim_end().to_string();

    for padding in 0..=MAX_BRACE_PADDING {
        if padding > 0 {
            candidate.push('}');
        }
        if let Some(value) = first_value(&candidate) {
            let notes = if padding == 0 {
                Vec::new()
            } else {
                vec![RepairNote::PaddedBraces(padding)]
            };
            return ParseOutcome::from_notes(value, notes);
        }
    }

    ParseOutcome::Failed(format!(
        "object still incomplete after {MAX_BRACE_PADDING} closing braces"
    ))
}

fn first_value(text: &str) -> Option<Value> {
    serde_json::Deserializer::from_str(text)
        .into_iter::<Value>()
        .next()
        .and_then(Result::ok)
}

/// Drop commas that directly precede `}` or `]`, leaving string contents alone.
fn remove_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for (idx, &ch) in chars.iter().enumerate() {
        if in_string {
            out.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => {
                in_string = true;
                out.push(ch);
            }
            ',' => {
                let next = chars[idx + 1..].iter().find(|c| !c.is_whitespace());
                if !matches!(next, Some('}') | Some(']') | None) {
                    out.push(ch);
                }
            }
            _ => out.push(ch),
        }
    }

    out
}

/// Close whatever a truncated document left open. `None` if nothing was open.
fn close_truncated(text: &str) -> Option<String> {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for ch in text.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.last() == Some(&ch) {
                    stack.pop();
                } else {
                    return None;
                }
            }
            _ => {}
        }
    }

    if stack.is_empty() && !in_string {
        return None;
    }

    let mut out = text.to_string();
    if in_string {
        if escaped {
            out.pop();
        }
        out.push('"');
    }

    let trimmed_len = out.trim_end().len();
    out.truncate(trimmed_len);
    if out.ends_with(':') {
        out.push_str(" null");
    }
    while let Some(closer) = stack.pop() {
        out.push(closer);
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strips_json_fence() {
        let (inner, fenced) = strip_code_fence("```json\n{\"a\": 1}\n```");
        assert!(fenced);
        assert_eq!(inner, "{\"a\": 1}");

        let (inner, fenced) = strip_code_fence("  {\"a\": 1} ");
        assert!(!fenced);
        assert_eq!(inner, "{\"a\": 1}");
    }

    #[test]
    fn clean_json_is_strict() {
        assert_eq!(
            parse_tolerant(r#"{"dreams": []}"#),
            ParseOutcome::Strict(json!({"dreams": []}))
        );
    }

    #[test]
    fn fenced_json_is_repaired() {
        let outcome = parse_tolerant("```json\n[1, 2]\n```");
        assert_eq!(
            outcome,
            ParseOutcome::Repaired(json!([1, 2]), vec![RepairNote::StrippedCodeFence])
        );
    }

    #[test]
    fn surrounding_prose_is_sliced_away() {
        let outcome = parse_tolerant("Sure! Here you go: {\"title\": \"Learn piano\"} Enjoy.");
        assert_eq!(
            outcome,
            ParseOutcome::Repaired(json!({"title": "Learn piano"}), vec![RepairNote::SlicedToJson])
        );
    }

    #[test]
    fn trailing_commas_are_removed() {
        let outcome = parse_tolerant(r#"{"dreams": [{"title": "Sail", }, ], }"#);
        assert_eq!(outcome.value(), Some(json!({"dreams": [{"title": "Sail"}]})));
    }

    #[test]
    fn commas_inside_strings_survive() {
        assert_eq!(remove_trailing_commas(r#"{"a": "x, }"}"#), r#"{"a": "x, }"}"#);
    }

    #[test]
    fn truncated_document_is_closed() {
        let outcome =
            parse_tolerant(r#"{"dreams": [{"title": "Run a marathon", "category": "Health & Well"#);
        match outcome {
            ParseOutcome::Repaired(value, notes) => {
                assert_eq!(
                    value,
                    json!({"dreams": [{"title": "Run a marathon", "category": "Health & Well"}]})
                );
                assert!(notes.contains(&RepairNote::ClosedTruncation));
            }
            other => panic!("expected repair, got {other:?}"),
        }
    }

    #[test]
    fn dangling_key_becomes_null() {
        let outcome = parse_tolerant(r#"{"title": "Sail", "year":"#);
        assert_eq!(outcome.value(), Some(json!({"title": "Sail", "year": null})));
    }

    #[test]
    fn plain_prose_fails() {
        assert!(parse_tolerant("I could not find any goals.").is_failed());
        assert!(parse_tolerant("   ").is_failed());
    }

    #[test]
    fn brace_padding_recovers_nested_truncation() {
        let outcome = pad_closing_braces(r#"Here: {"specific": "Run", "extra": {"a": {"b": 1"#);
        assert_eq!(
            outcome,
            ParseOutcome::Repaired(
                json!({"specific": "Run", "extra": {"a": {"b": 1}}}),
                vec![RepairNote::PaddedBraces(3)]
            )
        );
    }

    #[test]
    fn brace_padding_ignores_trailing_prose() {
        assert_eq!(
            pad_closing_braces("{\"a\": 1}\nHope this helps!"),
            ParseOutcome::Strict(json!({"a": 1}))
        );
    }

    #[test]
    fn brace_padding_gives_up_after_ten() {
        let nested = |depth: usize| format!("{}{{\"x\": 1", "{\"k\": ".repeat(depth - 1));

        assert_eq!(
            pad_closing_braces(&nested(10)),
            ParseOutcome::Repaired(
                serde_json::from_str(&format!("{}{}", nested(10), "}".repeat(10))).unwrap(),
                vec![RepairNote::PaddedBraces(10)]
            )
        );
        assert!(pad_closing_braces(&nested(11)).is_failed());
    }

    #[test]
    fn brace_padding_cannot_fix_open_string() {
        assert!(pad_closing_braces(r#"{"specific": "Run 5k"#).is_failed());
    }
}
