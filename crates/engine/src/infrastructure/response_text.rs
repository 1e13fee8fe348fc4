//! LLM response cleaning and JSON extraction.
//!
//! Model output arrives with reasoning spans, code fences, and prose
//! around the payload. Callers strip all of that before handing the
//! remainder to `serde_json`; there is no structural repair here, only
//! slicing.

use regex_lite::Regex;
use serde_json::Value;

/// Remove `<think>...</think>` spans (greedy across lines) and fenced
/// code markers, then trim.
pub fn clean_model_output(raw: &str) -> String {
    let mut text = raw.to_string();
    if let Ok(think) = Regex::new(r"(?s)<think>.*?</think>") {
        text = think.replace_all(&text, "").into_owned();
    }
    if let Ok(fence) = Regex::new(r"(?i)```(?:json)?") {
        text = fence.replace_all(&text, "").into_owned();
    }
    text.trim().to_string()
}

/// Slice out the JSON payload: first `{` or `[` through the matching
/// last `}` or `]`, then parse. No balancing; the model either produced
/// a parseable core or it did not.
pub fn extract_json(text: &str) -> Option<Value> {
    let obj_start = text.find('{');
    let arr_start = text.find('[');
    let (start, open) = match (obj_start, arr_start) {
        (Some(o), Some(a)) if a < o => (a, '['),
        (Some(o), _) => (o, '{'),
        (None, Some(a)) => (a, '['),
        (None, None) => return None,
    };
    let close = if open == '{' { '}' } else { ']' };
    let end = text.rfind(close)?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

/// Clean then extract in one step.
pub fn clean_and_extract_json(raw: &str) -> Option<Value> {
    extract_json(&clean_model_output(raw))
}

/// A tool invocation emitted by the world-builder companion model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub thought: String,
    pub tool_name: String,
    pub arguments: Value,
}

/// Parse the tool-call protocol: a single JSON object `{thought,
/// tool_name, arguments}` with anything outside the braces ignored. The
/// parser takes the largest balanced-brace substring; if nothing
/// parses, the output is treated as free text (`None`).
pub fn parse_tool_call(raw: &str) -> Option<ToolCall> {
    let text = clean_model_output(raw);
    let candidate = largest_balanced_braces(&text)?;
    let value: Value = serde_json::from_str(candidate).ok()?;
    let obj = value.as_object()?;
    let tool_name = obj.get("tool_name")?.as_str()?.to_string();
    Some(ToolCall {
        thought: obj
            .get("thought")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        tool_name,
        arguments: obj.get("arguments").cloned().unwrap_or(Value::Null),
    })
}

/// Largest balanced `{...}` span in the text, ignoring braces inside
/// string literals.
fn largest_balanced_braces(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let mut best: Option<(usize, usize)> = None;
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate() {
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
            b'"' if depth > 0 => in_string = true,
            b'{' => {
                if depth == 0 {
                    start = i;
                }
                depth += 1;
            }
            b'}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        let span = (start, i);
                        if best.map_or(true, |(s, e)| i - start > e - s) {
                            best = Some(span);
                        }
                    }
                }
            }
            _ => {}
        }
    }
    best.map(|(s, e)| &text[s..=e])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strips_think_spans_across_lines() {
        let raw = "<think>step one\nstep two</think>{\"a\": 1}";
        assert_eq!(clean_model_output(raw), "{\"a\": 1}");
    }

    #[test]
    fn strips_code_fences() {
        let raw = "```json\n{\"a\": 1}\n```";
        assert_eq!(clean_model_output(raw), "{\"a\": 1}");
    }

    #[test]
    fn extract_json_object_with_prose() {
        let raw = "Sure, here you go: {\"intent\": \"CHAT\", \"keyword\": \"hi\"} hope that helps";
        let value = extract_json(raw).expect("json");
        assert_eq!(value["intent"], "CHAT");
    }

    #[test]
    fn extract_json_prefers_earlier_bracket() {
        let raw = "[1, 2, {\"a\": 3}]";
        let value = extract_json(raw).expect("json");
        assert!(value.is_array());
    }

    #[test]
    fn extract_json_fails_on_no_payload() {
        assert!(extract_json("no structure here").is_none());
        assert!(extract_json("{ broken").is_none());
    }

    #[test]
    fn clean_and_extract_combined() {
        let raw = "<think>hmm</think>```json\n{\"name\": \"Cellar\"}\n```";
        let value = clean_and_extract_json(raw).expect("json");
        assert_eq!(value["name"], "Cellar");
    }

    #[test]
    fn tool_call_ignores_surrounding_text() {
        let raw = "I will check the map.\n{\"thought\": \"need map\", \"tool_name\": \"get_map\", \"arguments\": {\"region\": \"forest\"}}\nDone.";
        let call = parse_tool_call(raw).expect("tool call");
        assert_eq!(call.tool_name, "get_map");
        assert_eq!(call.arguments, json!({"region": "forest"}));
        assert_eq!(call.thought, "need map");
    }

    #[test]
    fn tool_call_handles_braces_in_strings() {
        let raw = "{\"thought\": \"tricky {braces} here\", \"tool_name\": \"t\", \"arguments\": {}}";
        let call = parse_tool_call(raw).expect("tool call");
        assert_eq!(call.thought, "tricky {braces} here");
    }

    #[test]
    fn tool_call_without_tool_name_is_free_text() {
        assert!(parse_tool_call("{\"thought\": \"just musing\"}").is_none());
        assert!(parse_tool_call("plain narration, no json").is_none());
    }
}
