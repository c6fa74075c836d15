//! Text-mode tool call extraction.
//!
//! Models without native function calling are told to wrap calls in
//! `<tool_call>` tags, but in practice they emit a zoo of encodings: pipe
//! tokens, `[TOOL_CALLS]`, `<function_call>`, fenced JSON, or bare objects.
//! [`parse_tool_calls`] tries these in a fixed order and returns whatever
//! valid calls it finds. It never fails; malformed candidates are skipped.

use crate::tag_filter::{find_ignore_ascii_case, rfind_ignore_ascii_case};
use openorca_core::ToolCall;
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use tracing::debug;

const CANONICAL_OPEN: &str = "<tool_call>";
const CANONICAL_CLOSE: &str = "</tool_call>";

/// Open tags whose unterminated tail is parsed as a truncated call.
const OPEN_TAGS: &[(&str, &str)] = &[
    ("<tool_call>", "</tool_call>"),
    ("<|tool_call|>", "<|/tool_call|>"),
    ("<|tool_call_start|>", "<|tool_call_end|>"),
    ("<function_call>", "</function_call>"),
];

/// Tagged families in priority order.
static TAGGED_FAMILIES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?is)<tool_call>(.*?)</tool_call>",
        r"(?is)<\|tool_call\|>(.*?)<\|/tool_call\|>",
        r"(?is)<\|tool_call_start\|>(.*?)<\|tool_call_end\|>",
        r"(?is)\[TOOL_CALLS?\](.*?)\[/TOOL_CALLS?\]",
        r"(?is)<function_call>(.*?)</function_call>",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid tool call pattern"))
    .collect()
});

static THINK_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<think>.*?</think>").expect("valid regex"));
static THINKING_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<thinking>.*?</thinking>").expect("valid regex"));
static THINK_UNTERMINATED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<think(?:ing)?>.*$").expect("valid regex"));
static THINK_CLOSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</think(?:ing)?>").expect("valid regex"));
static ROLE_TOKENS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)<\|im_start\|>(?:assistant|user|system)?|<\|im_end\|>|<\|assistant\|>|<\|end\|>|<\|eot_id\|>|<\|start_header_id\|>\w*<\|end_header_id\|>|</?assistant>",
    )
    .expect("valid regex")
});

static FENCED_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[A-Za-z_]*[ \t]*\r?\n?(.*?)```").expect("valid regex"));
static BARE_CALL_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\{\s*"(?:name|tool_call)"\s*:"#).expect("valid regex")
});
static TOOL_LIKE_JSON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)"(?:name|function|tool)"\s*:.*"(?:arguments|parameters)"\s*:"#)
        .expect("valid regex")
});
static ACTION_VERB: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:i'll|i will|let me|i'm going to|i am going to|i need to|now i)\s+(?:now\s+|first\s+)?(?:create|write|read|run|execute|update|modify|edit|list|open|check|save|add|delete|make)\b",
    )
    .expect("valid regex")
});
static FILE_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:^|[\s`'(])[\w./-]*\w\.(?:rs|py|js|ts|tsx|jsx|json|toml|md|txt|html|css|go|java|cs|c|cpp|h|hpp|yaml|yml|sh|sql|xml|cfg|ini|lock)\b",
    )
    .expect("valid regex")
});

/// Strip reasoning blocks and chat-template role tokens, leaving only the
/// text the model meant as its answer.
pub fn action_view(text: &str) -> String {
    let view = THINK_BLOCK.replace_all(text, "");
    let view = THINKING_BLOCK.replace_all(&view, "");
    let view = THINK_UNTERMINATED.replace(&view, "");
    // A lone close tag means the template opened the block for the model.
    let cut = THINK_CLOSE.find_iter(&view).last().map(|m| m.end());
    let view = match cut {
        Some(end) => view[end..].to_string(),
        None => view.into_owned(),
    };
    ROLE_TOKENS.replace_all(&view, "").into_owned()
}

/// Extract tool calls from an assembled text response.
pub fn parse_tool_calls(text: &str) -> Vec<ToolCall> {
    let view = action_view(text);

    // Raw text is only tried when the answer has no tagged region at all.
    for variant in [view.as_str(), text] {
        match tagged_calls(variant) {
            Some(calls) if !calls.is_empty() => return calls,
            Some(_) => break,
            None => {}
        }
    }

    let calls: Vec<ToolCall> = FENCED_BLOCK
        .captures_iter(&view)
        .filter_map(|c| c.get(1))
        .flat_map(|m| parse_candidate(m.as_str()))
        .collect();
    if !calls.is_empty() {
        debug!(count = calls.len(), "Parsed tool calls from fenced block");
        return calls;
    }

    if let Some(tail) = unterminated_tail(&view) {
        let calls = parse_candidate(tail);
        if !calls.is_empty() {
            debug!(count = calls.len(), "Parsed tool calls from unterminated tag");
            return calls;
        }
    }

    let calls = bare_calls(&view);
    if !calls.is_empty() {
        debug!(count = calls.len(), "Parsed bare JSON tool calls");
    }
    calls
}

/// All valid tagged calls in one text variant, in order of appearance.
/// `None` when no tagged region matched at all.
fn tagged_calls(text: &str) -> Option<Vec<ToolCall>> {
    let mut matched = false;
    let mut found: Vec<(usize, Vec<ToolCall>)> = Vec::new();
    for family in TAGGED_FAMILIES.iter() {
        for caps in family.captures_iter(text) {
            matched = true;
            if let (Some(whole), Some(body)) = (caps.get(0), caps.get(1)) {
                let calls = parse_candidate(body.as_str());
                if !calls.is_empty() {
                    found.push((whole.start(), calls));
                }
            }
        }
    }
    if !matched {
        return None;
    }
    found.sort_by_key(|(pos, _)| *pos);
    Some(found.into_iter().flat_map(|(_, calls)| calls).collect())
}

/// Text after the last open tag that has no matching close.
fn unterminated_tail(text: &str) -> Option<&str> {
    OPEN_TAGS
        .iter()
        .filter_map(|(open, close)| {
            let start = rfind_ignore_ascii_case(text, open)?;
            let body = &text[start + open.len()..];
            match find_ignore_ascii_case(body, close) {
                Some(_) => None,
                None => Some((start, body)),
            }
        })
        .max_by_key(|(start, _)| *start)
        .map(|(_, body)| body)
}

fn bare_calls(text: &str) -> Vec<ToolCall> {
    let mut calls = Vec::new();
    let mut cursor = 0;
    while let Some(m) = BARE_CALL_START.find_at(text, cursor) {
        match json_object_end(&text[m.start()..]) {
            Some(len) => {
                calls.extend(parse_candidate(&text[m.start()..m.start() + len]));
                cursor = m.start() + len;
            }
            None => cursor = m.end(),
        }
    }
    calls
}

/// Parse one candidate region, which may hold several concatenated objects.
fn parse_candidate(candidate: &str) -> Vec<ToolCall> {
    let body = strip_fence(candidate.trim());
    split_json_objects(body)
        .iter()
        .filter_map(|raw| serde_json::from_str::<Value>(raw).ok())
        .filter_map(|value| call_from_value(&value))
        .collect()
}

fn strip_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = match rest.find('\n') {
        Some(nl) => &rest[nl + 1..],
        None => rest,
    };
    rest.trim_end().trim_end_matches("```").trim()
}

fn call_from_value(value: &Value) -> Option<ToolCall> {
    if let Some(inner) = value.get("tool_call").filter(|v| v.is_object()) {
        return call_from_value(inner);
    }
    let (name, args) = match value.get("function").filter(|v| v.is_object()) {
        Some(function) => (function.get("name")?, function.get("arguments")),
        None => (
            value.get("name")?,
            value.get("arguments").or_else(|| value.get("parameters")),
        ),
    };
    let name = name.as_str()?.trim();
    if name.is_empty() {
        return None;
    }
    let arguments = match args {
        None | Some(Value::Null) => Value::Object(Default::default()),
        Some(obj @ Value::Object(_)) => obj.clone(),
        Some(Value::String(s)) if s.trim().is_empty() => Value::Object(Default::default()),
        Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
            Ok(obj @ Value::Object(_)) => obj,
            _ => return None,
        },
        Some(_) => return None,
    };
    Some(ToolCall::new(generate_call_id(), name, arguments.to_string()))
}

/// `call_` followed by 12 hex characters.
pub fn generate_call_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("call_{}", &hex[..12])
}

/// Split concatenated JSON objects by brace depth. Braces inside string
/// literals are ignored; text between objects is dropped.
pub fn split_json_objects(text: &str) -> Vec<String> {
    let mut objects = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(idx);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0
                    && let Some(s) = start.take()
                {
                    objects.push(text[s..=idx].to_string());
                }
            }
            _ => {}
        }
    }
    objects
}

/// Byte length of the balanced object starting at `text[0] == '{'`.
fn json_object_end(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (idx, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(idx + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// The canonical open tag appears after the last canonical close tag,
/// which usually means the output budget cut the call off.
pub fn has_unterminated_tool_call(text: &str) -> bool {
    let view = action_view(text);
    match rfind_ignore_ascii_case(&view, CANONICAL_OPEN) {
        Some(open) => rfind_ignore_ascii_case(&view, CANONICAL_CLOSE).is_none_or(|close| open > close),
        None => false,
    }
}

/// Heuristic for "the model meant to act but did not use call syntax".
pub fn should_nudge(text: &str) -> bool {
    let view = action_view(text);
    let blocks: Vec<&str> = FENCED_BLOCK
        .captures_iter(&view)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();
    if blocks.is_empty() {
        return false;
    }
    if blocks.iter().any(|b| TOOL_LIKE_JSON.is_match(b)) {
        return true;
    }
    ACTION_VERB.is_match(&view) && FILE_PATH.is_match(&view)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(calls: &[ToolCall]) -> Vec<&str> {
        calls.iter().map(|c| c.name.as_str()).collect()
    }

    fn args(call: &ToolCall) -> Value {
        serde_json::from_str(&call.arguments).unwrap()
    }

    #[test]
    fn canonical_tag() {
        let text = r#"Let me start by reading the README.

<tool_call>{"name":"read_file","arguments":{"path":"README.md"}}</tool_call>"#;
        let calls = parse_tool_calls(text);
        assert_eq!(names(&calls), ["read_file"]);
        assert_eq!(args(&calls[0]), serde_json::json!({"path": "README.md"}));
        assert!(calls[0].id.starts_with("call_"));
        assert_eq!(calls[0].id.len(), 17);
    }

    #[test]
    fn all_spellings_parse_identically() {
        let body = r#"{"name":"list_directory","arguments":{"path":"src"}}"#;
        let texts = [
            format!("<tool_call>{body}</tool_call>"),
            format!("<TOOL_CALL>\n{body}\n</TOOL_CALL>"),
            format!("<|tool_call|>{body}<|/tool_call|>"),
            format!("<|tool_call_start|>{body}<|tool_call_end|>"),
            format!("[TOOL_CALLS]{body}[/TOOL_CALLS]"),
            format!("[TOOL_CALL]{body}[/TOOL_CALL]"),
            format!("<function_call>{body}</function_call>"),
            format!("```json\n{body}\n```"),
            format!("Sure. {body}"),
            format!("<tool_call>{body}"),
        ];
        for text in &texts {
            let calls = parse_tool_calls(text);
            assert_eq!(names(&calls), ["list_directory"], "{text}");
            assert_eq!(args(&calls[0]), serde_json::json!({"path": "src"}), "{text}");
        }
    }

    #[test]
    fn multiple_calls_in_order() {
        let text = r#"<function_call>{"name":"b","arguments":{}}</function_call>
<tool_call>{"name":"a","arguments":{}}{"name":"c","arguments":{}}</tool_call>"#;
        assert_eq!(names(&parse_tool_calls(text)), ["b", "a", "c"]);
    }

    #[test]
    fn ids_are_unique() {
        let text = r#"<tool_call>{"name":"a"}</tool_call><tool_call>{"name":"a"}</tool_call>"#;
        let calls = parse_tool_calls(text);
        assert_eq!(calls.len(), 2);
        assert_ne!(calls[0].id, calls[1].id);
    }

    #[test]
    fn alternate_shapes() {
        let text = r#"<tool_call>{"function":{"name":"run_command","arguments":"{\"command\":\"ls\"}"}}</tool_call>
<tool_call>{"name":"read_file","parameters":{"path":"a.rs"}}</tool_call>
<tool_call>{"tool_call":{"name":"list_directory"}}</tool_call>
<tool_call>[{"name":"x","arguments":{}},{"name":"y","arguments":{}}]</tool_call>"#;
        let calls = parse_tool_calls(text);
        assert_eq!(
            names(&calls),
            ["run_command", "read_file", "list_directory", "x", "y"]
        );
        assert_eq!(args(&calls[0]), serde_json::json!({"command": "ls"}));
        assert_eq!(args(&calls[1]), serde_json::json!({"path": "a.rs"}));
        assert_eq!(args(&calls[2]), serde_json::json!({}));
    }

    #[test]
    fn invalid_candidates_are_skipped() {
        let text = r#"<tool_call>{"name":"ok","arguments":{}}</tool_call>
<tool_call>{"arguments":{"path":"x"}}</tool_call>
<tool_call>{not json}</tool_call>
<tool_call>{"name":"","arguments":{}}</tool_call>
<tool_call>{"name":"bad_args","arguments":"not json"}</tool_call>"#;
        assert_eq!(names(&parse_tool_calls(text)), ["ok"]);
    }

    #[test]
    fn plain_text_yields_nothing() {
        assert!(parse_tool_calls("All done. The README describes the project.").is_empty());
        assert!(parse_tool_calls("").is_empty());
        assert!(parse_tool_calls("```rust\nfn main() {}\n```").is_empty());
    }

    #[test]
    fn action_view_wins_over_thinking() {
        let text = r#"<think>maybe <tool_call>{"name":"wrong","arguments":{}}</tool_call></think>
<tool_call>{"name":"right","arguments":{}}</tool_call>"#;
        assert_eq!(names(&parse_tool_calls(text)), ["right"]);
    }

    #[test]
    fn raw_text_used_when_action_view_is_empty() {
        let text = r#"<think>I'll call it <tool_call>{"name":"inside","arguments":{}}</tool_call></think>Done."#;
        assert_eq!(names(&parse_tool_calls(text)), ["inside"]);
    }

    #[test]
    fn malformed_visible_call_does_not_unlock_reasoning_calls() {
        let text = r#"<think>I could <tool_call>{"name":"run_command","arguments":{"command":"rm -rf build"}}</tool_call> but no.</think>Reading instead <tool_call>{"name":"read_file", "arguments": {"path": </tool_call>"#;
        assert!(parse_tool_calls(text).is_empty());
    }

    #[test]
    fn bare_json_skips_unbalanced_candidate() {
        let text = r#"Oops {"name": "broken", "arguments": {"path": "a" and then {"name":"read_file","arguments":{"path":"b.rs"}}"#;
        let calls = parse_tool_calls(text);
        assert_eq!(names(&calls), ["read_file"]);
        assert_eq!(args(&calls[0]), serde_json::json!({"path": "b.rs"}));
    }

    #[test]
    fn action_view_strips_reasoning_and_role_tokens() {
        assert_eq!(action_view("<think>a</think>b<|im_end|>"), "b");
        assert_eq!(action_view("<|im_start|>assistant\nhello"), "\nhello");
        assert_eq!(action_view("plan plan</think>answer"), "answer");
        assert_eq!(action_view("answer<thinking>cut off"), "answer");
        assert_eq!(action_view("<THINKING>x</THINKING>y"), "y");
    }

    #[test]
    fn split_json_objects_cases() {
        assert_eq!(
            split_json_objects(r#"{"a":1}{"b":2}"#),
            vec![r#"{"a":1}"#.to_string(), r#"{"b":2}"#.to_string()]
        );
        let single = r#"{"name":"x","arguments":{"nested":{"deep":true}}}"#;
        assert_eq!(split_json_objects(single), vec![single.to_string()]);
        let braces = r#"{"content":"fn main() { println!(\"}\"); }"}"#;
        assert_eq!(split_json_objects(braces), vec![braces.to_string()]);
        assert_eq!(split_json_objects(r#"{"a":1}, {"b":2}"#).len(), 2);
        assert!(split_json_objects("no objects").is_empty());
    }

    #[test]
    fn braces_in_arguments_survive() {
        let text = r#"<tool_call>{"name":"write_file","arguments":{"path":"main.rs","content":"fn main() {\n    println!(\"{}\", 1);\n}\n"}}</tool_call>"#;
        let calls = parse_tool_calls(text);
        assert_eq!(names(&calls), ["write_file"]);
        assert_eq!(
            args(&calls[0])["content"],
            "fn main() {\n    println!(\"{}\", 1);\n}\n"
        );
    }

    #[test]
    fn truncated_call_is_not_executed() {
        let text = r#"<tool_call>{"name":"write_file","arguments":{"path":"a.txt","content":"very long"#;
        assert!(parse_tool_calls(text).is_empty());
        assert!(has_unterminated_tool_call(text));
    }

    #[test]
    fn unterminated_detection() {
        assert!(!has_unterminated_tool_call("no tags"));
        assert!(!has_unterminated_tool_call(
            r#"<tool_call>{"name":"a"}</tool_call>"#
        ));
        assert!(has_unterminated_tool_call(
            r#"<tool_call>{"name":"a"}</tool_call> and <tool_call>{"name":"#
        ));
        assert!(!has_unterminated_tool_call("<think><tool_call>{</think>done"));
    }

    #[test]
    fn bare_wrapper_object() {
        let text = r#"Calling now: {"tool_call": {"name": "read_file", "arguments": {"path": "Cargo.toml"}}} ok"#;
        let calls = parse_tool_calls(text);
        assert_eq!(names(&calls), ["read_file"]);
        assert_eq!(args(&calls[0]), serde_json::json!({"path": "Cargo.toml"}));
    }

    #[test]
    fn nudge_on_fenced_tool_json() {
        let text = "I will read it:\n```json\n{\"tool\": \"read_file\", \"parameters\": {\"file\": \"a\"}}\n```";
        assert!(parse_tool_calls(text).is_empty());
        assert!(should_nudge(text));
    }

    #[test]
    fn nudge_on_action_wording_with_path() {
        let text = "Let me create src/main.rs with this:\n```rust\nfn main() {}\n```";
        assert!(should_nudge(text));
    }

    #[test]
    fn no_nudge_for_plain_answers() {
        assert!(!should_nudge("The project is a Rust CLI."));
        assert!(!should_nudge("Here is an example:\n```rust\nfn main() {}\n```"));
        assert!(!should_nudge("Let me create src/main.rs for you next time."));
    }
}
