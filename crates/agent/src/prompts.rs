//! Prompt text injected by the loop.

use openorca_core::ToolDefinition;
use std::fmt::Write;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are OpenOrca, an autonomous coding agent working \
inside the user's project directory. Use the available tools to inspect and change the project \
instead of guessing. Keep going until the task is done, then reply with a short summary of what \
you did.";

/// Sent after a response was cut off inside a `<tool_call>` block.
pub const CONTINUE_SMALLER: &str = "Your previous response was cut off in the middle of a \
<tool_call> block, so the call was not executed. Continue with smaller tool calls: split large \
file contents across several write_file calls and keep each call's arguments short.";

/// Sent when a response looks like it meant to act but used no call syntax.
pub const NUDGE: &str = "You described an action but did not call a tool, so nothing happened. \
To act, respond with a <tool_call> block containing a JSON object with \"name\" and \
\"arguments\". If you are finished, reply with your final answer instead.";

/// Sent when the same call keeps failing with the same error.
pub const REDIRECT: &str = "The same tool call has failed repeatedly with the same error. Stop \
retrying it. Re-read the error, check your assumptions (paths, names, arguments) with a \
different tool, or explain to the user what is blocking you.";

pub const SUMMARIZER_SYSTEM: &str = "You are a conversation compaction engine. Summarize older \
chat history into concise context for future turns. Preserve: the user's goals, decisions, files \
touched, commands run and their outcomes, unresolved tasks. Omit: filler and verbose tool output. \
Output plain text bullet points only.";

pub fn summarizer_request(transcript: &str) -> String {
    format!(
        "Summarize the following conversation history for context preservation. \
         Keep it short (max 12 bullet points).\n\n{transcript}"
    )
}

/// Tool protocol appended to the system prompt in text mode.
pub fn tool_instructions(tools: &[ToolDefinition]) -> String {
    let mut out = String::new();
    out.push_str("## Tool Use Protocol\n\n");
    out.push_str("To use a tool, wrap a JSON object in <tool_call></tool_call> tags:\n\n");
    out.push_str(
        "<tool_call>\n{\"name\": \"tool_name\", \"arguments\": {\"param\": \"value\"}}\n</tool_call>\n\n",
    );
    out.push_str(
        "Output real <tool_call> tags; never describe a call or show it in a code block. \
         You may make several calls in one response. Tool results come back in the next \
         message. Continue with the results until you can give a final answer.\n\n",
    );
    out.push_str("### Available Tools\n\n");
    for tool in tools {
        let _ = writeln!(
            out,
            "**{}**: {}\nParameters: `{}`\n",
            tool.name, tool.description, tool.parameters
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_instructions_list_every_tool() {
        let tools = vec![
            ToolDefinition {
                name: "read_file".into(),
                description: "Read a file".into(),
                parameters: serde_json::json!({"type": "object", "required": ["path"]}),
            },
            ToolDefinition {
                name: "run_command".into(),
                description: "Run a shell command".into(),
                parameters: serde_json::json!({"type": "object"}),
            },
        ];
        let text = tool_instructions(&tools);
        assert!(text.contains("## Tool Use Protocol"));
        assert!(text.contains("<tool_call>"));
        assert!(text.contains("**read_file**: Read a file"));
        assert!(text.contains("\"required\":[\"path\"]"));
        assert!(text.contains("**run_command**"));
    }

    #[test]
    fn summarizer_request_embeds_transcript() {
        assert!(summarizer_request("USER: hi").ends_with("USER: hi"));
    }
}
