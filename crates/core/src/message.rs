//! Message and Conversation domain types.
//!
//! A message is a role plus an ordered list of content parts: plain text,
//! tool-call requests, and tool-call results. The conversation is an
//! append-only log; the only structural rewrite it allows is replacing a
//! contiguous prefix with a summary (compaction).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use uuid::Uuid;

/// Unique identifier for a conversation (session).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user (also used for loop-injected instructions)
    User,
    /// The model
    Assistant,
    /// System instructions
    System,
    /// Tool execution result
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::System => write!(f, "system"),
            Self::Tool => write!(f, "tool"),
        }
    }
}

/// One piece of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    /// A tool call requested by the assistant. `arguments` is a JSON string.
    ToolCall {
        id: String,
        name: String,
        arguments: String,
    },
    /// The result of a previously requested tool call.
    ToolResult {
        call_id: String,
        content: String,
        is_error: bool,
    },
}

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// Who sent this message
    pub role: Role,

    /// Ordered content parts
    pub parts: Vec<ContentPart>,

    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn with_parts(role: Role, parts: Vec<ContentPart>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            parts,
            timestamp: Utc::now(),
        }
    }

    fn text_parts(content: String) -> Vec<ContentPart> {
        if content.is_empty() {
            Vec::new()
        } else {
            vec![ContentPart::Text { text: content }]
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_parts(Role::User, Self::text_parts(content.into()))
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_parts(Role::Assistant, Self::text_parts(content.into()))
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_parts(Role::System, Self::text_parts(content.into()))
    }

    /// Create an assistant message carrying text plus tool-call requests.
    pub fn assistant_with_calls(
        content: impl Into<String>,
        calls: impl IntoIterator<Item = (String, String, String)>,
    ) -> Self {
        let mut parts = Self::text_parts(content.into());
        parts.extend(
            calls
                .into_iter()
                .map(|(id, name, arguments)| ContentPart::ToolCall {
                    id,
                    name,
                    arguments,
                }),
        );
        Self::with_parts(Role::Assistant, parts)
    }

    /// Create a tool result message answering exactly one request id.
    pub fn tool_result(
        call_id: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self::with_parts(
            Role::Tool,
            vec![ContentPart::ToolResult {
                call_id: call_id.into(),
                content: content.into(),
                is_error,
            }],
        )
    }

    /// Concatenated text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// Whether this message carries any text part.
    pub fn has_text(&self) -> bool {
        self.parts
            .iter()
            .any(|p| matches!(p, ContentPart::Text { text } if !text.is_empty()))
    }

    /// Tool-call requests as `(id, name, arguments)`.
    pub fn tool_calls(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        self.parts.iter().filter_map(|p| match p {
            ContentPart::ToolCall {
                id,
                name,
                arguments,
            } => Some((id.as_str(), name.as_str(), arguments.as_str())),
            _ => None,
        })
    }

    /// The tool result carried by this message, if any.
    pub fn tool_result_part(&self) -> Option<(&str, &str, bool)> {
        self.parts.iter().find_map(|p| match p {
            ContentPart::ToolResult {
                call_id,
                content,
                is_error,
            } => Some((call_id.as_str(), content.as_str(), *is_error)),
            _ => None,
        })
    }

    /// Total characters across all parts, used for token estimation.
    pub fn char_len(&self) -> usize {
        self.parts
            .iter()
            .map(|p| match p {
                ContentPart::Text { text } => text.len(),
                ContentPart::ToolCall {
                    name, arguments, ..
                } => name.len() + arguments.len(),
                ContentPart::ToolResult { content, .. } => content.len(),
            })
            .sum()
    }

    /// A user message with text starts a new turn.
    pub fn is_turn_start(&self) -> bool {
        self.role == Role::User && self.has_text()
    }
}

/// Estimate the token count for a number of characters.
///
/// Heuristic: 1 token ≈ 4 characters. Rounds up.
pub fn estimate_tokens(chars: usize) -> usize {
    chars.div_ceil(4)
}

/// Per-message overhead for role markers and delimiters on the wire.
const MESSAGE_OVERHEAD_TOKENS: usize = 4;

/// A conversation is an ordered, append-only sequence of messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Unique conversation ID
    pub id: ConversationId,

    /// Ordered messages
    messages: Vec<Message>,

    /// When this conversation was created
    pub created_at: DateTime<Utc>,

    /// When the last message was added
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Create a new empty conversation.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: ConversationId::new(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Create a conversation that starts with a system prompt.
    pub fn with_system_prompt(prompt: impl Into<String>) -> Self {
        let mut conv = Self::new();
        conv.push(Message::system(prompt));
        conv
    }

    /// Append a message.
    pub fn push(&mut self, message: Message) {
        self.updated_at = Utc::now();
        self.messages.push(message);
    }

    /// Read-only view of every message.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Estimated prompt size of the whole conversation.
    pub fn estimated_tokens(&self) -> usize {
        self.messages
            .iter()
            .map(|m| MESSAGE_OVERHEAD_TOKENS + estimate_tokens(m.char_len()))
            .sum()
    }

    /// The prefix range that may be summarized while keeping the leading
    /// system prompt and the most recent `keep_recent_turns` turns verbatim.
    ///
    /// The range always ends at a turn start, so a tool request is never
    /// separated from its result. Returns `None` when there is nothing
    /// worth compacting.
    pub fn compactable_range(&self, keep_recent_turns: usize) -> Option<Range<usize>> {
        let start = match self.messages.first() {
            Some(m) if m.role == Role::System => 1,
            _ => 0,
        };

        let turn_starts: Vec<usize> = self
            .messages
            .iter()
            .enumerate()
            .skip(start)
            .filter(|(_, m)| m.is_turn_start())
            .map(|(i, _)| i)
            .collect();

        let keep = keep_recent_turns.max(1);
        if turn_starts.len() <= keep {
            return None;
        }

        let end = turn_starts[turn_starts.len() - keep];
        if end.saturating_sub(start) < 2 {
            return None;
        }
        Some(start..end)
    }

    /// Replace `range` with a single summary message. Returns the number of
    /// messages removed.
    pub fn compact_with_summary(&mut self, range: Range<usize>, summary: &str) -> usize {
        if range.is_empty() || range.end > self.messages.len() {
            return 0;
        }
        let removed = range.len();
        let summary_msg = Message::user(format!(
            "[Summary of earlier conversation]\n{}",
            summary.trim()
        ));
        self.messages.splice(range, std::iter::once(summary_msg));
        self.updated_at = Utc::now();
        removed
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool_exchange(conv: &mut Conversation, id: &str) {
        conv.push(Message::assistant_with_calls(
            "",
            vec![(id.to_string(), "read_file".to_string(), "{}".to_string())],
        ));
        conv.push(Message::tool_result(id, "contents", false));
    }

    #[test]
    fn create_user_message() {
        let msg = Message::user("Hello, agent!");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.text(), "Hello, agent!");
        assert_eq!(msg.tool_calls().count(), 0);
        assert!(msg.is_turn_start());
    }

    #[test]
    fn assistant_with_calls_keeps_order() {
        let msg = Message::assistant_with_calls(
            "Reading both.",
            vec![
                ("call_a".into(), "read_file".into(), r#"{"path":"a"}"#.into()),
                ("call_b".into(), "read_file".into(), r#"{"path":"b"}"#.into()),
            ],
        );
        let ids: Vec<&str> = msg.tool_calls().map(|(id, _, _)| id).collect();
        assert_eq!(ids, vec!["call_a", "call_b"]);
        assert_eq!(msg.text(), "Reading both.");
    }

    #[test]
    fn tool_result_references_call() {
        let msg = Message::tool_result("call_1", "boom", true);
        assert_eq!(msg.tool_result_part(), Some(("call_1", "boom", true)));
        assert!(!msg.is_turn_start());
    }

    #[test]
    fn message_serialization_roundtrip() {
        let msg = Message::tool_result("call_9", "ok", false);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"tool_result""#));
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back.parts, msg.parts);
    }

    #[test]
    fn conversation_token_estimate() {
        let mut conv = Conversation::new();
        // 20 chars → 5 tokens + 4 overhead
        conv.push(Message::user("12345678901234567890"));
        assert_eq!(conv.estimated_tokens(), 9);
    }

    #[test]
    fn compactable_range_keeps_system_and_recent_turns() {
        let mut conv = Conversation::with_system_prompt("sys");
        conv.push(Message::user("turn 1"));
        tool_exchange(&mut conv, "c1");
        conv.push(Message::assistant("done 1"));
        conv.push(Message::user("turn 2"));
        conv.push(Message::assistant("done 2"));
        conv.push(Message::user("turn 3"));

        let range = conv.compactable_range(2).unwrap();
        assert_eq!(range, 1..5);
        assert!(conv.messages()[range.end].is_turn_start());
    }

    #[test]
    fn compactable_range_none_when_few_turns() {
        let mut conv = Conversation::with_system_prompt("sys");
        conv.push(Message::user("only turn"));
        conv.push(Message::assistant("answer"));
        assert!(conv.compactable_range(1).is_none());
    }

    #[test]
    fn compact_replaces_prefix_with_summary() {
        let mut conv = Conversation::with_system_prompt("sys");
        conv.push(Message::user("turn 1"));
        tool_exchange(&mut conv, "c1");
        conv.push(Message::user("turn 2"));

        let range = conv.compactable_range(1).unwrap();
        let removed = conv.compact_with_summary(range, "user asked for a file");
        assert_eq!(removed, 3);
        assert_eq!(conv.len(), 3);
        assert_eq!(conv.messages()[0].role, Role::System);
        assert!(conv.messages()[1].text().contains("user asked for a file"));
        assert_eq!(conv.messages()[2].text(), "turn 2");
    }
}
