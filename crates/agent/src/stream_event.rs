//! Agent-level streaming events.
//!
//! `AgentStreamEvent` is what the loop reports while a turn runs: visible
//! text, captured reasoning, tool activity, recovery notices and the final
//! summary. The CLI renders them; other front-ends can serialize them as-is.

use openorca_core::Usage;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Events emitted by the agent during a turn.
///
/// - `chunk`: visible text from the model
/// - `thinking`: captured reasoning text
/// - `tool_call`: the agent is invoking a tool
/// - `tool_result`: tool execution completed
/// - `notice`: a recovery action (retry, downgrade, compaction)
/// - `done`: the turn is complete
/// - `error`: an error ended the turn
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentStreamEvent {
    /// Visible text token from the LLM.
    Chunk { content: String },

    /// Reasoning text captured from a `<think>` region.
    Thinking { content: String },

    /// The agent is calling a tool.
    ToolCall {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    /// Tool execution completed.
    ToolResult {
        id: String,
        name: String,
        output: String,
        success: bool,
    },

    Notice { message: String },

    /// The turn is complete.
    Done {
        conversation_id: String,
        usage: Option<Usage>,
        iterations: usize,
        tool_calls_made: usize,
        stop_reason: String,
    },

    /// An error occurred mid-turn.
    Error { message: String },
}

impl AgentStreamEvent {
    /// Stable event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Chunk { .. } => "chunk",
            Self::Thinking { .. } => "thinking",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::Notice { .. } => "notice",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }
}

/// Optional event channel. Sending never blocks the loop on a dropped
/// receiver; events are simply discarded.
#[derive(Debug, Clone, Default)]
pub struct EventSink(Option<mpsc::Sender<AgentStreamEvent>>);

impl EventSink {
    pub fn new(sender: mpsc::Sender<AgentStreamEvent>) -> Self {
        Self(Some(sender))
    }

    pub fn disabled() -> Self {
        Self(None)
    }

    pub async fn emit(&self, event: AgentStreamEvent) {
        if let Some(tx) = &self.0
            && tx.send(event).await.is_err()
        {
            tracing::trace!("Event receiver dropped");
        }
    }

    pub async fn chunk(&self, content: impl Into<String>) {
        let content = content.into();
        if !content.is_empty() {
            self.emit(AgentStreamEvent::Chunk { content }).await;
        }
    }

    pub async fn notice(&self, message: impl Into<String>) {
        self.emit(AgentStreamEvent::Notice {
            message: message.into(),
        })
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serialization_chunk() {
        let event = AgentStreamEvent::Chunk {
            content: "Hello".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"chunk""#));
        assert!(json.contains(r#""content":"Hello""#));
    }

    #[test]
    fn event_serialization_tool_call() {
        let event = AgentStreamEvent::ToolCall {
            id: "call_1".into(),
            name: "read_file".into(),
            input: serde_json::json!({"path": "README.md"}),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"tool_call""#));
        assert!(json.contains(r#""name":"read_file""#));
    }

    #[test]
    fn event_serialization_done() {
        let event = AgentStreamEvent::Done {
            conversation_id: "abc".into(),
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 20,
                total_tokens: 30,
            }),
            iterations: 2,
            tool_calls_made: 1,
            stop_reason: "completed".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"done""#));
        assert!(json.contains(r#""iterations":2"#));
        assert!(json.contains(r#""stop_reason":"completed""#));
    }

    #[test]
    fn event_type_names() {
        let cases = [
            (AgentStreamEvent::Chunk { content: "x".into() }, "chunk"),
            (AgentStreamEvent::Thinking { content: "x".into() }, "thinking"),
            (AgentStreamEvent::Notice { message: "x".into() }, "notice"),
            (AgentStreamEvent::Error { message: "x".into() }, "error"),
            (
                AgentStreamEvent::ToolResult {
                    id: "a".into(),
                    name: "b".into(),
                    output: "c".into(),
                    success: true,
                },
                "tool_result",
            ),
        ];
        for (event, name) in cases {
            assert_eq!(event.event_type(), name);
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["type"], name);
        }
    }

    #[test]
    fn event_deserialization() {
        let json = r#"{"type":"thinking","content":"hmm"}"#;
        let event: AgentStreamEvent = serde_json::from_str(json).unwrap();
        match event {
            AgentStreamEvent::Thinking { content } => assert_eq!(content, "hmm"),
            _ => panic!("Wrong variant"),
        }
    }

    #[tokio::test]
    async fn sink_forwards_and_skips_empty_chunks() {
        let (tx, mut rx) = mpsc::channel(8);
        let sink = EventSink::new(tx);
        sink.chunk("").await;
        sink.chunk("hi").await;
        sink.notice("retrying").await;
        drop(sink);

        assert_eq!(rx.recv().await.unwrap().event_type(), "chunk");
        assert_eq!(rx.recv().await.unwrap().event_type(), "notice");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn disabled_sink_and_dropped_receiver_are_silent() {
        EventSink::disabled().notice("nobody listens").await;
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        EventSink::new(tx).chunk("lost").await;
    }
}
