//! Provider trait: the abstraction over LLM backends.
//!
//! A Provider knows how to send a conversation to an LLM and get a response
//! back, either as a complete message or as a stream of fragments.
//!
//! Implementations: OpenAI-compatible endpoints (LM Studio, Ollama, vLLM).

use crate::error::ProviderError;
use crate::message::Message;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Configuration for a provider request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use
    pub model: String,

    /// The conversation messages
    pub messages: Vec<Message>,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Available tools the model can call natively. Empty in text mode.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    /// Whether to stream the response
    #[serde(default)]
    pub stream: bool,
}

fn default_temperature() -> f32 {
    0.7
}

/// A tool definition sent to the LLM so it knows what tools it can call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    /// Whether the schema lists at least one required parameter.
    pub fn has_required_parameters(&self) -> bool {
        self.parameters["required"]
            .as_array()
            .is_some_and(|r| !r.is_empty())
    }
}

/// A complete (non-streaming) response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// The generated message (text and/or tool-call parts)
    pub message: Message,

    /// Token usage statistics
    pub usage: Option<Usage>,

    /// Which model actually responded (may differ from requested)
    pub model: String,
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A structured tool-call fragment carried by a stream chunk.
///
/// Fragments with the same `id` (or an empty `id`, meaning "continue the
/// previous call") are merged by the consumer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCallDelta {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// A single chunk in a streaming response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Partial content delta
    #[serde(default)]
    pub content: Option<String>,

    /// Structured tool-call fragments
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallDelta>,

    /// Whether this is the final chunk
    #[serde(default)]
    pub done: bool,

    /// Usage info (typically only in the final chunk)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl StreamChunk {
    /// A chunk with a text delta.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    /// Whether this chunk carries any content item (text or tool call).
    pub fn has_content(&self) -> bool {
        self.content.as_ref().is_some_and(|c| !c.is_empty()) || !self.tool_calls.is_empty()
    }
}

/// Receiving end of a streaming response.
pub type ChunkReceiver =
    tokio::sync::mpsc::Receiver<std::result::Result<StreamChunk, ProviderError>>;

/// The core Provider trait.
///
/// The agent loop calls `stream()` for every iteration and falls back to
/// `complete()` for transport recovery and diagnostics, without knowing
/// which backend is being used.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "lmstudio").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError>;

    /// Send a request and get a stream of response chunks.
    ///
    /// Default implementation calls `complete()` and wraps the result as a single chunk.
    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ChunkReceiver, ProviderError> {
        let response = self.complete(request).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let content = response.message.text();
        let tool_calls = response
            .message
            .tool_calls()
            .map(|(id, name, arguments)| ToolCallDelta {
                id: id.to_string(),
                name: name.to_string(),
                arguments: arguments.to_string(),
            })
            .collect();
        let _ = tx
            .send(Ok(StreamChunk {
                content: Some(content),
                tool_calls,
                done: true,
                usage: response.usage,
            }))
            .await;
        Ok(rx)
    }

    /// Health check: can we reach the provider?
    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_request_defaults() {
        let req: ProviderRequest =
            serde_json::from_str(r#"{"model":"demo-model-7b","messages":[]}"#).unwrap();
        assert!((req.temperature - 0.7).abs() < f32::EPSILON);
        assert!(!req.stream);
        assert!(req.tools.is_empty());
    }

    #[test]
    fn tool_definition_required_parameters() {
        let tool = ToolDefinition {
            name: "run_command".into(),
            description: "Execute a shell command".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "command": { "type": "string", "description": "The command to run" }
                },
                "required": ["command"]
            }),
        };
        assert!(tool.has_required_parameters());

        let optional = ToolDefinition {
            parameters: serde_json::json!({"type": "object", "properties": {}}),
            ..tool
        };
        assert!(!optional.has_required_parameters());
    }

    #[test]
    fn chunk_content_detection() {
        assert!(!StreamChunk::default().has_content());
        assert!(!StreamChunk::text("").has_content());
        assert!(StreamChunk::text("hi").has_content());
        let call = StreamChunk {
            tool_calls: vec![ToolCallDelta {
                id: "call_1".into(),
                name: "read_file".into(),
                arguments: String::new(),
            }],
            ..StreamChunk::default()
        };
        assert!(call.has_content());
    }

    struct OneShot;

    #[async_trait]
    impl Provider for OneShot {
        fn name(&self) -> &str {
            "one_shot"
        }

        async fn complete(
            &self,
            _request: ProviderRequest,
        ) -> std::result::Result<ProviderResponse, ProviderError> {
            Ok(ProviderResponse {
                message: Message::assistant_with_calls(
                    "Reading.",
                    vec![("call_1".into(), "read_file".into(), "{}".into())],
                ),
                usage: None,
                model: "demo-model-7b".into(),
            })
        }
    }

    #[tokio::test]
    async fn default_stream_wraps_complete() {
        let req = ProviderRequest {
            model: "demo-model-7b".into(),
            messages: vec![],
            temperature: 0.2,
            max_tokens: None,
            tools: vec![],
            stream: true,
        };
        let mut rx = OneShot.stream(req).await.unwrap();
        let chunk = rx.recv().await.unwrap().unwrap();
        assert!(chunk.done);
        assert_eq!(chunk.content.as_deref(), Some("Reading."));
        assert_eq!(chunk.tool_calls[0].name, "read_file");
        assert!(rx.recv().await.is_none());
    }
}
