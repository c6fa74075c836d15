//! # OpenOrca Core
//!
//! Domain types, collaborator traits, and error definitions for the OpenOrca
//! coding agent. The agent loop, providers and tools all implement against
//! the seams defined here.
//!
//! ## Seams
//!
//! - [`Provider`]: the chat-stream collaborator (streaming + one-shot)
//! - [`ToolInvoker`]: the tool-invocation boundary (risk lookup + execute)
//! - [`Conversation`]: the append-only message log owned by the turn runner

pub mod error;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{ProviderError, ToolError};
pub use message::{ContentPart, Conversation, ConversationId, Message, Role};
pub use provider::{
    ChunkReceiver, Provider, ProviderRequest, ProviderResponse, StreamChunk, ToolCallDelta,
    ToolDefinition, Usage,
};
pub use tool::{RiskLevel, Tool, ToolCall, ToolInvoker, ToolOutcome, ToolRegistry};
