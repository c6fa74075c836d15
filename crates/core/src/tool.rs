//! Tool trait: the abstraction over agent capabilities.
//!
//! Tools give the agent the ability to act on the workspace: read and
//! write files, list directories, run commands. The agent loop never talks
//! to a tool directly; it goes through a [`ToolInvoker`], which the
//! [`ToolRegistry`] implements.

use crate::error::ToolError;
use crate::provider::ToolDefinition;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// A request to execute a tool, as extracted from a model response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Call ID (provider-assigned, or synthesized for text-mode calls)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments as a JSON object string
    pub arguments: String,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    /// Parsed arguments. Blank argument strings are treated as `{}`.
    pub fn arguments_value(&self) -> std::result::Result<serde_json::Value, serde_json::Error> {
        parse_arguments(&self.arguments)
    }
}

/// How much damage a tool can do. Drives plan-mode and sandbox decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    /// Observes the workspace only
    ReadOnly,
    /// Modifies the workspace
    Moderate,
    /// Arbitrary side effects (shell, network)
    Dangerous,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadOnly => write!(f, "read-only"),
            Self::Moderate => write!(f, "moderate"),
            Self::Dangerous => write!(f, "dangerous"),
        }
    }
}

/// The result of one tool invocation as the model will see it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutcome {
    /// The output content
    pub output: String,

    /// Whether the tool failed
    pub is_error: bool,
}

impl ToolOutcome {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            is_error: false,
        }
    }

    pub fn error(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            is_error: true,
        }
    }
}

/// The core Tool trait.
///
/// Each tool (read_file, write_file, run_command) implements this trait
/// and is registered in the [`ToolRegistry`].
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "read_file").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Risk classification. Unclassified tools are treated as dangerous.
    fn risk_level(&self) -> RiskLevel {
        RiskLevel::Dangerous
    }

    /// Execute the tool. Long-running tools should watch `cancel`.
    async fn execute(
        &self,
        arguments: serde_json::Value,
        cancel: CancellationToken,
    ) -> std::result::Result<ToolOutcome, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// The tool-invocation boundary used by the agent loop.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// Definitions of every invocable tool.
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// Risk of a tool by name. Unknown names are [`RiskLevel::Dangerous`].
    fn risk_of(&self, name: &str) -> RiskLevel;

    /// Whether the tool's schema declares required parameters.
    fn requires_arguments(&self, name: &str) -> bool;

    /// Whether a tool with this name exists.
    fn contains(&self, name: &str) -> bool;

    /// Invoke a tool with a JSON argument string. Failures come back as
    /// error outcomes, never as panics or `Err`.
    async fn invoke(&self, name: &str, arguments: &str, cancel: CancellationToken) -> ToolOutcome;
}

/// Parse a JSON argument string; blank means "no arguments".
pub fn parse_arguments(raw: &str) -> std::result::Result<serde_json::Value, serde_json::Error> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(serde_json::json!({}));
    }
    serde_json::from_str(trimmed)
}

/// A registry of available tools.
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// List all registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Execute a tool by name with parsed arguments.
    pub async fn execute(
        &self,
        name: &str,
        arguments: serde_json::Value,
        cancel: CancellationToken,
    ) -> std::result::Result<ToolOutcome, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        tool.execute(arguments, cancel).await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolInvoker for ToolRegistry {
    fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    fn risk_of(&self, name: &str) -> RiskLevel {
        self.tools
            .get(name)
            .map(|t| t.risk_level())
            .unwrap_or(RiskLevel::Dangerous)
    }

    fn requires_arguments(&self, name: &str) -> bool {
        self.tools
            .get(name)
            .is_some_and(|t| t.to_definition().has_required_parameters())
    }

    fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    async fn invoke(&self, name: &str, arguments: &str, cancel: CancellationToken) -> ToolOutcome {
        let args = match parse_arguments(arguments) {
            Ok(v) => v,
            Err(e) => {
                return ToolOutcome::error(format!("Invalid JSON arguments for {name}: {e}"));
            }
        };

        match self.execute(name, args, cancel).await {
            Ok(outcome) => outcome,
            Err(ToolError::NotFound(n)) => ToolOutcome::error(format!(
                "Unknown tool: {n}. Available tools: {}",
                self.names().join(", ")
            )),
            Err(e) => {
                tracing::debug!(tool = name, error = %e, "Tool returned error");
                ToolOutcome::error(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A simple test tool for unit tests.
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes back the input"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" }
                },
                "required": ["text"]
            })
        }
        fn risk_level(&self) -> RiskLevel {
            RiskLevel::ReadOnly
        }
        async fn execute(
            &self,
            arguments: serde_json::Value,
            _cancel: CancellationToken,
        ) -> std::result::Result<ToolOutcome, ToolError> {
            match arguments["text"].as_str() {
                Some(text) => Ok(ToolOutcome::ok(text)),
                None => Err(ToolError::InvalidArguments("missing 'text'".into())),
            }
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        registry
    }

    #[test]
    fn registry_register_and_lookup() {
        let registry = registry();
        assert!(registry.get("echo").is_some());
        assert!(registry.get("nonexistent").is_none());
        assert!(registry.contains("echo"));
    }

    #[test]
    fn registry_definitions() {
        let defs = registry().definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "echo");
    }

    #[test]
    fn unknown_tools_are_dangerous() {
        let registry = registry();
        assert_eq!(registry.risk_of("echo"), RiskLevel::ReadOnly);
        assert_eq!(registry.risk_of("format_disk"), RiskLevel::Dangerous);
        assert!(registry.requires_arguments("echo"));
        assert!(!registry.requires_arguments("format_disk"));
    }

    #[test]
    fn blank_arguments_parse_as_empty_object() {
        assert_eq!(parse_arguments("  ").unwrap(), serde_json::json!({}));
        assert!(parse_arguments("{not json").is_err());
    }

    #[tokio::test]
    async fn invoke_tool() {
        let outcome = registry()
            .invoke("echo", r#"{"text":"hello world"}"#, CancellationToken::new())
            .await;
        assert_eq!(outcome, ToolOutcome::ok("hello world"));
    }

    #[tokio::test]
    async fn invoke_missing_tool_is_error_outcome() {
        let outcome = registry()
            .invoke("nonexistent", "{}", CancellationToken::new())
            .await;
        assert!(outcome.is_error);
        assert!(outcome.output.contains("Unknown tool"));
        assert!(outcome.output.contains("echo"));
    }

    #[tokio::test]
    async fn invoke_with_bad_json_is_error_outcome() {
        let outcome = registry()
            .invoke("echo", "{\"text\":", CancellationToken::new())
            .await;
        assert!(outcome.is_error);
        assert!(outcome.output.contains("Invalid JSON"));
    }

    #[tokio::test]
    async fn tool_error_becomes_error_outcome() {
        let outcome = registry()
            .invoke("echo", "{}", CancellationToken::new())
            .await;
        assert!(outcome.is_error);
        assert!(outcome.output.contains("missing 'text'"));
    }
}
