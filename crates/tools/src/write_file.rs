//! write_file: create or overwrite a file.

use crate::workspace::resolve;
use async_trait::async_trait;
use openorca_core::error::ToolError;
use openorca_core::tool::{RiskLevel, Tool, ToolOutcome};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

pub struct WriteFileTool {
    root: PathBuf,
}

impl WriteFileTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file. Creates the file and parent directories if needed, overwrites if it exists."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The file path to write to, relative to the workspace"
                },
                "content": {
                    "type": "string",
                    "description": "The full file content"
                }
            },
            "required": ["path", "content"]
        })
    }

    fn risk_level(&self) -> RiskLevel {
        RiskLevel::Moderate
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        _cancel: CancellationToken,
    ) -> Result<ToolOutcome, ToolError> {
        let path = arguments["path"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'path' argument".into()))?;

        let content = arguments["content"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'content' argument".into()))?;

        let full_path = resolve(&self.root, path, self.name())?;

        if let Some(parent) = full_path.parent()
            && let Err(e) = tokio::fs::create_dir_all(parent).await
        {
            return Ok(ToolOutcome::error(format!("Failed to create directory: {e}")));
        }

        match tokio::fs::write(&full_path, content).await {
            Ok(()) => {
                tracing::debug!(path = %full_path.display(), bytes = content.len(), "File written");
                Ok(ToolOutcome::ok(format!(
                    "Successfully wrote {} bytes to {path}",
                    content.len()
                )))
            }
            Err(e) => Ok(ToolOutcome::error(format!("Failed to write file: {e}"))),
        }
    }
}
