//! read_file: return file contents, optionally a line window.

use crate::workspace::{MAX_OUTPUT_CHARS, clip, resolve};
use async_trait::async_trait;
use openorca_core::error::ToolError;
use openorca_core::tool::{RiskLevel, Tool, ToolOutcome};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

pub struct ReadFileTool {
    root: PathBuf,
}

impl ReadFileTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a text file. Use offset/limit (1-based lines) for large files."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The file path to read, relative to the workspace"
                },
                "offset": {
                    "type": "integer",
                    "description": "First line to return (1-based)"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of lines to return"
                }
            },
            "required": ["path"]
        })
    }

    fn risk_level(&self) -> RiskLevel {
        RiskLevel::ReadOnly
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        _cancel: CancellationToken,
    ) -> Result<ToolOutcome, ToolError> {
        let path = arguments["path"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'path' argument".into()))?;
        let offset = arguments["offset"].as_u64().unwrap_or(1).max(1) as usize;
        let limit = arguments["limit"].as_u64().map(|l| l as usize);

        let full_path = resolve(&self.root, path, self.name())?;
        let content = match tokio::fs::read_to_string(&full_path).await {
            Ok(c) => c,
            Err(e) => {
                return Ok(ToolOutcome::error(format!(
                    "Failed to read {}: {e}",
                    full_path.display()
                )));
            }
        };

        if offset == 1 && limit.is_none() {
            return Ok(ToolOutcome::ok(clip(content, MAX_OUTPUT_CHARS)));
        }

        let window: Vec<&str> = content
            .lines()
            .skip(offset - 1)
            .take(limit.unwrap_or(usize::MAX))
            .collect();
        if window.is_empty() {
            return Ok(ToolOutcome::error(format!(
                "{path} has {} lines; offset {offset} is past the end",
                content.lines().count()
            )));
        }
        Ok(ToolOutcome::ok(clip(window.join("\n"), MAX_OUTPUT_CHARS)))
    }
}
