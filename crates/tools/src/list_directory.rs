//! list_directory: one entry per line, directories suffixed with `/`.

use crate::workspace::{MAX_OUTPUT_CHARS, clip, resolve};
use async_trait::async_trait;
use openorca_core::error::ToolError;
use openorca_core::tool::{RiskLevel, Tool, ToolOutcome};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

pub struct ListDirectoryTool {
    root: PathBuf,
}

impl ListDirectoryTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn description(&self) -> &str {
        "List the entries of a directory. Defaults to the workspace root."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory to list, relative to the workspace (default \".\")"
                }
            }
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
        let path = arguments["path"].as_str().unwrap_or(".");
        let dir = resolve(&self.root, path, self.name())?;

        let mut reader = match tokio::fs::read_dir(&dir).await {
            Ok(r) => r,
            Err(e) => {
                return Ok(ToolOutcome::error(format!(
                    "Failed to list {}: {e}",
                    dir.display()
                )));
            }
        };

        let mut entries = Vec::new();
        loop {
            match reader.next_entry().await {
                Ok(Some(entry)) => {
                    let mut name = entry.file_name().to_string_lossy().into_owned();
                    if entry.file_type().await.is_ok_and(|t| t.is_dir()) {
                        name.push('/');
                    }
                    entries.push(name);
                }
                Ok(None) => break,
                Err(e) => {
                    return Err(ToolError::ExecutionFailed {
                        tool_name: "list_directory".into(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        if entries.is_empty() {
            return Ok(ToolOutcome::ok(format!("{path} is empty")));
        }
        entries.sort();
        Ok(ToolOutcome::ok(clip(entries.join("\n"), MAX_OUTPUT_CHARS)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_is_optional() {
        let tool = ListDirectoryTool::new(".");
        assert!(!tool.to_definition().has_required_parameters());
        assert_eq!(tool.risk_level(), RiskLevel::ReadOnly);
    }

    #[tokio::test]
    async fn lists_sorted_with_dir_suffix() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), "").unwrap();
        std::fs::write(dir.path().join("a.txt"), "").unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();

        let tool = ListDirectoryTool::new(dir.path());
        let outcome = tool
            .execute(serde_json::json!({}), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.output, "a.txt\nb.txt\nsrc/");
    }

    #[tokio::test]
    async fn missing_directory_is_error_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ListDirectoryTool::new(dir.path());
        let outcome = tool
            .execute(serde_json::json!({"path": "nope"}), CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.is_error);
    }
}
