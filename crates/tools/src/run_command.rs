//! run_command: execute a shell command in the workspace.
//!
//! The child is killed when the call is cancelled or timed out by the
//! executor (`kill_on_drop`).

use crate::workspace::{MAX_OUTPUT_CHARS, clip};
use async_trait::async_trait;
use openorca_core::error::ToolError;
use openorca_core::tool::{RiskLevel, Tool, ToolOutcome};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub struct RunCommandTool {
    root: PathBuf,
}

impl RunCommandTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn command(&self, command: &str) -> Command {
        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command]);
            c
        };
        cmd.current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Tool for RunCommandTool {
    fn name(&self) -> &str {
        "run_command"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the workspace and return stdout/stderr. Start long-running servers in the background."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                }
            },
            "required": ["command"]
        })
    }

    fn risk_level(&self) -> RiskLevel {
        RiskLevel::Dangerous
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        cancel: CancellationToken,
    ) -> Result<ToolOutcome, ToolError> {
        let command = arguments["command"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'command' argument".into()))?;

        debug!(command = %command, "Executing shell command");

        let child = self
            .command(command)
            .spawn()
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "run_command".into(),
                reason: e.to_string(),
            })?;

        let output = tokio::select! {
            out = child.wait_with_output() => out.map_err(|e| ToolError::ExecutionFailed {
                tool_name: "run_command".into(),
                reason: e.to_string(),
            })?,
            _ = cancel.cancelled() => {
                return Ok(ToolOutcome::error(format!("Command cancelled: {command}")));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if output.status.success() {
            let text = if stderr.trim().is_empty() {
                stdout
            } else {
                format!("{stdout}\n[stderr]: {stderr}")
            };
            let text = text.trim();
            let text = if text.is_empty() {
                "(command completed with no output)".to_string()
            } else {
                text.to_string()
            };
            Ok(ToolOutcome::ok(clip(text, MAX_OUTPUT_CHARS)))
        } else {
            let code = output.status.code().unwrap_or(-1);
            warn!(command = %command, exit_code = code, "Command failed");
            let text = format!("[exit code: {code}]\n{stdout}\n{stderr}");
            Ok(ToolOutcome::error(clip(text.trim().to_string(), MAX_OUTPUT_CHARS)))
        }
    }
}
