//! Built-in tool implementations for OpenOrca.
//!
//! Tools give the agent the ability to act on the workspace: read, list and
//! write files, and run shell commands. Every tool resolves relative paths
//! against the workspace root it was created with.

pub mod list_directory;
pub mod read_file;
pub mod run_command;
pub mod workspace;
pub mod write_file;

use openorca_core::tool::ToolRegistry;
use std::path::PathBuf;

pub use list_directory::ListDirectoryTool;
pub use read_file::ReadFileTool;
pub use run_command::RunCommandTool;
pub use write_file::WriteFileTool;

/// Create a registry with all built-in tools rooted at `root`.
pub fn default_registry(root: impl Into<PathBuf>) -> ToolRegistry {
    let root = root.into();
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(ReadFileTool::new(root.clone())));
    registry.register(Box::new(ListDirectoryTool::new(root.clone())));
    registry.register(Box::new(WriteFileTool::new(root.clone())));
    registry.register(Box::new(RunCommandTool::new(root)));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use openorca_core::{RiskLevel, ToolInvoker};

    #[test]
    fn registry_has_all_tools_with_risks() {
        let registry = default_registry(".");
        assert_eq!(
            registry.names(),
            vec!["list_directory", "read_file", "run_command", "write_file"]
        );
        assert_eq!(registry.risk_of("read_file"), RiskLevel::ReadOnly);
        assert_eq!(registry.risk_of("list_directory"), RiskLevel::ReadOnly);
        assert_eq!(registry.risk_of("write_file"), RiskLevel::Moderate);
        assert_eq!(registry.risk_of("run_command"), RiskLevel::Dangerous);
        assert!(registry.requires_arguments("read_file"));
        assert!(!registry.requires_arguments("list_directory"));
    }
}
