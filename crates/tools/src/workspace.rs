//! Path resolution and output clipping shared by the built-in tools.

use openorca_core::ToolError;
use std::path::{Component, Path, PathBuf};

/// Outputs longer than this are clipped before they reach the model.
pub const MAX_OUTPUT_CHARS: usize = 30_000;

/// Resolve a model-supplied path inside the workspace root. Absolute paths
/// must already point into the root, and `..` may not climb above it.
pub fn resolve(root: &Path, path: &str, tool: &str) -> Result<PathBuf, ToolError> {
    let trimmed = path.trim();
    let outside = || ToolError::PermissionDenied {
        tool_name: tool.to_string(),
        reason: format!("'{trimmed}' is outside the workspace {}", root.display()),
    };

    let candidate = Path::new(trimmed);
    let relative = if candidate.is_absolute() {
        candidate.strip_prefix(root).map_err(|_| outside())?
    } else {
        candidate
    };

    let mut resolved = root.to_path_buf();
    let mut depth = 0usize;
    for component in relative.components() {
        match component {
            Component::CurDir => {}
            Component::Normal(part) => {
                resolved.push(part);
                depth += 1;
            }
            Component::ParentDir if depth > 0 => {
                resolved.pop();
                depth -= 1;
            }
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(outside());
            }
        }
    }
    Ok(resolved)
}

/// Clip `text` to at most `max` characters, noting how much was dropped.
pub fn clip(text: String, max: usize) -> String {
    let total = text.chars().count();
    if total <= max {
        return text;
    }
    let kept: String = text.chars().take(max).collect();
    format!("{kept}\n\n[output truncated: {} of {total} characters omitted]", total - max)
}
