use super::traits::{Tool, ToolResult};
use crate::security::PathSandbox;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

/// Write file contents with path sandboxing
pub struct FileWriteTool {
    sandbox: Arc<PathSandbox>,
}

impl FileWriteTool {
    pub fn new(sandbox: Arc<PathSandbox>) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for FileWriteTool {
    fn name(&self) -> &str {
        "file_write"
    }

    fn description(&self) -> &str {
        "Write contents to a file in the workspace"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Relative path to the file within the workspace"
                },
                "content": {
                    "type": "string",
                    "description": "Content to write to the file"
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> anyhow::Result<ToolResult> {
        let path = args
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("Missing 'path' parameter"))?;

        let content = args
            .get("content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("Missing 'content' parameter"))?;

        let full_path = match self.sandbox.resolve(path) {
            Ok(p) => p,
            Err(e) => return Ok(ToolResult::fail(e.to_string())),
        };

        if full_path == self.sandbox.root() {
            return Ok(ToolResult::fail("Invalid path: missing file name"));
        }

        let (Some(parent), Some(file_name)) = (full_path.parent(), full_path.file_name()) else {
            return Ok(ToolResult::fail("Invalid path: missing file name"));
        };

        if let Err(e) = self.sandbox.ensure_ancestor_within(parent).await {
            return Ok(ToolResult::fail(format!("Failed to resolve file path: {e}")));
        }

        tokio::fs::create_dir_all(parent).await?;

        // Check again after creation in case the tree changed underneath us.
        let resolved_parent = match self.sandbox.ensure_within_after_symlinks(parent).await {
            Ok(p) => p,
            Err(e) => return Ok(ToolResult::fail(format!("Failed to resolve file path: {e}"))),
        };

        let resolved_target = resolved_parent.join(file_name);

        if let Ok(meta) = tokio::fs::symlink_metadata(&resolved_target).await {
            if meta.file_type().is_symlink() {
                return Ok(ToolResult::fail(format!(
                    "Refusing to write through symlink: {}",
                    resolved_target.display()
                )));
            }
            if meta.is_dir() {
                return Ok(ToolResult::fail(format!("Not a file: {path}")));
            }
        }

        match tokio::fs::write(&resolved_target, content).await {
            Ok(()) => Ok(ToolResult::ok(format!(
                "Written {} bytes to {path}",
                content.len()
            ))),
            Err(e) => Ok(ToolResult::fail(format!("Failed to write file: {e}"))),
        }
    }
}
