use super::traits::{Tool, ToolResult};
use crate::security::PathSandbox;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

const MAX_ENTRIES: usize = 1000;

/// List a workspace directory. Entries the sandbox would refuse are hidden.
pub struct FileListTool {
    sandbox: Arc<PathSandbox>,
}

impl FileListTool {
    pub fn new(sandbox: Arc<PathSandbox>) -> Self {
        Self { sandbox }
    }

    fn is_hidden(&self, name: &str) -> bool {
        (name.starts_with('.') && !self.sandbox.policy().allow_dotfiles)
            || self.sandbox.policy().is_blocked_name(name)
    }
}

#[async_trait]
impl Tool for FileListTool {
    fn name(&self) -> &str {
        "file_list"
    }

    fn description(&self) -> &str {
        "List files and directories in a workspace directory"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Relative directory path within the workspace (defaults to the workspace root)"
                }
            }
        })
    }

    async fn execute(&self, args: serde_json::Value) -> anyhow::Result<ToolResult> {
        let path = args.get("path").and_then(|v| v.as_str()).unwrap_or("");

        let full_path = match self.sandbox.resolve_directory(path) {
            Ok(p) => p,
            Err(e) => return Ok(ToolResult::fail(e.to_string())),
        };

        let resolved = match self.sandbox.ensure_within_after_symlinks(&full_path).await {
            Ok(p) => p,
            Err(e) => {
                return Ok(ToolResult::fail(format!(
                    "Failed to resolve directory path: {e}"
                )));
            }
        };

        let mut dir = match tokio::fs::read_dir(&resolved).await {
            Ok(d) => d,
            Err(e) => return Ok(ToolResult::fail(format!("Failed to list directory: {e}"))),
        };

        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if self.is_hidden(&name) {
                continue;
            }
            let Ok(relative) = self.sandbox.relative_path(&full_path.join(&name)) else {
                continue;
            };
            let mut display = relative.to_string_lossy().replace('\\', "/");
            if entry.file_type().await.is_ok_and(|t| t.is_dir()) {
                display.push('/');
            }
            entries.push(display);
        }
        entries.sort();

        if entries.is_empty() {
            return Ok(ToolResult::ok("(empty directory)"));
        }
        let total = entries.len();
        let mut output = entries
            .into_iter()
            .take(MAX_ENTRIES)
            .collect::<Vec<_>>()
            .join("\n");
        if total > MAX_ENTRIES {
            output.push_str(&format!("\n... {} more entries", total - MAX_ENTRIES));
        }
        Ok(ToolResult::ok(output))
    }
}
