use super::traits::{Tool, ToolResult};
use crate::security::PathSandbox;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

const MAX_FILE_SIZE_BYTES: u64 = 10 * 1024 * 1024;

/// Read file contents with path sandboxing
pub struct FileReadTool {
    sandbox: Arc<PathSandbox>,
}

impl FileReadTool {
    pub fn new(sandbox: Arc<PathSandbox>) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for FileReadTool {
    fn name(&self) -> &str {
        "file_read"
    }

    fn description(&self) -> &str {
        "Read the contents of a file in the workspace"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Relative path to the file within the workspace"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> anyhow::Result<ToolResult> {
        let path = args
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("Missing 'path' parameter"))?;

        let full_path = match self.sandbox.resolve(path) {
            Ok(p) => p,
            Err(e) => return Ok(ToolResult::fail(e.to_string())),
        };

        // Resolve symlinks before reading.
        let resolved_path = match self.sandbox.ensure_within_after_symlinks(&full_path).await {
            Ok(p) => p,
            Err(e) => return Ok(ToolResult::fail(format!("Failed to resolve file path: {e}"))),
        };

        // Size check after canonicalization so a swapped symlink cannot bypass it
        match tokio::fs::metadata(&resolved_path).await {
            Ok(meta) if meta.is_dir() => {
                return Ok(ToolResult::fail(format!("Not a file: {path}")));
            }
            Ok(meta) if meta.len() > MAX_FILE_SIZE_BYTES => {
                return Ok(ToolResult::fail(format!(
                    "File too large: {} bytes (limit: {MAX_FILE_SIZE_BYTES} bytes)",
                    meta.len()
                )));
            }
            Ok(_) => {}
            Err(e) => {
                return Ok(ToolResult::fail(format!(
                    "Failed to read file metadata: {e}"
                )));
            }
        }

        match tokio::fs::read_to_string(&resolved_path).await {
            Ok(contents) => Ok(ToolResult::ok(contents)),
            Err(e) => Ok(ToolResult::fail(format!("Failed to read file: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::WorkspacePolicy;
    use tempfile::TempDir;

    fn tool_for(dir: &std::path::Path) -> FileReadTool {
        FileReadTool::new(Arc::new(
            PathSandbox::new(WorkspacePolicy::new(dir)).unwrap(),
        ))
    }

    #[test]
    fn file_read_name_and_schema() {
        let tmp = TempDir::new().unwrap();
        let tool = tool_for(tmp.path());
        assert_eq!(tool.name(), "file_read");
        assert_eq!(tool.parameters_schema()["required"][0], "path");
    }

    #[tokio::test]
    async fn file_read_existing_file() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("test.txt"), "hello world").unwrap();
        let result = tool_for(tmp.path())
            .execute(json!({"path": "test.txt"}))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.output, "hello world");
    }

    #[tokio::test]
    async fn file_read_nonexistent_file() {
        let tmp = TempDir::new().unwrap();
        let result = tool_for(tmp.path())
            .execute(json!({"path": "nope.txt"}))
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("Failed to resolve"));
    }

    #[tokio::test]
    async fn file_read_blocks_traversal_and_blocked_names() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join(".git")).unwrap();
        std::fs::write(tmp.path().join(".git/config"), "secret").unwrap();
        let tool = tool_for(tmp.path());

        let r = tool.execute(json!({"path": "../../etc/passwd"})).await.unwrap();
        assert!(!r.success);
        assert!(r.error.unwrap().contains("blocked pattern"));

        let r = tool.execute(json!({"path": ".git/config"})).await.unwrap();
        assert!(!r.success);
        assert!(r.output.is_empty());
    }

    #[tokio::test]
    async fn file_read_missing_path_param() {
        let tmp = TempDir::new().unwrap();
        assert!(tool_for(tmp.path()).execute(json!({})).await.is_err());
    }

    #[tokio::test]
    async fn file_read_rejects_directory() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("docs")).unwrap();
        let r = tool_for(tmp.path())
            .execute(json!({"path": "docs"}))
            .await
            .unwrap();
        assert!(!r.success);
        assert!(r.error.unwrap().contains("Not a file"));
    }

    #[tokio::test]
    async fn file_read_rejects_oversized_file() {
        let tmp = TempDir::new().unwrap();
        let f = std::fs::File::create(tmp.path().join("big.bin")).unwrap();
        f.set_len(MAX_FILE_SIZE_BYTES + 1).unwrap();
        let r = tool_for(tmp.path())
            .execute(json!({"path": "big.bin"}))
            .await
            .unwrap();
        assert!(!r.success);
        assert!(r.error.unwrap().contains("File too large"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_read_blocks_symlink_escape() {
        let tmp = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        std::fs::write(outside.path().join("secret.txt"), "s3cret").unwrap();
        std::os::unix::fs::symlink(
            outside.path().join("secret.txt"),
            tmp.path().join("escape.txt"),
        )
        .unwrap();

        let r = tool_for(tmp.path())
            .execute(json!({"path": "escape.txt"}))
            .await
            .unwrap();
        assert!(!r.success);
        assert!(!r.output.contains("s3cret"));
    }
}
