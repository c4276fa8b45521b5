pub mod file_list;
pub mod file_read;
pub mod file_write;
pub mod traits;

pub use file_list::FileListTool;
pub use file_read::FileReadTool;
pub use file_write::FileWriteTool;
pub use traits::{Tool, ToolResult, ToolSpec};

use crate::security::PathSandbox;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Create the default sandboxed file tools
pub fn default_tools(sandbox: Arc<PathSandbox>) -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(FileReadTool::new(sandbox.clone())),
        Arc::new(FileWriteTool::new(sandbox.clone())),
        Arc::new(FileListTool::new(sandbox)),
    ]
}

/// Tools keyed by name. Registering a duplicate name replaces the old entry.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults(sandbox: Arc<PathSandbox>) -> Self {
        let mut registry = Self::new();
        for tool in default_tools(sandbox) {
            registry.register(tool);
        }
        registry
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Specs in name order.
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.values().map(|t| t.spec()).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::WorkspacePolicy;

    fn sandbox() -> Arc<PathSandbox> {
        Arc::new(PathSandbox::new(WorkspacePolicy::new("/tmp/clawgate-tools")).unwrap())
    }

    #[test]
    fn default_tools_has_file_tools() {
        let tools = default_tools(sandbox());
        let names: Vec<&str> = tools.iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["file_read", "file_write", "file_list"]);
    }

    #[test]
    fn registry_is_keyed_and_sorted_by_name() {
        let registry = ToolRegistry::with_defaults(sandbox());
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.names(), vec!["file_list", "file_read", "file_write"]);
        assert!(registry.get("file_read").is_some());
        assert!(registry.get("shell").is_none());
    }

    #[test]
    fn registering_same_name_replaces() {
        let sb = sandbox();
        let mut registry = ToolRegistry::new();
        assert!(registry.is_empty());
        registry.register(Arc::new(FileReadTool::new(sb.clone())));
        registry.register(Arc::new(FileReadTool::new(sb)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn specs_carry_schemas() {
        let specs = ToolRegistry::with_defaults(sandbox()).specs();
        for spec in &specs {
            assert_eq!(spec.parameters["type"], "object", "{}", spec.name);
        }
    }
}
