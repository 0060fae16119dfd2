//! Capability system for the agent.
//!
//! Tools are the side-effecting capabilities an agent can drive during direct
//! task execution. The engine resolves a task's suggested tool names against
//! the registry (case-insensitively, unknown names skipped), asks the
//! reasoning provider how to drive each match, then invokes it with the task
//! description and those instructions.

mod content;
mod web_search;

pub use content::ContentGenerator;
pub use web_search::WebSearch;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

/// Information about a tool for display and prompt context.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
}

/// Trait for implementing tools.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool.
    fn name(&self) -> &str;

    /// A description of what this tool does.
    fn description(&self) -> &str;

    /// Invoke the tool against a task.
    ///
    /// `instructions` is free-form driving text produced by the reasoning
    /// provider. Tools that take parameters parse it as JSON and fall back to
    /// defaults when it is prose.
    async fn run(&self, task_description: &str, instructions: &str) -> anyhow::Result<String>;
}

/// Registry of available tools.
#[derive(Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create a new registry with the built-in tools.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(web_search::WebSearch));
        registry.register(Arc::new(content::ContentGenerator));
        registry
    }

    /// Create an empty registry (no built-in tools).
    pub fn empty() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Add a tool, replacing any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Look up a tool by name, ignoring ASCII case.
    pub fn find(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools
            .values()
            .find(|t| t.name().eq_ignore_ascii_case(name))
            .cloned()
    }

    /// Check if a tool exists by name.
    pub fn has_tool(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// Tool names in stable (sorted) order.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// List all available tools, sorted by name.
    pub fn list_tools(&self) -> Vec<ToolInfo> {
        let mut infos: Vec<ToolInfo> = self
            .tools
            .values()
            .map(|t| ToolInfo {
                name: t.name().to_string(),
                description: t.description().to_string(),
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Registry restricted to `names`; unknown names are dropped silently.
    pub fn subset(&self, names: &[String]) -> ToolRegistry {
        let mut restricted = Self::empty();
        for name in names {
            if let Some(tool) = self.find(name) {
                restricted.register(tool);
            }
        }
        restricted
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
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

    struct Probe;

    #[async_trait]
    impl Tool for Probe {
        fn name(&self) -> &str {
            "probe"
        }

        fn description(&self) -> &str {
            "test probe"
        }

        async fn run(&self, task_description: &str, _instructions: &str) -> anyhow::Result<String> {
            Ok(format!("probed {task_description}"))
        }
    }

    #[test]
    fn built_in_registry_has_default_tools() {
        let registry = ToolRegistry::new();
        assert_eq!(registry.names(), vec!["content_generator", "web_search"]);
    }

    #[test]
    fn find_is_case_insensitive() {
        let registry = ToolRegistry::new();
        assert!(registry.find("WEB_SEARCH").is_some());
        assert!(registry.find("Web_Search").is_some());
        assert!(registry.find("no_such_tool").is_none());
        assert!(registry.has_tool("CONTENT_GENERATOR"));
    }

    #[test]
    fn subset_drops_unknown_names_silently() {
        let registry = ToolRegistry::new();
        let restricted = registry.subset(&[
            "web_search".to_string(),
            "imaginary".to_string(),
        ]);
        assert_eq!(restricted.names(), vec!["web_search"]);
    }

    #[test]
    fn register_replaces_same_name() {
        let mut registry = ToolRegistry::empty();
        registry.register(Arc::new(Probe));
        registry.register(Arc::new(Probe));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn registered_tool_is_invokable_through_find() {
        let mut registry = ToolRegistry::empty();
        registry.register(Arc::new(Probe));
        let tool = registry.find("PROBE").unwrap();
        let out = tool.run("the target", "").await.unwrap();
        assert_eq!(out, "probed the target");
    }
}
