//! Tool registry - manages the tools offered to the LLM

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::agent::types::{AssistantToolCall, ToolDefinition};

use super::traits::{Tool, ToolResult};

/// Registry of available tools, ordered by name
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing one with the same name
    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    /// Register a tool that is also used outside the registry
    pub fn register_shared(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// Tool definitions, sorted by name
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.to_definition()).collect()
    }

    /// Whether calling `name` ends the search phase
    pub fn ends_search(&self, name: &str) -> bool {
        self.get(name).is_some_and(|t| t.ends_search())
    }

    /// Execute a tool call requested by the model
    ///
    /// Unknown tools, malformed arguments and tool errors all come back as
    /// a failed [`ToolResult`] so the model can react to them.
    pub async fn execute(&self, call: &AssistantToolCall) -> ToolResult {
        let name = call.function.name.as_str();
        let Some(tool) = self.get(name) else {
            warn!(tool = name, "Model requested an unknown tool");
            return ToolResult::failure(format!("Unknown tool: {}", name));
        };

        let raw = call.function.arguments.trim();
        let args = if raw.is_empty() {
            serde_json::Value::Object(Default::default())
        } else {
            match serde_json::from_str(raw) {
                Ok(args) => args,
                Err(e) => {
                    warn!(tool = name, error = %e, "Unparsable tool arguments");
                    return ToolResult::failure(format!("Invalid arguments for {}: {}", name, raw));
                }
            }
        };

        debug!(tool = name, call_id = %call.id, "Executing tool");
        match tool.execute(args).await {
            Ok(result) => result,
            Err(e) => ToolResult::failure(e.to_string()),
        }
    }

    /// List tool names
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }
}
