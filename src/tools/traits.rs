//! Core tool trait and result types

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::agent::types::ToolDefinition;
use crate::error::Result;

/// A tool that can be called by the LLM
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool name
    fn name(&self) -> &str;

    /// Get the tool description
    fn description(&self) -> &str;

    /// Get the JSON Schema for tool parameters
    fn parameters_schema(&self) -> Value;

    /// Execute the tool with parsed JSON arguments
    async fn execute(&self, args: Value) -> Result<ToolResult>;

    /// Whether calling this tool ends the search phase of a turn
    fn ends_search(&self) -> bool {
        false
    }

    /// Convert to a function-calling tool definition
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition::function(self.name(), self.description(), self.parameters_schema())
    }
}

/// Result of a tool execution
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolResult {
    /// Whether the execution was successful
    pub success: bool,
    /// Result content (for successful execution)
    pub content: Option<String>,
    /// Error message (for failed execution)
    pub error: Option<String>,
}

impl ToolResult {
    /// Create a successful result
    pub fn success(content: impl Into<String>) -> Self {
        ToolResult {
            success: true,
            content: Some(content.into()),
            error: None,
        }
    }

    /// Create a failed result
    pub fn failure(error: impl Into<String>) -> Self {
        ToolResult {
            success: false,
            content: None,
            error: Some(error.into()),
        }
    }

    /// Text placed in the tool message sent back to the LLM
    pub fn to_message_text(&self) -> String {
        if self.success {
            self.content.clone().unwrap_or_default()
        } else {
            format!("Error: {}", self.error.as_deref().unwrap_or_default())
        }
    }

    /// Message text cut to `max_chars`, for progress events
    pub fn preview(&self, max_chars: usize) -> String {
        truncate_chars(&self.to_message_text(), max_chars)
    }
}

/// Cut `text` to at most `max` characters, marking the cut with "..."
pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
