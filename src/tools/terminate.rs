//! Terminate tool
//!
//! Lets the model end the search phase once it has gathered enough.

use async_trait::async_trait;
use serde_json::Value;

use super::traits::{Tool, ToolResult};
use crate::Result;

/// Ends the search phase of the current turn
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminateTool;

#[async_trait]
impl Tool for TerminateTool {
    fn name(&self) -> &str {
        "terminate"
    }

    fn description(&self) -> &str {
        "Stop searching. Call this when the information gathered so far is enough to answer the user, or when further searches will not help."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "reason": {
                    "type": "string",
                    "description": "Why searching can stop"
                }
            }
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolResult> {
        let reason = args
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or("enough information gathered");
        Ok(ToolResult::success(format!("Search finished: {}", reason)))
    }

    fn ends_search(&self) -> bool {
        true
    }
}
