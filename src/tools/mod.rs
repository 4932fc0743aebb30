//! Tools offered to the LLM for function calling
//!
//! Each tool implements the `Tool` trait and is registered into a
//! `ToolRegistry`, which exposes the definitions sent with completion
//! requests and executes the calls the model makes.
//!
//! ## Built-in Tools
//!
//! - **tavily_search**: web search through the Tavily API (requires an API key)
//! - **terminate**: lets the model end the search phase early

mod registry;
mod tavily_search;
mod terminate;
mod traits;

pub use registry::ToolRegistry;
pub use tavily_search::{
    format_search_response, AnswerDepth, SearchHit, SearchRequest, SearchResponse,
    TavilySearchTool, TimeRange, MAX_RESULTS_LIMIT,
};
pub use terminate::TerminateTool;
pub use traits::{Tool, ToolResult};
