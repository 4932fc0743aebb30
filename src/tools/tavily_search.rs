//! Tavily search tool
//!
//! Web search through the Tavily API. Requires a Tavily API key.
//! Identical searches are served from an in-process cache for a while.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::traits::{truncate_chars, Tool, ToolResult};
use crate::config::SearchConfig;
use crate::error::{Error, Result};

/// Upper bound on results per search
pub const MAX_RESULTS_LIMIT: u8 = 10;

/// Characters of page content kept per result
const CONTENT_PREVIEW_CHARS: usize = 500;

/// Recency filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeRange {
    Day,
    Week,
    Month,
    Year,
}

/// Depth of the generated answer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerDepth {
    Basic,
    #[default]
    Advanced,
}

/// Parameters of one search
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Search query
    pub query: String,
    /// Results to return (1-10)
    pub max_results: u8,
    /// Recency filter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_range: Option<TimeRange>,
    /// Answer depth
    #[serde(default)]
    pub include_answer: AnswerDepth,
    /// Include site icons
    #[serde(default)]
    pub include_favicon: bool,
}

impl SearchRequest {
    /// A request with default options
    pub fn new(query: impl Into<String>, max_results: u8) -> Self {
        SearchRequest {
            query: query.into(),
            max_results: max_results.clamp(1, MAX_RESULTS_LIMIT),
            time_range: None,
            include_answer: AnswerDepth::default(),
            include_favicon: false,
        }
    }

    fn cache_key(&self) -> u64 {
        let mut normalized = self.clone();
        normalized.query = self.query.trim().to_lowercase();

        let mut hasher = DefaultHasher::new();
        normalized.hash(&mut hasher);
        hasher.finish()
    }
}

/// A single search hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Page title
    #[serde(default)]
    pub title: String,
    /// Page URL
    #[serde(default)]
    pub url: String,
    /// Extracted page content
    #[serde(default)]
    pub content: String,
    /// Relevance score
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    /// Site icon URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favicon: Option<String>,
}

/// Search results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    /// The query as executed
    #[serde(default)]
    pub query: String,
    /// Generated answer, when requested and available
    #[serde(default)]
    pub answer: Option<String>,
    /// Ranked hits
    #[serde(default)]
    pub results: Vec<SearchHit>,
}

/// Tavily search tool for web searching
pub struct TavilySearchTool {
    client: Client,
    config: SearchConfig,
    cache: Cache<u64, Arc<SearchResponse>>,
}

impl TavilySearchTool {
    /// Create a new Tavily search tool
    pub fn new(config: SearchConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let cache = Cache::builder()
            .max_capacity(config.cache_capacity)
            .time_to_live(config.cache_ttl)
            .build();

        Ok(Self { client, config, cache })
    }

    /// Whether an API key is configured
    pub fn is_configured(&self) -> bool {
        !self.config.api_key.expose_secret().is_empty()
    }

    /// Results returned when a request does not ask for a count
    pub fn default_max_results(&self) -> u8 {
        self.config.default_max_results
    }

    /// Perform a web search
    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        if !self.is_configured() {
            return Err(Error::Search("No search API key configured".to_string()));
        }

        let key = request.cache_key();
        if let Some(cached) = self.cache.get(&key).await {
            debug!(query = %request.query, "Search served from cache");
            // Entries are shared across spellings of the same query
            let mut response = cached.as_ref().clone();
            response.query = request.query.clone();
            return Ok(response);
        }

        let url = format!("{}/search", self.config.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .bearer_auth(self.config.api_key.expose_secret())
            .json(request)
            .send()
            .await
            .map_err(|e| Error::Search(format!("Search request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Search(format!(
                "Search failed with status {}: {}",
                status, text
            )));
        }

        let mut body: SearchResponse = response
            .json()
            .await
            .map_err(|e| Error::Search(format!("Failed to parse search response: {}", e)))?;
        if body.query.is_empty() {
            body.query = request.query.clone();
        }
        body.answer = body.answer.filter(|a| !a.trim().is_empty());

        info!(query = %request.query, results = body.results.len(), "Search finished");
        self.cache.insert(key, Arc::new(body.clone())).await;
        Ok(body)
    }

    fn parse_args(&self, args: &Value) -> Result<SearchRequest> {
        let query = args
            .get("query")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| Error::InvalidInput("Missing 'query' parameter".to_string()))?;

        let max_results = args
            .get("max_results")
            .and_then(Value::as_u64)
            .map(|n| n.clamp(1, u64::from(MAX_RESULTS_LIMIT)) as u8)
            .unwrap_or(self.config.default_max_results);

        let mut request = SearchRequest::new(query, max_results);
        if let Some(range) = args.get("time_range").filter(|v| !v.is_null()) {
            request.time_range = Some(
                serde_json::from_value(range.clone())
                    .map_err(|_| Error::InvalidInput(format!("Invalid time_range: {}", range)))?,
            );
        }
        if let Some(depth) = args.get("include_answer").filter(|v| !v.is_null()) {
            request.include_answer = serde_json::from_value(depth.clone())
                .map_err(|_| Error::InvalidInput(format!("Invalid include_answer: {}", depth)))?;
        }
        request.include_favicon = args
            .get("include_favicon")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        Ok(request)
    }
}

/// Render search results as text for the LLM
pub fn format_search_response(response: &SearchResponse) -> String {
    let query = &response.query;
    if response.results.is_empty() && response.answer.is_none() {
        return format!("No results found for '{}'", query);
    }

    let mut output = vec![format!("Search: {}\n{}", query, "=".repeat(40))];

    if let Some(ref answer) = response.answer {
        output.push(format!("\nAnswer:\n{}\n", answer));
    }

    if !response.results.is_empty() {
        output.push(format!("Results ({}):", response.results.len()));
        for (i, hit) in response.results.iter().enumerate() {
            let title = if hit.title.is_empty() { "Untitled" } else { &hit.title };
            let url = if hit.url.is_empty() { "N/A" } else { &hit.url };
            output.push(format!(
                "\n{}. {}\n   {}\n   {}",
                i + 1,
                title,
                url,
                truncate_chars(&hit.content, CONTENT_PREVIEW_CHARS)
            ));
        }
    }

    output.join("\n")
}

#[async_trait]
impl Tool for TavilySearchTool {
    fn name(&self) -> &str {
        "tavily_search"
    }

    fn description(&self) -> &str {
        "Search the internet for up-to-date information: live data, news and current events."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Search keywords or question"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Number of results to return (1-10)",
                    "default": self.config.default_max_results
                },
                "time_range": {
                    "type": "string",
                    "enum": ["day", "week", "month", "year"],
                    "description": "Only return results from this period"
                },
                "include_answer": {
                    "type": "string",
                    "enum": ["basic", "advanced"],
                    "description": "Depth of the generated answer",
                    "default": "advanced"
                },
                "include_favicon": {
                    "type": "boolean",
                    "description": "Include site icons",
                    "default": false
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolResult> {
        let request = self.parse_args(&args)?;

        match self.search(&request).await {
            Ok(response) => Ok(ToolResult::success(format_search_response(&response))),
            Err(e) => {
                warn!(query = %request.query, error = %e, "Search failed");
                Ok(ToolResult::failure(format!("Search failed: {}", e)))
            }
        }
    }
}
