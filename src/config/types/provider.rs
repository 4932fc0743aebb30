//! Provider configuration types
//!
//! Configuration for the external vendors: the OpenAI-compatible LLM
//! endpoint and the web search API.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_secret() -> SecretString {
    SecretString::from(String::new())
}

/// LLM completion endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// API key
    #[serde(skip_serializing, default = "default_secret")]
    pub api_key: SecretString,
    /// Base URL (the client appends `/chat/completions`)
    #[serde(default = "default_llm_url")]
    pub base_url: String,
    /// Model name
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// Default sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Default completion token budget
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Request timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    /// Maximum retries after the first attempt
    #[serde(default = "default_retries")]
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        LlmConfig {
            api_key: default_secret(),
            base_url: default_llm_url(),
            model: default_llm_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_llm_timeout(),
            max_retries: default_retries(),
        }
    }
}

fn default_llm_url() -> String {
    "https://api.deepseek.com/v1".to_string()
}

fn default_llm_model() -> String {
    "deepseek-chat".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_llm_timeout() -> u64 {
    120
}

fn default_retries() -> u32 {
    3
}

/// Web search API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// API key; the search tool is disabled when empty
    #[serde(skip_serializing, default = "default_secret")]
    pub api_key: SecretString,
    /// Base URL (the tool appends `/search`)
    #[serde(default = "default_search_url")]
    pub base_url: String,
    /// Results returned when the caller does not ask for a count
    #[serde(default = "default_max_results")]
    pub default_max_results: u8,
    /// Request timeout in seconds
    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,
    /// How long identical searches are served from cache
    #[serde(with = "humantime_serde", default = "default_cache_ttl")]
    pub cache_ttl: Duration,
    /// Maximum cached searches
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            api_key: default_secret(),
            base_url: default_search_url(),
            default_max_results: default_max_results(),
            timeout_secs: default_search_timeout(),
            cache_ttl: default_cache_ttl(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

fn default_search_url() -> String {
    "https://api.tavily.com".to_string()
}

fn default_max_results() -> u8 {
    3
}

fn default_search_timeout() -> u64 {
    30
}

fn default_cache_ttl() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_cache_capacity() -> u64 {
    500
}
