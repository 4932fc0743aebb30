//! Core configuration types

pub mod provider;
pub mod server;

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use provider::{LlmConfig, SearchConfig};
pub use server::{AuthConfig, ServerConfig};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP listener settings
    #[serde(default)]
    pub server: ServerConfig,
    /// Bearer-token table
    #[serde(default)]
    pub auth: AuthConfig,
    /// LLM endpoint settings
    #[serde(default)]
    pub llm: LlmConfig,
    /// Web search settings
    #[serde(default)]
    pub search: SearchConfig,
    /// Orchestration settings
    #[serde(default)]
    pub agent: AgentConfig,
    /// Session bookkeeping
    #[serde(default)]
    pub session: SessionConfig,
    /// Logging
    #[serde(default)]
    pub log: LogConfig,
}

/// Tool-call loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Tool rounds allowed per turn when the request does not say
    #[serde(default = "default_max_tool_calls")]
    pub default_max_tool_calls: u32,
    /// Hard ceiling a request may ask for
    #[serde(default = "default_max_tool_calls_limit")]
    pub max_tool_calls_limit: u32,
    /// Replaces the built-in system prompt
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Identical tool results in a row before the model is told to stop
    #[serde(default = "default_loop_guard_threshold")]
    pub loop_guard_threshold: usize,
    /// Length of tool results echoed in stream events
    #[serde(default = "default_preview_chars")]
    pub tool_result_preview_chars: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            default_max_tool_calls: default_max_tool_calls(),
            max_tool_calls_limit: default_max_tool_calls_limit(),
            system_prompt: None,
            loop_guard_threshold: default_loop_guard_threshold(),
            tool_result_preview_chars: default_preview_chars(),
        }
    }
}

fn default_max_tool_calls() -> u32 {
    5
}

fn default_max_tool_calls_limit() -> u32 {
    10
}

fn default_loop_guard_threshold() -> usize {
    3
}

fn default_preview_chars() -> usize {
    500
}

/// Session store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Sessions idle longer than this are dropped
    #[serde(with = "humantime_serde", default = "default_idle_ttl")]
    pub idle_ttl: Duration,
    /// How often idle sessions are swept
    #[serde(with = "humantime_serde", default = "default_sweep_interval")]
    pub sweep_interval: Duration,
    /// Content length kept per message in summarized history
    #[serde(default = "default_preview_chars")]
    pub history_preview_chars: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            idle_ttl: default_idle_ttl(),
            sweep_interval: default_sweep_interval(),
            history_preview_chars: default_preview_chars(),
        }
    }
}

fn default_idle_ttl() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(60)
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level filter
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (pretty, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info,searchagent=debug".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}
