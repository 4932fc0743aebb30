//! Configuration I/O - Loading configuration
//!
//! Handles reading configuration from files and environment variables.

use std::path::Path;
use std::str::FromStr;

use secrecy::SecretString;

use super::types::Config;
use crate::error::{Error, Result};

/// Load configuration with layered precedence:
/// 1. Config file (config.json / config.toml) if it exists, otherwise defaults
/// 2. Environment variable overrides (includes .env)
pub fn load_config() -> Result<Config> {
    let config_path = super::paths::config_path();

    let mut config = if config_path.exists() {
        load_config_from_path(&config_path)?
    } else {
        Config::default()
    };

    apply_env_overrides(&mut config);

    Ok(config)
}

/// Load configuration from a specific path
pub fn load_config_from_path(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;

    let config: Config = if path.extension().is_some_and(|ext| ext == "json" || ext == "json5") {
        json5::from_str(&content).map_err(|e| Error::Config(format!("Invalid JSON config: {}", e)))?
    } else if path.extension().is_some_and(|ext| ext == "toml") {
        toml::from_str(&content).map_err(|e| Error::Config(format!("Invalid TOML config: {}", e)))?
    } else {
        // Try JSON5 first, then TOML
        json5::from_str(&content)
            .or_else(|_| toml::from_str(&content).map_err(|e| Error::Config(e.to_string())))
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?
    };

    Ok(config)
}

/// Apply environment variable overrides to an existing config.
///
/// Loads a `.env` file first, then overlays any set environment variables.
/// Env vars have the highest precedence: defaults < file < env.
pub fn apply_env_overrides(config: &mut Config) {
    dotenvy::dotenv().ok();
    apply_overrides_from(config, |key| std::env::var(key).ok());
}

/// Apply overrides from an arbitrary variable source
pub(crate) fn apply_overrides_from<F>(config: &mut Config, var: F)
where
    F: Fn(&str) -> Option<String>,
{
    // Server
    if let Some(host) = var("SERVICE_HOST") {
        config.server.host = host;
    }
    set_parsed(&var, "SERVICE_PORT", &mut config.server.port);
    if let Some(origins) = var("CORS_ORIGINS") {
        config.server.cors_origins = split_list(&origins);
    }
    set_parsed(
        &var,
        "MAX_REQUESTS_PER_MINUTE",
        &mut config.server.max_requests_per_minute,
    );

    // Auth: a full table replaces the defaults, the numbered keys add to it
    if let Some(table) = var("API_KEYS") {
        config.auth.keys = split_list(&table)
            .into_iter()
            .filter_map(|entry| {
                let (token, user) = entry.split_once(':')?;
                Some((token.trim().to_string(), user.trim().to_string()))
            })
            .filter(|(token, user)| !token.is_empty() && !user.is_empty())
            .collect();
    }
    for (key, user) in [
        ("API_KEY_1", "user1"),
        ("API_KEY_2", "user2"),
        ("API_KEY_ADMIN", "admin"),
    ] {
        if let Some(token) = var(key) {
            config.auth.keys.retain(|_, label| label != user);
            config.auth.keys.insert(token, user.to_string());
        }
    }

    // LLM
    if let Some(api_key) = var("LLM_API_KEY").or_else(|| var("DEEPSEEK_API_KEY")) {
        config.llm.api_key = SecretString::from(api_key);
    }
    if let Some(url) = var("LLM_BASE_URL").or_else(|| var("DEEPSEEK_BASE_URL")) {
        config.llm.base_url = url;
    }
    if let Some(model) = var("LLM_MODEL").or_else(|| var("DEEPSEEK_MODEL")) {
        config.llm.model = model;
    }
    set_parsed(&var, "DEEPSEEK_TEMPERATURE", &mut config.llm.temperature);
    set_parsed(&var, "DEEPSEEK_MAX_TOKENS", &mut config.llm.max_tokens);
    set_parsed(&var, "LLM_TIMEOUT", &mut config.llm.timeout_secs);
    set_parsed(&var, "LLM_MAX_RETRIES", &mut config.llm.max_retries);

    // Search
    if let Some(api_key) = var("TAVILY_API_KEY") {
        config.search.api_key = SecretString::from(api_key);
    }
    if let Some(url) = var("TAVILY_BASE_URL") {
        config.search.base_url = url;
    }
    set_parsed(
        &var,
        "SEARCH_MAX_RESULTS",
        &mut config.search.default_max_results,
    );

    // Agent
    set_parsed(
        &var,
        "MAX_TOOL_CALLS",
        &mut config.agent.default_max_tool_calls,
    );
    if let Some(prompt) = var("SYSTEM_PROMPT") {
        config.agent.system_prompt = Some(prompt);
    }

    // Sessions
    if let Some(ttl) = var("SESSION_IDLE_TTL") {
        if let Ok(v) = humantime_serde::re::humantime::parse_duration(&ttl) {
            config.session.idle_ttl = v;
        }
    }

    // Logging
    if let Some(level) = var("LOG_LEVEL").or_else(|| var("RUST_LOG")) {
        config.log.level = level;
    }
    if let Some(format) = var("LOG_FORMAT") {
        config.log.format = format;
    }
}

fn set_parsed<F, T>(var: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(v) = var(key).and_then(|raw| raw.trim().parse().ok()) {
        *target = v;
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
