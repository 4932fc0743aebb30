//! Configuration validation
//!
//! Validates configuration and reports issues.

use secrecy::ExposeSecret;

use super::types::Config;

/// Result of configuration validation
#[derive(Debug, Clone)]
pub struct ConfigValidationResult {
    /// Whether the config is valid
    pub valid: bool,
    /// Validation errors (critical)
    pub errors: Vec<ValidationIssue>,
    /// Validation warnings (non-critical)
    pub warnings: Vec<ValidationIssue>,
}

impl ConfigValidationResult {
    /// Create a valid result
    pub fn valid() -> Self {
        ConfigValidationResult {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Add an error
    pub fn with_error(mut self, issue: ValidationIssue) -> Self {
        self.valid = false;
        self.errors.push(issue);
        self
    }

    /// Add a warning
    pub fn with_warning(mut self, issue: ValidationIssue) -> Self {
        self.warnings.push(issue);
        self
    }
}

/// A validation issue
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Path to the config field
    pub path: String,
    /// Issue message
    pub message: String,
    /// Suggested fix
    pub suggestion: Option<String>,
}

impl ValidationIssue {
    /// Create a new issue
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        ValidationIssue {
            path: path.into(),
            message: message.into(),
            suggestion: None,
        }
    }

    /// Add a suggestion
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)?;
        if let Some(ref suggestion) = self.suggestion {
            write!(f, " ({})", suggestion)?;
        }
        Ok(())
    }
}

/// Validate the configuration
pub fn validate_config(config: &Config) -> ConfigValidationResult {
    let mut result = ConfigValidationResult::valid();

    result = validate_llm_config(config, result);
    result = validate_search_config(config, result);
    result = validate_auth_config(config, result);
    result = validate_agent_config(config, result);
    result = validate_server_config(config, result);
    result = validate_session_config(config, result);

    result
}

fn validate_llm_config(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    if config.llm.api_key.expose_secret().is_empty() {
        result = result.with_error(
            ValidationIssue::new("llm.api_key", "No LLM API key configured")
                .with_suggestion("Set DEEPSEEK_API_KEY or LLM_API_KEY"),
        );
    }

    if url::Url::parse(&config.llm.base_url).is_err() {
        result = result.with_error(ValidationIssue::new(
            "llm.base_url",
            format!("Invalid URL: {}", config.llm.base_url),
        ));
    }

    if !(0.0..=2.0).contains(&config.llm.temperature) {
        result = result.with_error(ValidationIssue::new(
            "llm.temperature",
            format!("Temperature {} is outside 0.0..=2.0", config.llm.temperature),
        ));
    }

    if config.llm.max_tokens == 0 {
        result = result.with_error(ValidationIssue::new("llm.max_tokens", "Must be positive"));
    }

    result
}

fn validate_search_config(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    if config.search.api_key.expose_secret().is_empty() {
        result = result.with_warning(
            ValidationIssue::new(
                "search.api_key",
                "No search API key configured. The web search tool is disabled.",
            )
            .with_suggestion("Set TAVILY_API_KEY"),
        );
    }

    if url::Url::parse(&config.search.base_url).is_err() {
        result = result.with_error(ValidationIssue::new(
            "search.base_url",
            format!("Invalid URL: {}", config.search.base_url),
        ));
    }

    if !(1..=10).contains(&config.search.default_max_results) {
        result = result.with_error(ValidationIssue::new(
            "search.default_max_results",
            "Must be between 1 and 10",
        ));
    }

    result
}

fn validate_auth_config(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    if config.auth.keys.is_empty() {
        result = result.with_error(
            ValidationIssue::new("auth.keys", "No API keys configured; every request would be rejected")
                .with_suggestion("Set API_KEYS=token:user,..."),
        );
    }

    if config.auth.keys.keys().any(|token| token.starts_with("sk-test-key") || token == "sk-admin-key") {
        result = result.with_warning(ValidationIssue::new(
            "auth.keys",
            "Built-in development API keys are active",
        ));
    }

    result
}

fn validate_agent_config(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    let agent = &config.agent;

    if agent.max_tool_calls_limit == 0 {
        result = result.with_error(ValidationIssue::new(
            "agent.max_tool_calls_limit",
            "Must be positive",
        ));
    } else if agent.default_max_tool_calls == 0 || agent.default_max_tool_calls > agent.max_tool_calls_limit {
        result = result.with_error(ValidationIssue::new(
            "agent.default_max_tool_calls",
            format!(
                "Must be between 1 and max_tool_calls_limit ({})",
                agent.max_tool_calls_limit
            ),
        ));
    }

    if let Some(prompt) = &agent.system_prompt {
        if let Err(e) = crate::agent::PromptTemplate::new("system", prompt) {
            result = result.with_error(ValidationIssue::new("agent.system_prompt", e.to_string()));
        }
    }

    if agent.loop_guard_threshold < 2 {
        result = result.with_warning(ValidationIssue::new(
            "agent.loop_guard_threshold",
            "Values below 2 flag every repeated search",
        ));
    }

    result
}

fn validate_server_config(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    if config.server.max_requests_per_minute == 0 {
        result = result.with_error(ValidationIssue::new(
            "server.max_requests_per_minute",
            "Must be positive",
        ));
    }

    if config.server.cors_origins.iter().any(|o| o == "*") {
        result = result.with_warning(ValidationIssue::new(
            "server.cors_origins",
            "CORS allows any origin",
        ));
    }

    result
}

fn validate_session_config(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    if config.session.sweep_interval.is_zero() {
        result = result.with_error(ValidationIssue::new(
            "session.sweep_interval",
            "Must be positive",
        ));
    }

    if config.session.idle_ttl < config.session.sweep_interval {
        result = result.with_warning(ValidationIssue::new(
            "session.idle_ttl",
            "Shorter than the sweep interval; sessions outlive their TTL",
        ));
    }

    result
}
