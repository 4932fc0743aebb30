//! HTTP server and authentication configuration types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_host")]
    pub host: String,
    /// Port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Allowed CORS origins ("*" allows any)
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
    /// Per-user request budget
    #[serde(default = "default_rate_limit")]
    pub max_requests_per_minute: u32,
    /// Upper bound for non-streaming requests
    #[serde(with = "humantime_serde", default = "default_request_timeout")]
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: default_host(),
            port: default_port(),
            cors_origins: default_cors_origins(),
            max_requests_per_minute: default_rate_limit(),
            request_timeout: default_request_timeout(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_rate_limit() -> u32 {
    100
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(120)
}

/// Static bearer-token table
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Bearer token → user label
    #[serde(skip_serializing, default = "default_keys")]
    pub keys: HashMap<String, String>,
}

impl AuthConfig {
    /// Resolve a bearer token to its user label
    pub fn user_for(&self, token: &str) -> Option<&str> {
        self.keys.get(token).map(String::as_str)
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        AuthConfig {
            keys: default_keys(),
        }
    }
}

// Tokens are secrets; only the labels are printed.
impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut users: Vec<&String> = self.keys.values().collect();
        users.sort();
        f.debug_struct("AuthConfig").field("users", &users).finish()
    }
}

fn default_keys() -> HashMap<String, String> {
    HashMap::from([
        ("sk-test-key-1".to_string(), "user1".to_string()),
        ("sk-test-key-2".to_string(), "user2".to_string()),
        ("sk-admin-key".to_string(), "admin".to_string()),
    ])
}
