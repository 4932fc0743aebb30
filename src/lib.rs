//! # searchagent
//!
//! A thin HTTP service that answers chat messages with an LLM and, when the
//! model asks for it, with live web search.
//!
//! ## Features
//!
//! - **LLM relay:** any OpenAI-compatible chat-completions endpoint (DeepSeek by default)
//! - **Web search tool:** Tavily search offered to the model through function calling
//! - **Sessions:** in-memory per-session conversation history
//! - **Streaming:** answers as JSON or as Server-Sent Events
//! - **Bearer auth:** static token table with per-user rate limiting

pub mod agent;
pub mod config;
pub mod error;
pub mod server;
pub mod tools;

pub use config::Config;
pub use error::{Error, Result};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const NAME: &str = env!("CARGO_PKG_NAME");
