//! Agent module - LLM relay, sessions and the tool-call loop
//!
//! This module handles the AI-facing side of the service:
//! - Chat completion client for OpenAI-compatible endpoints
//! - Streamed completion decoding
//! - Session and history bookkeeping
//! - The tool-call-then-answer orchestration loop
//! - Prompt templates

pub mod client;
pub mod loop_guard;
pub mod orchestrator;
pub mod prompts;
pub mod session;
pub mod stream;
pub mod types;

pub use client::{Completion, CompletionDelta, CompletionRequest, CompletionStream, LlmClient, LlmProvider};
pub use loop_guard::LoopGuard;
pub use orchestrator::{AgentEvent, NoopObserver, Orchestrator, TurnFinish, TurnObserver, TurnOptions, TurnOutcome};
pub use prompts::PromptTemplate;
pub use session::{HistoryEntry, Session, SessionHandle, SessionInfo, SessionManager, SessionSettings, ToolMode};
pub use types::*;
