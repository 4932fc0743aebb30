//! Session and history bookkeeping
//!
//! A session groups the messages of one conversation under a caller-chosen
//! or generated id. Sessions live in memory only and belong to the user
//! label of the bearer token that created them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use crate::agent::types::{Message, Role, ToolChoice, Usage};
use crate::error::{Error, Result};

const MAX_SESSION_ID_LEN: usize = 128;

/// When the model is offered the search tools
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolMode {
    /// Tools are never offered
    Never,
    /// The model decides
    #[default]
    Auto,
    /// The first round must call a tool
    Always,
}

impl ToolMode {
    /// Tool choice for a round, `None` when tools are not offered at all
    pub fn tool_choice(self, round: u32) -> Option<ToolChoice> {
        match self {
            ToolMode::Never => None,
            ToolMode::Auto => Some(ToolChoice::Auto),
            ToolMode::Always if round == 0 => Some(ToolChoice::Required),
            ToolMode::Always => Some(ToolChoice::Auto),
        }
    }
}

/// Per-session defaults applied to every turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Tool offering policy
    pub tool_mode: ToolMode,
    /// Tool rounds allowed per turn
    pub max_tool_calls: u32,
    /// Sampling temperature override
    pub temperature: Option<f32>,
    /// Completion token budget override
    pub max_tokens: Option<u32>,
    /// Stream answers when the request does not say
    pub stream: bool,
    /// System prompt override
    pub system_prompt: Option<String>,
}

impl SessionSettings {
    /// Settings with the configured tool-round default
    pub fn with_max_tool_calls(max_tool_calls: u32) -> Self {
        SessionSettings {
            tool_mode: ToolMode::Auto,
            max_tool_calls,
            temperature: None,
            max_tokens: None,
            stream: false,
            system_prompt: None,
        }
    }
}

/// A conversation session
#[derive(Debug, Clone)]
pub struct Session {
    /// Session id
    pub id: String,
    /// User label of the creating token
    pub owner: String,
    /// Turn defaults
    pub settings: SessionSettings,
    /// Ordered conversation log
    pub messages: Vec<Message>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last time a message was added or settings changed
    pub last_activity: DateTime<Utc>,
    /// User turns since creation or the last reset
    pub message_count: u64,
    /// Tool rounds since creation or the last reset
    pub tool_calls_total: u64,
    /// Token usage since creation or the last reset
    pub usage: Usage,
}

impl Session {
    /// Create an empty session
    pub fn new(id: impl Into<String>, owner: impl Into<String>, settings: SessionSettings) -> Self {
        let now = Utc::now();
        Session {
            id: id.into(),
            owner: owner.into(),
            settings,
            messages: Vec::new(),
            created_at: now,
            last_activity: now,
            message_count: 0,
            tool_calls_total: 0,
            usage: Usage::default(),
        }
    }

    /// Append a message
    pub fn push(&mut self, message: Message) {
        if message.role == Role::User {
            self.message_count += 1;
        }
        self.messages.push(message);
        self.touch();
    }

    /// Record the bookkeeping of a finished turn
    pub fn record_turn(&mut self, tool_rounds: u32, usage: Option<&Usage>) {
        self.tool_calls_total += u64::from(tool_rounds);
        if let Some(usage) = usage {
            self.usage.accumulate(usage);
        }
        self.touch();
    }

    /// Mark the session as active
    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    /// Whether no message was recorded yet
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Drop the conversation log and counters, keeping the settings
    pub fn reset(&mut self) {
        self.messages.clear();
        self.message_count = 0;
        self.tool_calls_total = 0;
        self.usage = Usage::default();
        self.touch();
    }

    /// The last `limit` messages, or all of them
    pub fn history(&self, limit: Option<usize>) -> &[Message] {
        let start = limit.map_or(0, |n| self.messages.len().saturating_sub(n));
        &self.messages[start..]
    }

    /// History for display: tool payloads are summarised and long
    /// content is cut to `preview_chars`
    pub fn summarized_history(&self, limit: Option<usize>, preview_chars: usize) -> Vec<HistoryEntry> {
        self.history(limit)
            .iter()
            .map(|message| HistoryEntry::summarize(message, preview_chars))
            .collect()
    }

    /// Public snapshot of the session
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            session_id: self.id.clone(),
            created_at: self.created_at,
            last_activity: self.last_activity,
            message_count: self.message_count,
            history_length: self.messages.len(),
            tool_calls_total: self.tool_calls_total,
            usage: self.usage,
            settings: self.settings.clone(),
        }
    }
}

/// A summarised history entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    /// Message role
    pub role: Role,
    /// Display content
    pub content: String,
    /// Whether `content` was cut
    pub truncated: bool,
    /// Number of tool calls on assistant tool-call messages
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<usize>,
}

impl HistoryEntry {
    fn summarize(message: &Message, preview_chars: usize) -> Self {
        if message.role == Role::Tool {
            return HistoryEntry {
                role: message.role,
                content: "<search results>".to_string(),
                truncated: false,
                tool_calls: None,
            };
        }

        if message.has_tool_calls() && message.text().trim().is_empty() {
            return HistoryEntry {
                role: message.role,
                content: "<tool call>".to_string(),
                truncated: false,
                tool_calls: message.tool_calls.as_ref().map(Vec::len),
            };
        }

        let text = message.text();
        let truncated = text.chars().count() > preview_chars;
        let content = if truncated {
            let mut cut: String = text.chars().take(preview_chars).collect();
            cut.push_str("...");
            cut
        } else {
            text.to_string()
        };

        HistoryEntry {
            role: message.role,
            content,
            truncated,
            tool_calls: message.tool_calls.as_ref().map(Vec::len),
        }
    }
}

/// Snapshot returned by the session routes
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    /// Session id
    pub session_id: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last activity
    pub last_activity: DateTime<Utc>,
    /// User turns
    pub message_count: u64,
    /// Stored messages including system and tool messages
    pub history_length: usize,
    /// Tool rounds
    pub tool_calls_total: u64,
    /// Token usage
    pub usage: Usage,
    /// Turn defaults
    pub settings: SessionSettings,
}

struct Entry {
    owner: String,
    session: Arc<Mutex<Session>>,
}

/// Shared session handle; turns on one session are serialised by its lock
pub type SessionHandle = Arc<Mutex<Session>>;

/// In-memory session store
#[derive(Default)]
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Entry>>,
}

impl SessionManager {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session, generating a UUID v4 id when none is given
    pub async fn create(
        &self,
        owner: &str,
        id: Option<String>,
        settings: SessionSettings,
    ) -> Result<SessionHandle> {
        let id = match id {
            Some(id) => {
                validate_session_id(&id)?;
                id
            }
            None => Uuid::new_v4().to_string(),
        };

        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&id) {
            return Err(Error::Conflict(format!("Session '{}' already exists", id)));
        }

        let handle = Self::insert(&mut sessions, owner, id, settings);
        Ok(handle)
    }

    /// Look up a session owned by `owner`
    ///
    /// Sessions of other users are reported as missing.
    pub async fn get(&self, owner: &str, id: &str) -> Result<SessionHandle> {
        let sessions = self.sessions.read().await;
        match sessions.get(id) {
            Some(entry) if entry.owner == owner => Ok(entry.session.clone()),
            _ => Err(not_found(id)),
        }
    }

    /// Look up a session, creating it for `owner` when the id is unused
    ///
    /// Returns the handle and whether it was created.
    pub async fn get_or_create(
        &self,
        owner: &str,
        id: &str,
        defaults: SessionSettings,
    ) -> Result<(SessionHandle, bool)> {
        validate_session_id(id)?;

        let mut sessions = self.sessions.write().await;
        if let Some(entry) = sessions.get(id) {
            return if entry.owner == owner {
                Ok((entry.session.clone(), false))
            } else {
                Err(not_found(id))
            };
        }

        let handle = Self::insert(&mut sessions, owner, id.to_string(), defaults);
        Ok((handle, true))
    }

    fn insert(
        sessions: &mut HashMap<String, Entry>,
        owner: &str,
        id: String,
        settings: SessionSettings,
    ) -> SessionHandle {
        let session = Arc::new(Mutex::new(Session::new(id.clone(), owner, settings)));
        info!(session_id = %id, owner, "Session created");
        sessions.insert(
            id,
            Entry {
                owner: owner.to_string(),
                session: session.clone(),
            },
        );
        session
    }

    /// Snapshots of every session owned by `owner`, oldest first
    pub async fn list(&self, owner: &str) -> Vec<SessionInfo> {
        let handles: Vec<SessionHandle> = {
            let sessions = self.sessions.read().await;
            sessions
                .values()
                .filter(|entry| entry.owner == owner)
                .map(|entry| entry.session.clone())
                .collect()
        };

        let mut infos = Vec::with_capacity(handles.len());
        for handle in handles {
            infos.push(handle.lock().await.info());
        }
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        infos
    }

    /// Remove a session owned by `owner`
    pub async fn delete(&self, owner: &str, id: &str) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        match sessions.get(id) {
            Some(entry) if entry.owner == owner => {
                sessions.remove(id);
                info!(session_id = %id, owner, "Session deleted");
                Ok(())
            }
            _ => Err(not_found(id)),
        }
    }

    /// Drop sessions idle for longer than `ttl`
    ///
    /// Sessions with a turn in progress are never evicted.
    pub async fn evict_idle(&self, ttl: Duration) -> usize {
        let Some(cutoff) = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_sub_signed(ttl))
        else {
            return 0;
        };

        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|id, entry| match entry.session.try_lock() {
            Ok(session) => {
                let keep = session.last_activity >= cutoff;
                if !keep {
                    debug!(session_id = %id, "Evicting idle session");
                }
                keep
            }
            Err(_) => true,
        });
        before - sessions.len()
    }

    /// Number of stored sessions
    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

fn not_found(id: &str) -> Error {
    Error::NotFound(format!("Session '{}' not found", id))
}

fn validate_session_id(id: &str) -> Result<()> {
    if id.is_empty() || id.len() > MAX_SESSION_ID_LEN {
        return Err(Error::InvalidInput(format!(
            "Session id must be 1 to {} characters",
            MAX_SESSION_ID_LEN
        )));
    }
    if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.') {
        return Err(Error::InvalidInput(
            "Session id may only contain letters, digits, '-', '_' and '.'".to_string(),
        ));
    }
    Ok(())
}
