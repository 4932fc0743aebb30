//! Session management routes

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::auth::AuthUser;
use super::error::{ApiError, ApiJson};
use super::AppState;
use crate::agent::{SessionSettings, ToolMode};
use crate::config::AgentConfig;

pub(super) const MAX_SYSTEM_PROMPT_CHARS: usize = 1000;

/// Optional overrides of [`SessionSettings`]
#[derive(Debug, Default, Deserialize)]
pub struct SettingsPatch {
    pub tool_mode: Option<ToolMode>,
    pub max_tool_calls: Option<u32>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub stream: Option<bool>,
    pub system_prompt: Option<String>,
}

impl SettingsPatch {
    pub fn validate(&self, agent: &AgentConfig) -> Result<(), ApiError> {
        validate_overrides(
            agent,
            self.max_tool_calls,
            self.temperature,
            self.max_tokens,
            self.system_prompt.as_deref(),
        )
    }

    fn apply(self, settings: &mut SessionSettings) {
        if let Some(mode) = self.tool_mode {
            settings.tool_mode = mode;
        }
        if let Some(n) = self.max_tool_calls {
            settings.max_tool_calls = n;
        }
        if let Some(t) = self.temperature {
            settings.temperature = Some(t);
        }
        if let Some(n) = self.max_tokens {
            settings.max_tokens = Some(n);
        }
        if let Some(stream) = self.stream {
            settings.stream = stream;
        }
        if let Some(prompt) = self.system_prompt {
            // An empty prompt restores the configured default
            settings.system_prompt = (!prompt.trim().is_empty()).then_some(prompt);
        }
    }
}

/// Range checks shared by session settings and chat requests
pub(super) fn validate_overrides(
    agent: &AgentConfig,
    max_tool_calls: Option<u32>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    system_prompt: Option<&str>,
) -> Result<(), ApiError> {
    if let Some(n) = max_tool_calls {
        if n == 0 || n > agent.max_tool_calls_limit {
            return Err(ApiError::validation(format!(
                "max_tool_calls must be between 1 and {}",
                agent.max_tool_calls_limit
            )));
        }
    }
    if let Some(t) = temperature {
        if !(0.0..=2.0).contains(&t) {
            return Err(ApiError::validation("temperature must be between 0 and 2"));
        }
    }
    if max_tokens == Some(0) {
        return Err(ApiError::validation("max_tokens must be at least 1"));
    }
    if let Some(prompt) = system_prompt {
        if prompt.chars().count() > MAX_SYSTEM_PROMPT_CHARS {
            return Err(ApiError::validation(format!(
                "system_prompt must be at most {} characters",
                MAX_SYSTEM_PROMPT_CHARS
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateSession {
    pub session_id: Option<String>,
    #[serde(flatten)]
    pub settings: SettingsPatch,
}

pub async fn create(
    State(state): State<AppState>,
    user: AuthUser,
    body: Option<ApiJson<CreateSession>>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let body = body.map(|ApiJson(body)| body).unwrap_or_default();
    body.settings.validate(&state.config.agent)?;

    let mut settings = state.default_settings();
    body.settings.apply(&mut settings);

    let handle = state
        .sessions
        .create(user.label(), body.session_id, settings)
        .await?;
    let info = handle.lock().await.info();

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "session": info })),
    ))
}

pub async fn list(State(state): State<AppState>, user: AuthUser) -> Json<Value> {
    let sessions = state.sessions.list(user.label()).await;
    Json(json!({
        "success": true,
        "total": sessions.len(),
        "sessions": sessions,
    }))
}

pub async fn get(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let handle = state.sessions.get(user.label(), &id).await?;
    let info = handle.lock().await.info();
    Ok(Json(json!({ "success": true, "session": info })))
}

pub async fn update(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    ApiJson(patch): ApiJson<SettingsPatch>,
) -> Result<Json<Value>, ApiError> {
    patch.validate(&state.config.agent)?;

    let handle = state.sessions.get(user.label(), &id).await?;
    let mut session = handle.lock().await;
    patch.apply(&mut session.settings);
    session.touch();

    Ok(Json(json!({ "success": true, "session": session.info() })))
}

pub async fn delete(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.sessions.delete(user.label(), &id).await?;
    Ok(Json(json!({
        "success": true,
        "message": format!("Session '{}' deleted", id),
    })))
}

pub async fn reset(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let handle = state.sessions.get(user.label(), &id).await?;
    let mut session = handle.lock().await;
    session.reset();

    Ok(Json(json!({
        "success": true,
        "message": format!("Session '{}' history cleared", id),
        "session": session.info(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    limit: Option<usize>,
    #[serde(default)]
    raw: bool,
}

pub async fn history(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Value>, ApiError> {
    let handle = state.sessions.get(user.label(), &id).await?;
    let session = handle.lock().await;

    let messages = if query.raw {
        serde_json::to_value(session.history(query.limit))
    } else {
        serde_json::to_value(
            session.summarized_history(query.limit, state.config.session.history_preview_chars),
        )
    }
    .map_err(crate::error::Error::from)?;

    let returned = messages.as_array().map_or(0, Vec::len);
    Ok(Json(json!({
        "success": true,
        "session_id": session.id,
        "total_messages": session.messages.len(),
        "returned": returned,
        "messages": messages,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent() -> AgentConfig {
        AgentConfig::default()
    }

    #[test]
    fn patch_applies_only_given_fields() {
        let mut settings = SessionSettings::with_max_tool_calls(5);
        SettingsPatch {
            tool_mode: Some(ToolMode::Never),
            temperature: Some(0.2),
            ..Default::default()
        }
        .apply(&mut settings);

        assert_eq!(settings.tool_mode, ToolMode::Never);
        assert_eq!(settings.temperature, Some(0.2));
        assert_eq!(settings.max_tool_calls, 5);
        assert!(!settings.stream);
    }

    #[test]
    fn empty_system_prompt_clears_override() {
        let mut settings = SessionSettings::with_max_tool_calls(5);
        settings.system_prompt = Some("Be brief".to_string());
        SettingsPatch {
            system_prompt: Some("  ".to_string()),
            ..Default::default()
        }
        .apply(&mut settings);
        assert_eq!(settings.system_prompt, None);
    }

    #[test]
    fn rejects_out_of_range_overrides() {
        let agent = agent();
        let limit = agent.max_tool_calls_limit;

        assert!(validate_overrides(&agent, Some(limit), Some(2.0), Some(1), None).is_ok());
        assert!(validate_overrides(&agent, Some(0), None, None, None).is_err());
        assert!(validate_overrides(&agent, Some(limit + 1), None, None, None).is_err());
        assert!(validate_overrides(&agent, None, Some(2.5), None, None).is_err());
        assert!(validate_overrides(&agent, None, None, Some(0), None).is_err());

        let long = "x".repeat(MAX_SYSTEM_PROMPT_CHARS + 1);
        let err = validate_overrides(&agent, None, None, None, Some(&long)).unwrap_err();
        assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);
    }
}
