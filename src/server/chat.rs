//! Chat routes: JSON answers and SSE streams

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info};
use uuid::Uuid;

use super::auth::AuthUser;
use super::error::{ApiError, ApiJson};
use super::sessions::validate_overrides;
use super::AppState;
use crate::agent::{
    AgentEvent, NoopObserver, Session, SessionHandle, SessionSettings, ToolMode, TurnFinish,
    TurnObserver, TurnOptions, Usage,
};
use crate::config::AgentConfig;
use crate::error::Error;

const MAX_MESSAGE_CHARS: usize = 2000;
const EVENT_BUFFER: usize = 64;
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    message: String,
    session_id: Option<String>,
    stream: Option<bool>,
    max_tool_calls: Option<u32>,
    tool_mode: Option<ToolMode>,
    system_prompt: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl ChatRequest {
    fn validate(&self, agent: &AgentConfig) -> Result<(), ApiError> {
        let chars = self.message.trim().chars().count();
        if chars == 0 || chars > MAX_MESSAGE_CHARS {
            return Err(ApiError::validation(format!(
                "message must be between 1 and {} characters",
                MAX_MESSAGE_CHARS
            )));
        }
        validate_overrides(
            agent,
            self.max_tool_calls,
            self.temperature,
            self.max_tokens,
            self.system_prompt.as_deref(),
        )
    }

    /// Session defaults with this request's overrides on top
    fn turn_options(&self, settings: &SessionSettings, agent: &AgentConfig) -> TurnOptions {
        let mut options = TurnOptions::from_settings(settings);
        options.max_tool_calls = self
            .max_tool_calls
            .unwrap_or(options.max_tool_calls)
            .clamp(1, agent.max_tool_calls_limit.max(1));
        if let Some(mode) = self.tool_mode {
            options.tool_mode = mode;
        }
        if let Some(prompt) = self.system_prompt.as_ref().filter(|p| !p.trim().is_empty()) {
            options.system_prompt = Some(prompt.clone());
        }
        if self.temperature.is_some() {
            options.options.temperature = self.temperature;
        }
        if self.max_tokens.is_some() {
            options.options.max_tokens = self.max_tokens;
        }
        if let Some(stream) = self.stream {
            options.stream = stream;
        }
        options
    }
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    success: bool,
    /// `None` for one-shot turns
    session_id: Option<String>,
    message: String,
    tool_calls_count: u32,
    finish: TurnFinish,
    response_time: f64,
    timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    usage: Option<Usage>,
}

/// Session a turn runs in
struct TurnTarget {
    handle: SessionHandle,
    id: String,
    created: bool,
    persistent: bool,
}

pub async fn chat(
    State(state): State<AppState>,
    user: AuthUser,
    ApiJson(request): ApiJson<ChatRequest>,
) -> Result<Response, ApiError> {
    handle_chat(state, user, request, false).await
}

pub async fn chat_stream(
    State(state): State<AppState>,
    user: AuthUser,
    ApiJson(request): ApiJson<ChatRequest>,
) -> Result<Response, ApiError> {
    handle_chat(state, user, request, true).await
}

async fn handle_chat(
    state: AppState,
    user: AuthUser,
    request: ChatRequest,
    force_stream: bool,
) -> Result<Response, ApiError> {
    request.validate(&state.config.agent)?;

    let target = resolve_session(&state, &user, request.session_id.as_deref()).await?;
    // Waits for any turn already running in this session
    let settings = target.handle.lock().await.settings.clone();

    let mut options = request.turn_options(&settings, &state.config.agent);
    options.stream |= force_stream;

    info!(
        user = %user.label(),
        session_id = %target.id,
        stream = options.stream,
        max_tool_calls = options.max_tool_calls,
        "Chat request"
    );

    let message = request.message.trim().to_string();
    if options.stream {
        Ok(stream_turn(state, target, message, options).into_response())
    } else {
        Ok(json_turn(state, target, message, options).await?.into_response())
    }
}

async fn resolve_session(
    state: &AppState,
    user: &AuthUser,
    session_id: Option<&str>,
) -> Result<TurnTarget, ApiError> {
    match session_id {
        Some(id) => {
            let (handle, created) = state
                .sessions
                .get_or_create(user.label(), id, state.default_settings())
                .await?;
            Ok(TurnTarget {
                handle,
                id: id.to_string(),
                created,
                persistent: true,
            })
        }
        None => {
            let id = Uuid::new_v4().to_string();
            let session = Session::new(id.clone(), user.label(), state.default_settings());
            Ok(TurnTarget {
                handle: Arc::new(Mutex::new(session)),
                id,
                created: true,
                persistent: false,
            })
        }
    }
}

async fn json_turn(
    state: AppState,
    target: TurnTarget,
    message: String,
    options: TurnOptions,
) -> Result<Json<ChatResponse>, ApiError> {
    // The turn runs on its own task so a timed-out or dropped request
    // cannot leave a tool round half written into the session
    let orchestrator = state.orchestrator.clone();
    let handle = target.handle.clone();
    let turn = tokio::spawn(async move {
        let mut session = handle.lock().await;
        orchestrator
            .run_turn(&mut session, &message, &options, &NoopObserver)
            .await
    });
    let outcome = turn
        .await
        .map_err(|e| Error::Internal(format!("Turn task failed: {}", e)))??;

    Ok(Json(ChatResponse {
        success: true,
        session_id: target.persistent.then_some(target.id),
        message: outcome.content,
        tool_calls_count: outcome.tool_calls_count,
        finish: outcome.finish,
        response_time: outcome.response_time,
        timestamp: chrono::Utc::now().to_rfc3339(),
        usage: outcome.usage,
    }))
}

/// Run the turn on a task and forward its events as SSE
///
/// The turn finishes even if the client disconnects.
fn stream_turn(
    state: AppState,
    target: TurnTarget,
    message: String,
    options: TurnOptions,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel::<AgentEvent>(EVENT_BUFFER);

    tokio::spawn(async move {
        tx.on_event(AgentEvent::Session {
            session_id: target.id.clone(),
            created: target.created,
        })
        .await;

        let mut session = target.handle.lock().await;
        if let Err(e) = state
            .orchestrator
            .run_turn(&mut session, &message, &options, &tx)
            .await
        {
            error!(session_id = %target.id, error = %e, "Streaming turn failed");
            let err = ApiError::from(e);
            tx.on_event(AgentEvent::Error {
                message: err.message,
                status_code: err.status.as_u16(),
            })
            .await;
        }
    });

    let events = ReceiverStream::new(rx).map(|event| Ok(sse_event(&event)));
    Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("keep-alive"),
    )
}

fn sse_event(event: &AgentEvent) -> Event {
    Event::default()
        .event(event.event_type())
        .json_data(event)
        .unwrap_or_else(|e| Event::default().event("error").data(e.to_string()))
}
