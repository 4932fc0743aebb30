//! HTTP API
//!
//! Axum router exposing chat, session management and direct search. All
//! routes except `/` and `/health` require a bearer token.

pub mod auth;
mod chat;
pub mod error;
mod meta;
pub mod rate_limit;
mod search;
mod sessions;
#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Instant;

use axum::{
    error_handling::HandleErrorLayer,
    http::{HeaderValue, StatusCode},
    middleware,
    routing::{get, post},
    BoxError, Router,
};
use tower::{timeout::TimeoutLayer, ServiceBuilder};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

use crate::agent::{LlmProvider, Orchestrator, SessionManager, SessionSettings};
use crate::config::Config;
use crate::error::Result;
use crate::tools::{TavilySearchTool, TerminateTool, ToolRegistry};

pub use auth::AuthUser;
pub use error::ApiError;
pub use rate_limit::{create_user_rate_limiter, UserRateLimiter};

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    /// Loaded configuration
    pub config: Arc<Config>,
    /// In-memory session store
    pub sessions: Arc<SessionManager>,
    /// Turn runner holding the LLM client and the tool registry
    pub orchestrator: Orchestrator,
    /// Search client for `/search`, when an API key is configured
    pub search: Option<Arc<TavilySearchTool>>,
    /// Per-user request limiter
    pub limiter: UserRateLimiter,
    /// Process start, for uptime reporting
    pub started_at: Instant,
}

impl AppState {
    /// Build the state around an LLM provider
    ///
    /// The search tool is registered only when the search API key is set;
    /// `terminate` is always offered.
    pub fn new(config: Config, llm: Arc<dyn LlmProvider>) -> Result<Self> {
        let tavily = TavilySearchTool::new(config.search.clone())?;
        let search = if tavily.is_configured() {
            Some(Arc::new(tavily))
        } else {
            warn!("Search API key not set; web search is disabled");
            None
        };

        let mut tools = ToolRegistry::new();
        if let Some(search) = &search {
            tools.register_shared(search.clone());
        }
        tools.register(TerminateTool);

        let orchestrator = Orchestrator::new(llm, tools, config.agent.clone());
        let limiter = create_user_rate_limiter(config.server.max_requests_per_minute);

        Ok(AppState {
            config: Arc::new(config),
            sessions: Arc::new(SessionManager::new()),
            orchestrator,
            search,
            limiter,
            started_at: Instant::now(),
        })
    }

    /// Settings given to sessions created without explicit overrides
    pub fn default_settings(&self) -> SessionSettings {
        SessionSettings::with_max_tool_calls(self.config.agent.default_max_tool_calls)
    }
}

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/tools", get(meta::tools))
        .route("/chat", post(chat::chat))
        .route("/chat/stream", post(chat::chat_stream))
        .route("/search", post(search::search))
        .route("/session", post(sessions::create).get(sessions::list))
        .route(
            "/session/{id}",
            get(sessions::get)
                .patch(sessions::update)
                .delete(sessions::delete),
        )
        .route("/session/{id}/reset", post(sessions::reset))
        .route("/session/{id}/history", get(sessions::history))
        // Layers run bottom-up: auth resolves the user before rate limiting
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_middleware,
        ))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ));

    let cors = cors_layer(&state.config.server.cors_origins);
    let timeout = state.config.server.request_timeout;

    Router::new()
        .route("/", get(meta::root))
        .route("/health", get(meta::health))
        .merge(protected)
        .fallback(meta::not_found)
        // Bounds the time to response headers; SSE bodies are not cut off
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_timeout))
                .layer(TimeoutLayer::new(timeout)),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_timeout(err: BoxError) -> ApiError {
    if err.is::<tower::timeout::error::Elapsed>() {
        ApiError::new(StatusCode::REQUEST_TIMEOUT, "Request timed out")
    } else {
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Unhandled internal error: {}", err),
        )
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}
