//! Service metadata routes

use axum::{extract::State, Json};
use serde_json::{json, Value};

use super::error::ApiError;
use super::AppState;

pub async fn root() -> Json<Value> {
    Json(json!({
        "service": crate::NAME,
        "version": crate::VERSION,
        "description": "Web-search augmented chat over an OpenAI-compatible LLM",
        "endpoints": {
            "GET /health": "Service health (no auth)",
            "GET /tools": "Tools offered to the model",
            "POST /chat": "Send a message; JSON or SSE",
            "POST /chat/stream": "Send a message; always SSE",
            "POST /search": "Run a web search directly",
            "POST /session": "Create a session",
            "GET /session": "List your sessions",
            "GET /session/{id}": "Session details",
            "PATCH /session/{id}": "Update session settings",
            "DELETE /session/{id}": "Delete a session",
            "POST /session/{id}/reset": "Clear session history",
            "GET /session/{id}/history": "Session history",
        },
    }))
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "version": crate::VERSION,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "model_info": {
            "model": state.orchestrator.model(),
            "base_url": state.config.llm.base_url,
            "tools": state.orchestrator.tools().names(),
        },
        "search_enabled": state.search.is_some(),
        "active_sessions": state.sessions.count().await,
        "uptime_secs": state.started_at.elapsed().as_secs(),
    }))
}

pub async fn tools(State(state): State<AppState>) -> Json<Value> {
    let tools = state.orchestrator.tools().definitions();
    Json(json!({
        "success": true,
        "count": tools.len(),
        "tools": tools,
    }))
}

pub async fn not_found() -> ApiError {
    ApiError::not_found("Not found")
}
