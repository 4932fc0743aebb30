//! Direct web search

use std::time::Instant;

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::auth::AuthUser;
use super::error::{ApiError, ApiJson};
use super::AppState;
use crate::tools::{SearchHit, SearchRequest, MAX_RESULTS_LIMIT};

const MAX_QUERY_CHARS: usize = 500;

#[derive(Debug, Deserialize)]
pub struct SearchBody {
    query: String,
    max_results: Option<u8>,
}

#[derive(Debug, Serialize)]
pub struct SearchReply {
    success: bool,
    query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    answer: Option<String>,
    total_results: usize,
    results: Vec<SearchHit>,
    response_time: f64,
    timestamp: String,
}

pub async fn search(
    State(state): State<AppState>,
    user: AuthUser,
    ApiJson(body): ApiJson<SearchBody>,
) -> Result<Json<SearchReply>, ApiError> {
    let query = body.query.trim();
    let chars = query.chars().count();
    if chars == 0 || chars > MAX_QUERY_CHARS {
        return Err(ApiError::validation(format!(
            "query must be between 1 and {} characters",
            MAX_QUERY_CHARS
        )));
    }
    if let Some(n) = body.max_results {
        if n == 0 || n > MAX_RESULTS_LIMIT {
            return Err(ApiError::validation(format!(
                "max_results must be between 1 and {}",
                MAX_RESULTS_LIMIT
            )));
        }
    }

    let tool = state
        .search
        .as_ref()
        .ok_or_else(|| ApiError::unavailable("Web search is not configured"))?;

    let started = Instant::now();
    let max_results = body.max_results.unwrap_or_else(|| tool.default_max_results());
    let response = tool.search(&SearchRequest::new(query, max_results)).await?;

    info!(
        user = %user.label(),
        results = response.results.len(),
        "Direct search completed"
    );

    Ok(Json(SearchReply {
        success: true,
        query: response.query,
        answer: response.answer,
        total_results: response.results.len(),
        results: response.results,
        response_time: started.elapsed().as_secs_f64(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    }))
}
