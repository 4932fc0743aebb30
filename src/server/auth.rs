//! Bearer-token authentication

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use tracing::warn;

use super::error::ApiError;
use super::AppState;

/// User label resolved from the bearer token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser(pub String);

impl AuthUser {
    /// The user label
    pub fn label(&self) -> &str {
        &self.0
    }
}

/// Middleware resolving `Authorization: Bearer <token>` against the key table
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(req.headers())
        .ok_or_else(|| ApiError::unauthorized("Missing or invalid Authorization header"))?;

    let user = match state.config.auth.user_for(token) {
        Some(user) => user.to_string(),
        None => {
            warn!(path = %req.uri().path(), "Rejected unknown API key");
            return Err(ApiError::unauthorized("Invalid API key"));
        }
    };

    // Store the user so handlers and the rate limiter can access it
    req.extensions_mut().insert(AuthUser(user));

    Ok(next.run(req).await)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or_else(|| ApiError::unauthorized("Missing credentials"))
    }
}
