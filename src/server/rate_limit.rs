//! Per-user request rate limiting

use std::num::NonZeroU32;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use governor::{
    clock::{Clock, DefaultClock},
    DefaultKeyedRateLimiter, Quota, RateLimiter,
};
use tracing::warn;

use super::auth::AuthUser;
use super::error::ApiError;
use super::AppState;

/// Rate limiter keyed by user label
pub type UserRateLimiter = Arc<DefaultKeyedRateLimiter<String>>;

/// Create a limiter allowing `per_minute` requests per user
pub fn create_user_rate_limiter(per_minute: u32) -> UserRateLimiter {
    let per_minute = NonZeroU32::new(per_minute).unwrap_or(NonZeroU32::MIN);
    Arc::new(RateLimiter::keyed(Quota::per_minute(per_minute)))
}

/// Middleware to rate limit authenticated requests
///
/// Must run after the auth middleware.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let user = request
        .extensions()
        .get::<AuthUser>()
        .map(|user| user.0.clone())
        .unwrap_or_default();

    match state.limiter.check_key(&user) {
        Ok(_) => Ok(next.run(request).await),
        Err(not_until) => {
            let wait = not_until.wait_time_from(DefaultClock::default().now());
            warn!(user = %user, wait_ms = wait.as_millis() as u64, "Rate limit exceeded");
            Err(ApiError::rate_limited(wait.as_secs()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_each_user_separately() {
        let limiter = create_user_rate_limiter(2);
        let alice = "alice".to_string();
        let bob = "bob".to_string();

        assert!(limiter.check_key(&alice).is_ok());
        assert!(limiter.check_key(&alice).is_ok());
        assert!(limiter.check_key(&alice).is_err());
        assert!(limiter.check_key(&bob).is_ok());
    }

    #[test]
    fn zero_budget_still_allows_one_request() {
        let limiter = create_user_rate_limiter(0);
        assert!(limiter.check_key(&"u".to_string()).is_ok());
    }
}
