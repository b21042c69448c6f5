//! Access control for `/api/*`: optional API key and a global rate limit.

use crate::error::AppError;
use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use subtle::ConstantTimeEq;

/// Alternative header carrying the API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Checks applied before any API handler runs.
#[derive(Default)]
pub struct ApiGuard {
    api_key: Option<String>,
    limiter: Option<DefaultDirectRateLimiter>,
}

impl std::fmt::Debug for ApiGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiGuard")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("rate_limited", &self.limiter.is_some())
            .finish()
    }
}

impl ApiGuard {
    /// Build a guard; `None` disables the respective check.
    pub fn new(api_key: Option<String>, rate_limit_per_second: Option<u32>) -> Self {
        let limiter = rate_limit_per_second
            .and_then(NonZeroU32::new)
            .map(|n| RateLimiter::direct(Quota::per_second(n)));
        Self { api_key, limiter }
    }

    /// Accept or reject a request by its headers.
    pub fn check(&self, headers: &HeaderMap) -> Result<(), AppError> {
        if let Some(expected) = &self.api_key {
            let provided = presented_key(headers).ok_or(AppError::Unauthorized)?;
            let matches: bool = provided.as_bytes().ct_eq(expected.as_bytes()).into();
            if !matches {
                tracing::warn!("Rejected request with invalid API key");
                return Err(AppError::Unauthorized);
            }
        }

        if let Some(limiter) = &self.limiter {
            if limiter.check().is_err() {
                return Err(AppError::RateLimited);
            }
        }

        Ok(())
    }
}

/// Key from `Authorization: Bearer <key>` or `X-API-Key: <key>`.
fn presented_key(headers: &HeaderMap) -> Option<&str> {
    if let Some(bearer) = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        return Some(bearer.trim());
    }
    headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()).map(str::trim)
}

/// Middleware wrapping [`ApiGuard::check`].
pub async fn require_api_access(
    State(guard): State<Arc<ApiGuard>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    guard.check(req.headers())?;
    Ok(next.run(req).await)
}
