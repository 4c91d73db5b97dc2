//! Rate guard middleware for the display read path.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Query, Request, State};
use axum::http::{HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use homeboard_common::RateDecision;
use serde::Deserialize;

use crate::error::ApiError;
use crate::AppState;

/// Header a kiosk uses to present its display token
pub const DISPLAY_TOKEN_HEADER: &str = "x-display-token";

/// Whole tokens left in the caller's bucket
pub const REMAINING_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

#[derive(Debug, Default, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Admit or reject a request against the caller's token bucket.
///
/// Rejections answer `429` with `Retry-After` and never reach the handler.
/// Every response carries `X-RateLimit-Remaining`.
pub async fn rate_guard(State(ctx): State<AppState>, request: Request, next: Next) -> Response {
    let identity = rate_identity(&ctx, &request);

    let decision = ctx.rate_guard.check(&identity);
    let mut response = match decision {
        RateDecision::Allowed { .. } => next.run(request).await,
        RateDecision::Rejected { retry_after, .. } => {
            let retry_after_ms = u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX);
            tracing::debug!(identity = %identity, retry_after_ms, "request rate limited");
            ApiError::TooManyRequests { retry_after, message: None }.into_response()
        }
    };

    response.headers_mut().insert(REMAINING_HEADER, HeaderValue::from(decision.remaining()));
    response
}

/// Configured display token if one is presented, otherwise the peer address
fn rate_identity(ctx: &AppState, request: &Request) -> String {
    let header_token = request
        .headers()
        .get(DISPLAY_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|token| token.trim().to_string());
    let query_token = || {
        Query::<TokenQuery>::try_from_uri(request.uri())
            .ok()
            .and_then(|Query(query)| query.token)
    };

    if let Some(token) = header_token.or_else(query_token).filter(|t| ctx.is_display_token(t)) {
        return format!("display:{token}");
    }

    match request.extensions().get::<ConnectInfo<SocketAddr>>() {
        Some(ConnectInfo(addr)) => format!("ip:{}", addr.ip()),
        None => "ip:unknown".to_string(),
    }
}
