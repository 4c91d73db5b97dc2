//! Administrative token middleware.

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use homeboard_common::constant_time_eq;

use crate::error::ApiError;
use crate::AppState;

/// Header carrying the administrative token
pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

/// Middleware that requires the configured administrative token.
///
/// The token may be sent as either of:
/// ```text
/// X-Admin-Token: <token>
/// Authorization: Bearer <token>
/// ```
///
/// When `server.admin_token` is not configured every request is rejected.
pub async fn require_admin(
    State(ctx): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = ctx.config.server.admin_token.as_deref().filter(|t| !t.is_empty()) else {
        tracing::debug!("admin request rejected: no admin token configured");
        return Err(ApiError::Unauthorized);
    };

    match presented_token(request.headers()) {
        Some(token) if constant_time_eq(token.as_bytes(), expected.as_bytes()) => {
            Ok(next.run(request).await)
        }
        Some(_) => {
            tracing::debug!("invalid admin token");
            Err(ApiError::Unauthorized)
        }
        None => {
            tracing::debug!("missing admin token");
            Err(ApiError::Unauthorized)
        }
    }
}

fn presented_token(headers: &HeaderMap) -> Option<&str> {
    let header = |name: &str| headers.get(name).and_then(|value| value.to_str().ok());

    header(ADMIN_TOKEN_HEADER)
        .map(str::trim)
        .or_else(|| header(AUTHORIZATION.as_str()).and_then(|h| h.strip_prefix("Bearer ")).map(str::trim))
        .filter(|token| !token.is_empty())
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn reads_either_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(presented_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer secret"));
        assert_eq!(presented_token(&headers), Some("secret"));

        headers.insert(ADMIN_TOKEN_HEADER, HeaderValue::from_static(" other "));
        assert_eq!(presented_token(&headers), Some("other"));
    }

    #[test]
    fn other_schemes_are_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic c2VjcmV0"));
        assert_eq!(presented_token(&headers), None);
    }
}
