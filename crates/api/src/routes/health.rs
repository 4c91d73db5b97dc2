//! Health check endpoint.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use crate::utils::health::HealthStatus;
use crate::AppState;

/// Public health check endpoint.
///
/// Answers `503` when a component is unhealthy so load balancers and
/// supervisors can act on the status code alone.
pub async fn health_check(State(ctx): State<AppState>) -> (StatusCode, Json<HealthStatus>) {
    let status = ctx.health_check().await;
    let code = if status.is_healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (code, Json(status))
}
