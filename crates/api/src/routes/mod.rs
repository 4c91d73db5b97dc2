//! API route definitions.

mod admin;
mod calendar;
mod health;
mod live;
mod sync;

use axum::middleware;
use axum::routing::{get, post, put};
use axum::Router;

use crate::auth::require_admin;
use crate::rate_limit::rate_guard;
use crate::AppState;

pub use calendar::WindowQuery;
pub use sync::{SourceStatus, SyncStatusResponse};

/// Build the complete API router.
///
/// # Route Structure
///
/// ## Public
/// - `GET /health` - Component health
/// - `GET /api/sync/status` - Schedules, clients and sync metrics
///
/// ## Rate guarded
/// - `GET /api/calendar/events` - Merged events for a window
/// - `GET /api/live` - Server-sent change notifications
///
/// ## Admin token required
/// - `GET /api/admin/sources` - Sources with sync bookkeeping
/// - `PUT /api/admin/sources/{id}` - Create or replace a source
/// - `DELETE /api/admin/sources/{id}` - Remove a source and its events
/// - `POST /api/admin/sources/{id}/sync` - Run one cycle now
/// - `POST /api/admin/sync` - Run every enabled source
pub fn router(state: AppState) -> Router {
    let public = Router::new().route("/health", get(health::health_check));

    let display = Router::new()
        .route("/calendar/events", get(calendar::merged_events))
        .route("/live", get(live::live_stream))
        .layer(middleware::from_fn_with_state(state.clone(), rate_guard));

    let admin = Router::new()
        .route("/sources", get(admin::list_sources))
        .route("/sources/{id}", put(admin::save_source).delete(admin::delete_source))
        .route("/sources/{id}/sync", post(admin::trigger_sync))
        .route("/sync", post(admin::sync_all))
        .layer(middleware::from_fn_with_state(state.clone(), require_admin));

    let api = Router::new()
        .merge(display)
        .route("/sync/status", get(sync::sync_status))
        .nest("/admin", admin);

    Router::new()
        .merge(public)
        .nest("/api", api)
        .with_state(state)
}
