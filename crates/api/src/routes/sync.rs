//! Sync status endpoint.

use std::time::Duration;

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use homeboard_domain::{ActiveSchedule, CalendarSource, SourceKind};
use homeboard_infra::observability::metrics::{FetchMetricsSnapshot, SyncMetricsSnapshot};
use serde::Serialize;
use tracing::warn;

use crate::AppState;

const STORE_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-source sync bookkeeping
#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub id: String,
    pub name: String,
    pub kind: SourceKind,
    pub enabled: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub consecutive_errors: u32,
    pub last_error_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl From<CalendarSource> for SourceStatus {
    fn from(source: CalendarSource) -> Self {
        Self {
            id: source.id,
            name: source.name,
            kind: source.kind,
            enabled: source.enabled,
            last_sync_at: source.last_sync_at,
            consecutive_errors: source.consecutive_errors,
            last_error_at: source.last_error_at,
            last_error: source.last_error,
        }
    }
}

/// Response for `GET /api/sync/status`.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatusResponse {
    /// `ok`, `degraded` when a source is failing, or `no_data` when the
    /// store could not be read
    pub status: &'static str,
    pub connected_clients: usize,
    pub active_schedules: Vec<ActiveSchedule>,
    pub sources: Vec<SourceStatus>,
    pub metrics: SyncMetricsSnapshot,
    pub fetch: FetchMetricsSnapshot,
    pub generated_at: DateTime<Utc>,
}

/// Scheduler, client and source health in one read.
///
/// A store failure or a read slower than five seconds degrades the body to
/// `no_data` instead of failing the request.
pub async fn sync_status(State(ctx): State<AppState>) -> Json<SyncStatusResponse> {
    let (status, sources) =
        match tokio::time::timeout(STORE_READ_TIMEOUT, ctx.sources.list_sources()).await {
            Ok(Ok(sources)) => {
                let failing = sources.iter().any(|s| s.enabled && s.consecutive_errors > 0);
                let status = if failing { "degraded" } else { "ok" };
                (status, sources.into_iter().map(SourceStatus::from).collect())
            }
            Ok(Err(e)) => {
                warn!(error = %e, "sync status: source store unavailable");
                ("no_data", Vec::new())
            }
            Err(_) => {
                warn!(timeout_secs = STORE_READ_TIMEOUT.as_secs(), "sync status: source read timed out");
                ("no_data", Vec::new())
            }
        };

    Json(SyncStatusResponse {
        status,
        connected_clients: ctx.orchestrator.connected_client_count(),
        active_schedules: ctx.orchestrator.list_active(),
        sources,
        metrics: ctx.orchestrator.metrics(),
        fetch: ctx.fetch_metrics.snapshot(),
        generated_at: Utc::now(),
    })
}
