//! Merged calendar read for display clients.

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use homeboard_domain::{MergedEvents, TimeWindow};
use serde::Deserialize;
use tracing::warn;

use crate::AppState;

/// Window bounds accepted by `GET /api/calendar/events`.
///
/// Each bound is either an RFC 3339 instant or a `YYYY-MM-DD` date, which
/// means local midnight in the household zone.
#[derive(Debug, Default, Deserialize)]
pub struct WindowQuery {
    pub start: Option<String>,
    pub end: Option<String>,
}

/// Merged events for the requested window.
///
/// Never fails: malformed bounds fall back to defaults and unreadable
/// origins are reported through `partial` on an otherwise normal body.
pub async fn merged_events(
    State(ctx): State<AppState>,
    query: Result<Query<WindowQuery>, QueryRejection>,
) -> Json<MergedEvents> {
    let query = query.map(|Query(q)| q).unwrap_or_else(|rejection| {
        warn!(error = %rejection, "unreadable window query, using defaults");
        WindowQuery::default()
    });

    let window = resolve_window(
        &query,
        ctx.merge.settings().timezone,
        ctx.config.merge.default_window_days,
        Utc::now(),
    );
    Json(ctx.merge.merged_events(window).await)
}

/// Turn the query into a window.
///
/// A missing or invalid `start` means today's local midnight; a missing,
/// invalid or non-increasing `end` means `start` plus the default length.
fn resolve_window(query: &WindowQuery, tz: Tz, default_days: u32, now: DateTime<Utc>) -> TimeWindow {
    let start = query
        .start
        .as_deref()
        .and_then(|raw| parse_bound(raw, tz, "start"))
        .unwrap_or_else(|| local_midnight(now.with_timezone(&tz).date_naive(), tz));
    let default_end = start + Duration::days(i64::from(default_days.max(1)));

    let end = match query.end.as_deref().and_then(|raw| parse_bound(raw, tz, "end")) {
        Some(end) if end > start => end,
        Some(end) => {
            warn!(%start, %end, "window end not after start, using default length");
            default_end
        }
        None => default_end,
    };

    TimeWindow { start, end }
}

fn parse_bound(raw: &str, tz: Tz, which: &'static str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(instant) = DateTime::parse_from_rfc3339(raw) {
        return Some(instant.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(local_midnight(date, tz));
    }
    warn!(bound = which, value = raw, "unparseable window bound, using default");
    None
}

/// First instant of `date` in `tz`.
///
/// Midnight can be skipped by a DST jump; the earliest valid local time of
/// the day is used then.
fn local_midnight(date: NaiveDate, tz: Tz) -> DateTime<Utc> {
    let midnight = date.and_time(NaiveTime::MIN);
    match tz.from_local_datetime(&midnight).earliest() {
        Some(local) => local.with_timezone(&Utc),
        None => (1..=3)
            .find_map(|hour| tz.from_local_datetime(&(midnight + Duration::hours(hour))).earliest())
            .map(|local| local.with_timezone(&Utc))
            .unwrap_or_else(|| Utc.from_utc_datetime(&midnight)),
    }
}
