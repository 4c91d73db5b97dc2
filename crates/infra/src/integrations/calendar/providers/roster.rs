//! Shift roster fetcher

use async_trait::async_trait;
use chrono_tz::Tz;
use homeboard_core::{FetchAuthority, FetchBatch, FetchRequest, SourceFetcher};
use homeboard_domain::{CanonicalEvent, HomeboardError, Result, SourceKind};
use reqwest::header::ACCEPT;
use reqwest::Method;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use super::authorize;
use crate::errors::InfraError;
use crate::integrations::calendar::time::{clean_identity, parse_all_day_date, parse_event_timestamp};
use crate::integrations::calendar::FetcherSettings;

const DEFAULT_SHIFT_TITLE: &str = "Shift";

/// Reads a shift roster JSON endpoint.
///
/// The roster returns every published shift, so it mirrors the upstream
/// completely: shifts that disappear are deleted whatever their date.
/// Assignees become participants for colour resolution.
pub struct RosterFetcher {
    settings: FetcherSettings,
}

impl RosterFetcher {
    pub fn new(settings: FetcherSettings) -> Self {
        Self { settings }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RosterPayload {
    Wrapped { shifts: Vec<serde_json::Value> },
    Bare(Vec<serde_json::Value>),
}

#[derive(Debug, Deserialize)]
struct RosterShift {
    id: String,
    title: Option<String>,
    role: Option<String>,
    start: String,
    end: String,
    location: Option<String>,
    notes: Option<String>,
    #[serde(default)]
    assignees: Vec<RosterAssignee>,
    status: Option<String>,
    updated_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RosterAssignee {
    name: Option<String>,
    email: Option<String>,
}

fn parse_time(value: &str, tz: Tz) -> std::result::Result<(chrono::DateTime<chrono::Utc>, bool), String> {
    if value.trim().len() == 10 {
        parse_all_day_date(value).map(|at| (at, true))
    } else {
        parse_event_timestamp(value, tz).map(|at| (at, false))
    }
}

/// Convert one shift; `Ok(None)` for cancelled shifts
fn convert_shift(shift: RosterShift, tz: Tz) -> std::result::Result<Option<CanonicalEvent>, String> {
    if shift.status.as_deref().is_some_and(|s| s.eq_ignore_ascii_case("cancelled")) {
        return Ok(None);
    }

    let (start, all_day) = parse_time(&shift.start, tz)?;
    let (mut end, _) = parse_time(&shift.end, tz)?;
    if end < start {
        return Err("shift ends before it starts".into());
    }
    if all_day && end == start {
        end = start + chrono::Duration::days(1);
    }

    let participants = shift
        .assignees
        .iter()
        .filter_map(|a| a.email.as_deref().or(a.name.as_deref()))
        .filter_map(|identity| clean_identity(identity, &shift.id))
        .collect();

    let title = shift
        .title
        .or(shift.role)
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| DEFAULT_SHIFT_TITLE.to_string());

    Ok(Some(CanonicalEvent {
        external_id: shift.id,
        title,
        description: shift.notes.filter(|n| !n.trim().is_empty()),
        start,
        end,
        all_day,
        location: shift.location.filter(|l| !l.trim().is_empty()),
        color: None,
        participants,
        version: shift.updated_at,
    }))
}

#[async_trait]
impl SourceFetcher for RosterFetcher {
    fn kind(&self) -> SourceKind {
        SourceKind::Roster
    }

    fn authority(&self) -> FetchAuthority {
        FetchAuthority::FullMirror
    }

    async fn fetch(&self, request: FetchRequest<'_>) -> Result<FetchBatch> {
        let url = Url::parse(request.source.url.trim()).map_err(|e| {
            HomeboardError::InvalidInput(format!("invalid roster url '{}': {e}", request.source.url))
        })?;
        let http = &self.settings.http;

        let builder = http.request(Method::GET, url).header(ACCEPT, "application/json");
        let response = http.send_checked(authorize(builder, request.credential)).await?;
        let payload: RosterPayload = response.json().await.map_err(InfraError::from)?;
        let shifts = match payload {
            RosterPayload::Wrapped { shifts } | RosterPayload::Bare(shifts) => shifts,
        };

        let mut events = Vec::with_capacity(shifts.len());
        let mut skipped = 0;
        for value in shifts {
            let converted = serde_json::from_value::<RosterShift>(value)
                .map_err(|e| e.to_string())
                .and_then(|shift| convert_shift(shift, self.settings.timezone));
            match converted {
                Ok(Some(event)) => events.push(event),
                Ok(None) => {}
                Err(reason) => {
                    warn!(source_id = %request.source.id, reason = %reason, "skipping unreadable shift");
                    skipped += 1;
                }
            }
        }
        debug!(source_id = %request.source.id, shifts = events.len(), skipped, "parsed roster");

        Ok(FetchBatch::snapshot(events, None).with_skipped(skipped))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use super::*;

    fn shift(value: serde_json::Value) -> RosterShift {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn shifts_carry_assignees_as_participants() {
        let event = convert_shift(
            shift(json!({
                "id": "s-1",
                "role": "Night nurse",
                "start": "2024-03-04T22:00:00",
                "end": "2024-03-05T06:00:00",
                "assignees": [{ "name": "Mia", "email": "mia@example.org" }, { "name": "Leo" }]
            })),
            chrono_tz::Europe::London,
        )
        .unwrap()
        .unwrap();

        assert_eq!(event.title, "Night nurse");
        assert_eq!(event.start, Utc.with_ymd_and_hms(2024, 3, 4, 22, 0, 0).unwrap());
        assert_eq!(event.participants, vec!["mia@example.org", "Leo"]);
    }

    #[test]
    fn date_only_shifts_are_all_day() {
        let event = convert_shift(
            shift(json!({ "id": "s-2", "start": "2024-03-04", "end": "2024-03-04" })),
            Tz::UTC,
        )
        .unwrap()
        .unwrap();
        assert!(event.all_day);
        assert_eq!(event.title, DEFAULT_SHIFT_TITLE);
        assert_eq!(event.end - event.start, chrono::Duration::days(1));
    }

    #[test]
    fn cancelled_shifts_are_dropped() {
        let converted = convert_shift(
            shift(json!({
                "id": "s-3",
                "start": "2024-03-04T08:00:00Z",
                "end": "2024-03-04T16:00:00Z",
                "status": "Cancelled"
            })),
            Tz::UTC,
        )
        .unwrap();
        assert!(converted.is_none());
    }
}
