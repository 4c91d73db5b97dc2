//! Google Calendar v3 fetcher

use async_trait::async_trait;
use chrono_tz::Tz;
use homeboard_core::{FetchAuthority, FetchBatch, FetchRequest, SourceFetcher};
use homeboard_domain::constants::UNTITLED_EVENT;
use homeboard_domain::{CanonicalEvent, Credential, HomeboardError, Result, SourceKind, TimeWindow};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::errors::{status_error, InfraError};
use crate::integrations::calendar::time::{clean_identity, parse_all_day_date, parse_event_timestamp};
use crate::integrations::calendar::FetcherSettings;

const GOOGLE_CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3";
const DEFAULT_CALENDAR_ID: &str = "primary";
const PAGE_SIZE: &str = "250";
const MAX_PAGES: usize = 40;

/// Google Calendar events fetcher.
///
/// With a stored sync token the fetcher asks for a delta; cancelled entries in
/// the delta are explicit removals. Without one, or when Google rejects the
/// token with `410 Gone`, it lists the requested window and returns a complete
/// snapshot together with a fresh sync token.
pub struct GoogleCalendarFetcher {
    settings: FetcherSettings,
}

impl GoogleCalendarFetcher {
    pub fn new(settings: FetcherSettings) -> Self {
        Self { settings }
    }

    fn events_url(request: &FetchRequest<'_>) -> Result<Url> {
        let base = match request.source.url.trim() {
            "" => GOOGLE_CALENDAR_API_BASE,
            other => other,
        };
        let calendar_id =
            request.source.options.calendar_id.as_deref().unwrap_or(DEFAULT_CALENDAR_ID);

        let mut url = Url::parse(base)
            .map_err(|e| HomeboardError::InvalidInput(format!("invalid API base '{base}': {e}")))?;
        url.path_segments_mut()
            .map_err(|()| HomeboardError::InvalidInput(format!("API base '{base}' cannot be a base")))?
            .pop_if_empty()
            .extend(["calendars", calendar_id, "events"]);
        Ok(url)
    }

    /// List every page of a query. `None` means the sync token was rejected.
    async fn list(
        &self,
        url: &Url,
        token: &str,
        mode: ListMode<'_>,
    ) -> Result<Option<Listing>> {
        let http = &self.settings.http;
        let mut listing = Listing::default();
        let mut page_token: Option<String> = None;

        for page in 1..=MAX_PAGES {
            let mut query: Vec<(&str, String)> =
                vec![("singleEvents", "true".into()), ("maxResults", PAGE_SIZE.into())];
            match mode {
                ListMode::Delta(sync_token) => query.push(("syncToken", sync_token.to_string())),
                ListMode::Window(window) => {
                    query.push(("timeMin", window.start.to_rfc3339()));
                    query.push(("timeMax", window.end.to_rfc3339()));
                }
            }
            if let Some(page_token) = &page_token {
                query.push(("pageToken", page_token.clone()));
            }

            let builder = http.request(Method::GET, url.clone()).bearer_auth(token).query(&query);
            let response = http.send(builder).await?;
            let status = response.status();
            if status == StatusCode::GONE {
                return Ok(None);
            }
            if !status.is_success() {
                return Err(status_error(status));
            }

            let body: GoogleEventsResponse = response.json().await.map_err(InfraError::from)?;
            debug!(page, items = body.items.len(), "received events page");
            listing.absorb(body.items, self.settings.timezone);

            if body.next_sync_token.is_some() {
                listing.next_sync_token = body.next_sync_token;
            }
            page_token = body.next_page_token;
            if page_token.is_none() {
                return Ok(Some(listing));
            }
        }

        Err(HomeboardError::InvalidInput(format!("event listing exceeded {MAX_PAGES} pages")))
    }
}

#[derive(Clone, Copy)]
enum ListMode<'a> {
    Delta(&'a str),
    Window(TimeWindow),
}

#[derive(Default)]
struct Listing {
    events: Vec<CanonicalEvent>,
    removed: Vec<String>,
    skipped: usize,
    next_sync_token: Option<String>,
}

impl Listing {
    fn absorb(&mut self, items: Vec<GoogleCalendarEvent>, tz: Tz) {
        for item in items {
            if item.status.as_deref() == Some("cancelled") {
                self.removed.push(item.id);
                continue;
            }
            match convert_event(item, tz) {
                Ok(event) => self.events.push(event),
                Err(failure) => {
                    warn!(event_id = %failure.event_id, reason = %failure.reason, "skipping unreadable event");
                    self.skipped += 1;
                }
            }
        }
    }
}

#[async_trait]
impl SourceFetcher for GoogleCalendarFetcher {
    fn kind(&self) -> SourceKind {
        SourceKind::VendorApi
    }

    fn authority(&self) -> FetchAuthority {
        FetchAuthority::Incremental
    }

    async fn fetch(&self, request: FetchRequest<'_>) -> Result<FetchBatch> {
        let token = match request.credential {
            Some(Credential::Bearer(token)) => token.as_str(),
            Some(Credential::Basic { .. }) => {
                return Err(HomeboardError::Auth("vendor API sources need a bearer token".into()))
            }
            None => return Err(HomeboardError::Auth("no access token configured".into())),
        };
        let url = Self::events_url(&request)?;

        if let Some(sync_token) = request.cursor {
            match self.list(&url, token, ListMode::Delta(sync_token)).await? {
                Some(delta) => {
                    return Ok(FetchBatch::delta(
                        delta.events,
                        delta.removed,
                        delta.next_sync_token.or_else(|| Some(sync_token.to_string())),
                    )
                    .with_skipped(delta.skipped));
                }
                None => info!(source_id = %request.source.id, "sync token expired, listing window"),
            }
        }

        let listing = self
            .list(&url, token, ListMode::Window(request.window))
            .await?
            .ok_or_else(|| status_error(StatusCode::GONE))?;

        Ok(FetchBatch::snapshot(listing.events, listing.next_sync_token)
            .with_skipped(listing.skipped)
            .with_window(request.window))
    }
}

struct EventParseFailure {
    event_id: String,
    reason: String,
}

fn convert_event(
    item: GoogleCalendarEvent,
    tz: Tz,
) -> std::result::Result<CanonicalEvent, EventParseFailure> {
    let GoogleCalendarEvent {
        id,
        summary,
        description,
        location,
        start,
        end,
        attendees,
        updated,
        etag,
        ..
    } = item;
    let fail = |reason: String| EventParseFailure { event_id: id.clone(), reason };

    let start = start.ok_or_else(|| fail("missing start".into()))?;
    let end = end.ok_or_else(|| fail("missing end".into()))?;
    let all_day = start.date_time.is_none() && start.date.is_some();

    let parse = |value: &EventDateTime, field: &str| {
        let parsed = match (&value.date_time, &value.date) {
            (Some(date_time), _) => parse_event_timestamp(date_time, tz),
            (None, Some(date)) => parse_all_day_date(date),
            (None, None) => Err("no date or dateTime".into()),
        };
        parsed.map_err(|reason| format!("{field}: {reason}"))
    };
    let start_at = parse(&start, "start").map_err(fail)?;
    let end_at = parse(&end, "end").map_err(fail)?;
    if end_at < start_at {
        return Err(fail("event ends before it starts".into()));
    }

    let participants = attendees
        .unwrap_or_default()
        .iter()
        .filter_map(|attendee| clean_identity(&attendee.email, &id))
        .collect();

    Ok(CanonicalEvent {
        title: summary
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| UNTITLED_EVENT.to_string()),
        description: description.filter(|d| !d.trim().is_empty()),
        start: start_at,
        end: end_at,
        all_day,
        location: location.filter(|l| !l.trim().is_empty()),
        color: None,
        participants,
        version: updated.or(etag),
        external_id: id,
    })
}

#[derive(Debug, Deserialize)]
struct GoogleEventsResponse {
    #[serde(default)]
    items: Vec<GoogleCalendarEvent>,
    #[serde(rename = "nextSyncToken")]
    next_sync_token: Option<String>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleCalendarEvent {
    id: String,
    status: Option<String>,
    summary: Option<String>,
    description: Option<String>,
    location: Option<String>,
    start: Option<EventDateTime>,
    end: Option<EventDateTime>,
    attendees: Option<Vec<GoogleAttendee>>,
    updated: Option<String>,
    etag: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EventDateTime {
    #[serde(rename = "dateTime")]
    date_time: Option<String>,
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleAttendee {
    #[serde(default)]
    email: String,
}
