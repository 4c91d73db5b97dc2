//! iCalendar feed fetcher

use async_trait::async_trait;
use homeboard_core::{FetchAuthority, FetchBatch, FetchRequest, SourceFetcher};
use homeboard_domain::{HomeboardError, Result, SourceKind, TimeWindow};
use reqwest::header::{ACCEPT, ETAG, IF_NONE_MATCH};
use reqwest::{Method, StatusCode};
use tracing::debug;
use url::Url;

use super::authorize;
use crate::errors::InfraError;
use crate::integrations::calendar::ics::parse_calendar;
use crate::integrations::calendar::FetcherSettings;

/// Fetches a published iCalendar feed.
///
/// Feeds are windowed: only events overlapping the requested window are
/// returned, so deletions never reach beyond it. The response `ETag` is kept
/// in the cursor together with the window it was fetched for, and is only
/// sent back as `If-None-Match` while the requested window is the same. A 304
/// for a slid window would hide events that just entered it.
pub struct IcsFeedFetcher {
    settings: FetcherSettings,
}

impl IcsFeedFetcher {
    pub fn new(settings: FetcherSettings) -> Self {
        Self { settings }
    }
}

/// Rewrite `webcal://` to `https://` and validate the scheme
pub(crate) fn feed_url(raw: &str) -> Result<Url> {
    let trimmed = raw.trim();
    let rewritten = ["webcals://", "webcal://"]
        .iter()
        .find_map(|prefix| {
            trimmed
                .get(..prefix.len())
                .filter(|head| head.eq_ignore_ascii_case(prefix))
                .map(|_| format!("https://{}", &trimmed[prefix.len()..]))
        })
        .unwrap_or_else(|| trimmed.to_string());

    let url = Url::parse(&rewritten)
        .map_err(|e| HomeboardError::InvalidInput(format!("invalid feed url '{raw}': {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(HomeboardError::InvalidInput(format!("unsupported feed scheme '{other}'"))),
    }
}

/// Cursor text: `<start>:<end>:<etag>` with the window bounds in Unix seconds
fn encode_cursor(window: &TimeWindow, etag: &str) -> String {
    format!("{}:{}:{etag}", window.start.timestamp(), window.end.timestamp())
}

/// The stored ETag, if it was fetched for exactly `window`
fn etag_for_window<'a>(cursor: &'a str, window: &TimeWindow) -> Option<&'a str> {
    let mut parts = cursor.splitn(3, ':');
    let start: i64 = parts.next()?.parse().ok()?;
    let end: i64 = parts.next()?.parse().ok()?;
    let etag = parts.next().filter(|etag| !etag.is_empty())?;
    (start == window.start.timestamp() && end == window.end.timestamp()).then_some(etag)
}

#[async_trait]
impl SourceFetcher for IcsFeedFetcher {
    fn kind(&self) -> SourceKind {
        SourceKind::IcsFeed
    }

    fn authority(&self) -> FetchAuthority {
        FetchAuthority::Windowed
    }

    async fn fetch(&self, request: FetchRequest<'_>) -> Result<FetchBatch> {
        let url = feed_url(&request.source.url)?;
        let http = &self.settings.http;

        let mut builder = http
            .request(Method::GET, url)
            .header(ACCEPT, "text/calendar, text/plain;q=0.8, */*;q=0.5");
        builder = authorize(builder, request.credential);
        match request.cursor.and_then(|cursor| etag_for_window(cursor, &request.window)) {
            Some(etag) => builder = builder.header(IF_NONE_MATCH, etag),
            None if request.cursor.is_some() => {
                debug!(source_id = %request.source.id, "window moved, skipping conditional request");
            }
            None => {}
        }

        let response = http.send_checked(builder).await?;
        if response.status() == StatusCode::NOT_MODIFIED {
            debug!(source_id = %request.source.id, "feed not modified");
            return Ok(FetchBatch::not_modified(request.cursor.map(str::to_string)));
        }

        let cursor = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|etag| encode_cursor(&request.window, etag));
        let body = response.text().await.map_err(InfraError::from)?;
        let parsed = parse_calendar(&body, self.settings.timezone)?;

        let total = parsed.events.len();
        let events: Vec<_> = parsed
            .events
            .into_iter()
            .filter(|event| request.window.overlaps(event.start, event.end))
            .collect();
        debug!(
            source_id = %request.source.id,
            total,
            in_window = events.len(),
            skipped = parsed.skipped,
            "parsed feed"
        );

        Ok(FetchBatch::snapshot(events, cursor)
            .with_skipped(parsed.skipped)
            .with_window(request.window))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webcal_urls_become_https() {
        let url = feed_url("webcal://school.example.org/cal.ics").unwrap();
        assert_eq!(url.as_str(), "https://school.example.org/cal.ics");
        let url = feed_url("WEBCALS://school.example.org/cal.ics").unwrap();
        assert_eq!(url.scheme(), "https");
    }

    #[test]
    fn etag_is_only_reused_for_the_same_window() {
        let march = TimeWindow::new(
            "2024-03-01T00:00:00Z".parse().unwrap(),
            "2024-05-30T00:00:00Z".parse().unwrap(),
        )
        .unwrap();
        let slid = TimeWindow::new(
            "2024-03-10T00:00:00Z".parse().unwrap(),
            "2024-06-08T00:00:00Z".parse().unwrap(),
        )
        .unwrap();

        let cursor = encode_cursor(&march, "W/\"v1:a\"");
        assert_eq!(etag_for_window(&cursor, &march), Some("W/\"v1:a\""));
        assert_eq!(etag_for_window(&cursor, &slid), None);
        assert_eq!(etag_for_window("\"v1\"", &march), None, "bare etags are never reused");
    }

    #[test]
    fn other_schemes_are_rejected() {
        assert!(feed_url("ftp://example.org/cal.ics").is_err());
        assert!(feed_url("not a url").is_err());
    }
}
