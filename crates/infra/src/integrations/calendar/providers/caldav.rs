//! CalDAV collection fetcher

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use homeboard_core::{FetchAuthority, FetchBatch, FetchRequest, SourceFetcher};
use homeboard_domain::{HomeboardError, Result, SourceKind, TimeWindow};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::Method;
use tracing::{debug, warn};
use url::Url;

use super::authorize;
use crate::errors::InfraError;
use crate::integrations::calendar::ics::{parse_calendar, ParsedCalendar};
use crate::integrations::calendar::FetcherSettings;

static CALENDAR_DATA: Lazy<std::result::Result<Regex, regex::Error>> = Lazy::new(|| {
    Regex::new(
        r"(?s)<(?:[A-Za-z][\w.-]*:)?calendar-data\b[^>]*>(.*?)</(?:[A-Za-z][\w.-]*:)?calendar-data\s*>",
    )
});

/// Queries a CalDAV collection with a `calendar-query` REPORT.
///
/// The server is asked to expand recurrences inside the requested window, so
/// every instance arrives with its own `RECURRENCE-ID`. Results are windowed.
pub struct CalDavFetcher {
    settings: FetcherSettings,
}

impl CalDavFetcher {
    pub fn new(settings: FetcherSettings) -> Self {
        Self { settings }
    }
}

fn caldav_time(at: DateTime<Utc>) -> String {
    at.format("%Y%m%dT%H%M%SZ").to_string()
}

fn calendar_query(window: TimeWindow) -> String {
    let (start, end) = (caldav_time(window.start), caldav_time(window.end));
    format!(
        r#"<?xml version="1.0" encoding="utf-8" ?>
<c:calendar-query xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
  <d:prop>
    <d:getetag/>
    <c:calendar-data>
      <c:expand start="{start}" end="{end}"/>
    </c:calendar-data>
  </d:prop>
  <c:filter>
    <c:comp-filter name="VCALENDAR">
      <c:comp-filter name="VEVENT">
        <c:time-range start="{start}" end="{end}"/>
      </c:comp-filter>
    </c:comp-filter>
  </c:filter>
</c:calendar-query>"#
    )
}

/// Decode the XML text content of a `calendar-data` element
fn xml_text(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Some(cdata) = trimmed.strip_prefix("<![CDATA[").and_then(|s| s.strip_suffix("]]>")) {
        return cdata.to_string();
    }
    trimmed
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#13;", "\r")
        .replace("&#xD;", "\r")
        .replace("&#10;", "\n")
        .replace("&#xA;", "\n")
        .replace("&amp;", "&")
}

/// Parse every `calendar-data` payload of a multistatus body
pub(crate) fn parse_multistatus(body: &str, settings: &FetcherSettings) -> Result<ParsedCalendar> {
    if !body.contains("multistatus") {
        return Err(HomeboardError::InvalidInput("response is not a DAV multistatus".into()));
    }
    let pattern = CALENDAR_DATA
        .as_ref()
        .map_err(|e| HomeboardError::Internal(format!("calendar-data pattern: {e}")))?;

    let mut parsed = ParsedCalendar::default();
    for capture in pattern.captures_iter(body) {
        let Some(data) = capture.get(1) else { continue };
        match parse_calendar(&xml_text(data.as_str()), settings.timezone) {
            Ok(document) => parsed.extend(document),
            Err(e) => {
                warn!(error = %e, "skipping unreadable calendar object");
                parsed.skipped += 1;
            }
        }
    }
    Ok(parsed)
}

#[async_trait]
impl SourceFetcher for CalDavFetcher {
    fn kind(&self) -> SourceKind {
        SourceKind::CalDav
    }

    fn authority(&self) -> FetchAuthority {
        FetchAuthority::Windowed
    }

    async fn fetch(&self, request: FetchRequest<'_>) -> Result<FetchBatch> {
        let url = Url::parse(request.source.url.trim()).map_err(|e| {
            HomeboardError::InvalidInput(format!("invalid CalDAV url '{}': {e}", request.source.url))
        })?;
        let report = Method::from_bytes(b"REPORT")
            .map_err(|e| HomeboardError::Internal(format!("REPORT method: {e}")))?;
        let http = &self.settings.http;

        let builder = http
            .request(report, url)
            .header("Depth", HeaderValue::from_static("1"))
            .header(CONTENT_TYPE, HeaderValue::from_static("application/xml; charset=utf-8"))
            .body(calendar_query(request.window));
        let builder = authorize(builder, request.credential);

        let response = http.send_checked(builder).await?;
        let body = response.text().await.map_err(InfraError::from)?;
        let parsed = parse_multistatus(&body, &self.settings)?;

        let events: Vec<_> = parsed
            .events
            .into_iter()
            .filter(|event| request.window.overlaps(event.start, event.end))
            .collect();
        debug!(
            source_id = %request.source.id,
            events = events.len(),
            skipped = parsed.skipped,
            "parsed CalDAV report"
        );

        Ok(FetchBatch::snapshot(events, None)
            .with_skipped(parsed.skipped)
            .with_window(request.window))
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use chrono_tz::Tz;

    use super::*;
    use crate::http::HttpClient;

    fn settings() -> FetcherSettings {
        FetcherSettings { http: HttpClient::new().unwrap(), timezone: Tz::UTC }
    }

    #[test]
    fn query_carries_the_window_in_utc() {
        let window = TimeWindow::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap(),
        )
        .unwrap();
        let body = calendar_query(window);
        assert!(body.contains(r#"<c:time-range start="20240301T000000Z" end="20240401T000000Z"/>"#));
        assert!(body.contains("<c:expand"));
    }

    #[test]
    fn extracts_escaped_and_cdata_payloads() {
        let body = "<?xml version=\"1.0\"?>\
            <D:multistatus xmlns:D=\"DAV:\" xmlns:C=\"urn:ietf:params:xml:ns:caldav\">\
            <D:response><D:propstat><D:prop>\
            <C:calendar-data>BEGIN:VCALENDAR&#13;\nBEGIN:VEVENT&#13;\nUID:a&#13;\n\
            SUMMARY:Tom &amp; Jerry&#13;\nDTSTART:20240304T090000Z&#13;\nEND:VEVENT&#13;\n\
            END:VCALENDAR</C:calendar-data>\
            </D:prop></D:propstat></D:response>\
            <D:response><D:propstat><D:prop>\
            <cal:calendar-data xmlns:cal=\"urn:ietf:params:xml:ns:caldav\"><![CDATA[BEGIN:VCALENDAR\n\
            BEGIN:VEVENT\nUID:b\nDTSTART:20240305T090000Z\nEND:VEVENT\nEND:VCALENDAR]]></cal:calendar-data>\
            </D:prop></D:propstat></D:response>\
            <D:response><D:propstat><D:prop>\
            <C:calendar-data>garbage</C:calendar-data>\
            </D:prop></D:propstat></D:response>\
            </D:multistatus>";

        let parsed = parse_multistatus(body, &settings()).unwrap();
        let titles: Vec<&str> = parsed.events.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["Tom & Jerry", homeboard_domain::constants::UNTITLED_EVENT]);
        assert_eq!(parsed.skipped, 1);
    }

    #[test]
    fn non_dav_body_is_rejected() {
        assert!(parse_multistatus("<html/>", &settings()).is_err());
    }
}
