//! iCalendar (RFC 5545) parsing into canonical events
//!
//! Only `VEVENT` components are read. Nested components (`VALARM`) and
//! `VTIMEZONE` definitions are skipped; `TZID` parameters are resolved
//! against the IANA database instead. A malformed event is counted and
//! dropped, never fatal for the rest of the calendar.
//!
//! Recurrence rules are not expanded: a master event yields its first
//! occurrence and overridden instances (`RECURRENCE-ID`) are keyed as
//! `uid#recurrence`.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use chrono_tz::Tz;
use homeboard_domain::constants::UNTITLED_EVENT;
use homeboard_domain::{CanonicalEvent, HomeboardError, Result};
use tracing::debug;

use super::time::{clean_identity, date_midnight, localize};

/// Events extracted from one iCalendar document
#[derive(Debug, Default)]
pub struct ParsedCalendar {
    pub events: Vec<CanonicalEvent>,
    /// Events dropped as malformed
    pub skipped: usize,
    /// Events dropped because their status is `CANCELLED`
    pub cancelled: usize,
}

impl ParsedCalendar {
    /// Append the contents of another document
    pub fn extend(&mut self, other: ParsedCalendar) {
        self.events.extend(other.events);
        self.skipped += other.skipped;
        self.cancelled += other.cancelled;
    }
}

/// Parse an iCalendar document. Floating times are read in `default_tz`.
pub fn parse_calendar(input: &str, default_tz: Tz) -> Result<ParsedCalendar> {
    let lines = unfold(input);
    if !lines.iter().any(|line| line.eq_ignore_ascii_case("BEGIN:VCALENDAR")) {
        return Err(HomeboardError::InvalidInput("payload is not an iCalendar document".into()));
    }

    let mut parsed = ParsedCalendar::default();
    let mut current: Option<RawEvent> = None;
    let mut nested = 0usize;

    for line in &lines {
        let Some(content) = ContentLine::parse(line) else {
            if current.is_some() && nested == 0 {
                debug!(line = %line, "ignoring unparsable content line");
            }
            continue;
        };

        let is_begin = content.name == "BEGIN";
        let is_end = content.name == "END";
        let names_event = content.value.trim().eq_ignore_ascii_case("VEVENT");

        if current.is_none() {
            if is_begin && names_event {
                current = Some(RawEvent::default());
                nested = 0;
            }
            continue;
        }

        if is_begin {
            nested += 1;
        } else if is_end && nested > 0 {
            nested -= 1;
        } else if is_end && names_event {
            if let Some(raw) = current.take() {
                match raw.finish(default_tz) {
                    Outcome::Event(event) => parsed.events.push(*event),
                    Outcome::Cancelled => parsed.cancelled += 1,
                    Outcome::Malformed { uid, reason } => {
                        debug!(uid = uid.as_deref().unwrap_or("-"), reason = %reason, "skipping malformed event");
                        parsed.skipped += 1;
                    }
                }
            }
        } else if nested == 0 && !is_end {
            if let Some(raw) = current.as_mut() {
                raw.apply(content);
            }
        }
    }

    if current.is_some() {
        parsed.skipped += 1;
    }

    Ok(parsed)
}

/// Join folded lines (continuations start with a space or a tab).
fn unfold(input: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for raw in input.trim_start_matches('\u{feff}').split('\n') {
        let line = raw.strip_suffix('\r').unwrap_or(raw);
        if let Some(rest) = line.strip_prefix(' ').or_else(|| line.strip_prefix('\t')) {
            if let Some(last) = lines.last_mut() {
                last.push_str(rest);
                continue;
            }
        }
        if !line.is_empty() {
            lines.push(line.to_string());
        }
    }
    lines
}

#[derive(Debug, Clone)]
struct ContentLine {
    name: String,
    params: Vec<(String, String)>,
    value: String,
}

impl ContentLine {
    fn parse(line: &str) -> Option<Self> {
        let mut in_quotes = false;
        let mut split_at = None;
        for (idx, c) in line.char_indices() {
            match c {
                '"' => in_quotes = !in_quotes,
                ':' if !in_quotes => {
                    split_at = Some(idx);
                    break;
                }
                _ => {}
            }
        }
        let idx = split_at?;
        let (head, value) = (&line[..idx], &line[idx + 1..]);

        let mut parts = split_unquoted(head, ';').into_iter();
        let name = parts.next()?.trim().to_ascii_uppercase();
        if name.is_empty() {
            return None;
        }
        let params = parts
            .filter_map(|part| {
                let (key, value) = part.split_once('=')?;
                Some((key.trim().to_ascii_uppercase(), value.trim().trim_matches('"').to_string()))
            })
            .collect();

        Some(Self { name, params, value: value.to_string() })
    }

    fn param(&self, key: &str) -> Option<&str> {
        self.params.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }
}

fn split_unquoted(input: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (idx, c) in input.char_indices() {
        if c == '"' {
            in_quotes = !in_quotes;
        } else if c == separator && !in_quotes {
            parts.push(&input[start..idx]);
            start = idx + c.len_utf8();
        }
    }
    parts.push(&input[start..]);
    parts
}

/// Reverse RFC 5545 text escaping
fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n' | 'N') => out.push('\n'),
            Some(escaped @ (',' | ';' | '\\')) => out.push(escaped),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn non_empty_text(value: Option<String>) -> Option<String> {
    value.map(|v| unescape(&v).trim().to_string()).filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, Copy)]
enum IcsTime {
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
}

impl IcsTime {
    fn instant(self) -> DateTime<Utc> {
        match self {
            Self::Date(date) => date_midnight(date),
            Self::DateTime(dt) => dt,
        }
    }

    fn key(self) -> String {
        match self {
            Self::Date(date) => date.format("%Y%m%d").to_string(),
            Self::DateTime(dt) => dt.format("%Y%m%dT%H%M%SZ").to_string(),
        }
    }
}

fn parse_time(line: &ContentLine, default_tz: Tz) -> std::result::Result<IcsTime, String> {
    let value = line.value.trim();
    let is_date = line.param("VALUE").is_some_and(|v| v.eq_ignore_ascii_case("DATE"))
        || (value.len() == 8 && value.bytes().all(|b| b.is_ascii_digit()));

    if is_date {
        return NaiveDate::parse_from_str(value, "%Y%m%d")
            .map(IcsTime::Date)
            .map_err(|e| format!("invalid date '{value}': {e}"));
    }

    if let Some(utc) = value.strip_suffix('Z').or_else(|| value.strip_suffix('z')) {
        return NaiveDateTime::parse_from_str(utc, "%Y%m%dT%H%M%S")
            .map(|naive| IcsTime::DateTime(naive.and_utc()))
            .map_err(|e| format!("invalid UTC time '{value}': {e}"));
    }

    let naive = NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S")
        .map_err(|e| format!("invalid local time '{value}': {e}"))?;
    let tz = line.param("TZID").and_then(resolve_tzid).unwrap_or(default_tz);
    localize(naive, tz)
        .map(IcsTime::DateTime)
        .ok_or_else(|| format!("local time '{value}' does not exist in {tz}"))
}

/// Resolve a `TZID` against the IANA database. Vendor prefixes such as
/// `/mozilla.org/20050126_1/Europe/Berlin` are stripped.
fn resolve_tzid(tzid: &str) -> Option<Tz> {
    let trimmed = tzid.trim().trim_matches('"');
    if let Ok(tz) = trimmed.parse::<Tz>() {
        return Some(tz);
    }

    let segments: Vec<&str> = trimmed.split('/').filter(|s| !s.is_empty()).collect();
    let resolved = (1..segments.len()).find_map(|idx| segments[idx..].join("/").parse::<Tz>().ok());
    if resolved.is_none() {
        debug!(tzid = trimmed, "unknown TZID, using default timezone");
    }
    resolved
}

/// Parse an RFC 5545 duration such as `PT1H30M` or `P1W`.
fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    let (negative, rest) = match value.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, value.strip_prefix('+').unwrap_or(value)),
    };
    let rest = rest.strip_prefix('P')?;

    let mut total: i64 = 0;
    let mut digits = String::new();
    let mut in_time = false;
    for c in rest.chars() {
        match c {
            '0'..='9' => digits.push(c),
            'T' => in_time = true,
            'W' | 'D' | 'H' | 'M' | 'S' => {
                let amount: i64 = digits.parse().ok()?;
                digits.clear();
                let unit = match (c, in_time) {
                    ('W', false) => 604_800,
                    ('D', false) => 86_400,
                    ('H', true) => 3_600,
                    ('M', true) => 60,
                    ('S', true) => 1,
                    _ => return None,
                };
                total = total.checked_add(amount.checked_mul(unit)?)?;
            }
            _ => return None,
        }
    }
    if !digits.is_empty() {
        return None;
    }
    Duration::try_seconds(if negative { -total } else { total })
}

fn next_day(start: DateTime<Utc>) -> std::result::Result<DateTime<Utc>, String> {
    start.checked_add_signed(Duration::days(1)).ok_or_else(|| "date out of range".to_string())
}

enum Outcome {
    Event(Box<CanonicalEvent>),
    Cancelled,
    Malformed { uid: Option<String>, reason: String },
}

#[derive(Debug, Default)]
struct RawEvent {
    uid: Option<String>,
    summary: Option<String>,
    description: Option<String>,
    location: Option<String>,
    status: Option<String>,
    color: Option<String>,
    sequence: Option<String>,
    last_modified: Option<String>,
    dtstart: Option<ContentLine>,
    dtend: Option<ContentLine>,
    duration: Option<String>,
    recurrence_id: Option<ContentLine>,
    attendees: Vec<String>,
}

impl RawEvent {
    fn apply(&mut self, line: ContentLine) {
        match line.name.as_str() {
            "UID" => self.uid = Some(line.value.trim().to_string()),
            "SUMMARY" => self.summary = Some(line.value),
            "DESCRIPTION" => self.description = Some(line.value),
            "LOCATION" => self.location = Some(line.value),
            "STATUS" => self.status = Some(line.value.trim().to_ascii_uppercase()),
            "COLOR" => self.color = Some(line.value.trim().to_string()),
            "SEQUENCE" => self.sequence = Some(line.value.trim().to_string()),
            "LAST-MODIFIED" => self.last_modified = Some(line.value.trim().to_string()),
            "DTSTART" => self.dtstart = Some(line),
            "DTEND" => self.dtend = Some(line),
            "DURATION" => self.duration = Some(line.value),
            "RECURRENCE-ID" => self.recurrence_id = Some(line),
            "ATTENDEE" => {
                let address = line.value.trim();
                let email = address
                    .get(..7)
                    .filter(|scheme| scheme.eq_ignore_ascii_case("mailto:"))
                    .map_or(address, |_| &address[7..]);
                let identity = if email.is_empty() { line.param("CN").unwrap_or("") } else { email };
                if !identity.is_empty() && !self.attendees.iter().any(|a| a == identity) {
                    self.attendees.push(identity.to_string());
                }
            }
            _ => {}
        }
    }

    fn finish(self, default_tz: Tz) -> Outcome {
        let uid = self.uid.clone().filter(|u| !u.is_empty());
        match self.build(default_tz) {
            Ok(Some(event)) => Outcome::Event(Box::new(event)),
            Ok(None) => Outcome::Cancelled,
            Err(reason) => Outcome::Malformed { uid, reason },
        }
    }

    fn build(self, default_tz: Tz) -> std::result::Result<Option<CanonicalEvent>, String> {
        let uid = self.uid.filter(|u| !u.is_empty()).ok_or("missing UID")?;
        if self.status.as_deref() == Some("CANCELLED") {
            return Ok(None);
        }

        let dtstart = self.dtstart.ok_or("missing DTSTART")?;
        let start_time = parse_time(&dtstart, default_tz)?;
        let all_day = matches!(start_time, IcsTime::Date(_));
        let start = start_time.instant();

        let mut end = match (&self.dtend, &self.duration) {
            (Some(dtend), _) => parse_time(dtend, default_tz)?.instant(),
            (None, Some(duration)) => {
                let parsed =
                    parse_duration(duration).ok_or_else(|| format!("invalid DURATION '{duration}'"))?;
                start
                    .checked_add_signed(parsed)
                    .ok_or_else(|| format!("DURATION '{duration}' out of range"))?
            }
            (None, None) if all_day => next_day(start)?,
            (None, None) => start,
        };
        if end < start {
            return Err("event ends before it starts".into());
        }
        if all_day && end == start {
            end = next_day(start)?;
        }

        let external_id = match &self.recurrence_id {
            Some(line) => format!("{uid}#{}", parse_time(line, default_tz)?.key()),
            None => uid.clone(),
        };

        let participants =
            self.attendees.iter().filter_map(|a| clean_identity(a, &external_id)).collect();

        Ok(Some(CanonicalEvent {
            external_id,
            title: non_empty_text(self.summary).unwrap_or_else(|| UNTITLED_EVENT.to_string()),
            description: non_empty_text(self.description),
            start,
            end,
            all_day,
            location: non_empty_text(self.location),
            color: self.color.filter(|c| !c.is_empty()),
            participants,
            version: self.last_modified.or(self.sequence),
        }))
    }
}
