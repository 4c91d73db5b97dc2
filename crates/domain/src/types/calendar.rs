//! Calendar sources and the events they contribute

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::errors::{HomeboardError, Result};
use crate::impl_domain_status_conversions;

/// Kind of external calendar system behind a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// iCalendar feed served over HTTP(S) or webcal
    IcsFeed,
    /// CalDAV collection
    CalDav,
    /// Vendor calendar REST API (Google Calendar v3)
    VendorApi,
    /// Shift roster JSON API
    Roster,
}

impl_domain_status_conversions!(SourceKind {
    IcsFeed => "ics_feed",
    CalDav => "caldav",
    VendorApi => "vendor_api",
    Roster => "roster",
});

/// Whether the engine may write back to the source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WritePolicy {
    #[default]
    ReadOnly,
    Writable,
}

impl_domain_status_conversions!(WritePolicy {
    ReadOnly => "read_only",
    Writable => "writable",
});

/// Per-source knobs that change fetch or presentation behaviour
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceOptions {
    /// Replace event colours with the colour of the first participant found
    /// in the household directory.
    pub resolve_participant_colors: bool,
    /// Overrides the global sync lookback, in days
    pub lookback_days: Option<u32>,
    /// Overrides the global sync lookahead, in days
    pub lookahead_days: Option<u32>,
    /// Vendor calendar identifier (defaults to `primary`)
    pub calendar_id: Option<String>,
}

/// One configured external calendar
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarSource {
    pub id: String,
    pub kind: SourceKind,
    pub name: String,
    pub color: String,
    pub url: String,
    pub credential_ref: Option<String>,
    #[serde(default)]
    pub write_policy: WritePolicy,
    pub enabled: bool,
    #[serde(default)]
    pub options: SourceOptions,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub consecutive_errors: u32,
    pub last_error_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub sync_cursor: Option<String>,
}

impl CalendarSource {
    /// Create a source with empty sync bookkeeping
    pub fn new(
        id: impl Into<String>,
        kind: SourceKind,
        name: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            name: name.into(),
            color: crate::constants::FALLBACK_EVENT_COLOR.to_string(),
            url: url.into(),
            credential_ref: None,
            write_policy: WritePolicy::ReadOnly,
            enabled: true,
            options: SourceOptions::default(),
            last_sync_at: None,
            consecutive_errors: 0,
            last_error_at: None,
            last_error: None,
            sync_cursor: None,
        }
    }

    /// Validate identity fields before the source is persisted
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(HomeboardError::InvalidInput("source id must not be empty".into()));
        }
        if self.id.chars().any(|c| c.is_whitespace() || c == '/') {
            return Err(HomeboardError::InvalidInput(format!(
                "source id '{}' must not contain whitespace or '/'",
                self.id
            )));
        }
        if self.url.trim().is_empty() {
            return Err(HomeboardError::InvalidInput(format!(
                "source '{}' has no endpoint url",
                self.id
            )));
        }
        Ok(())
    }

    /// Copy the sync bookkeeping of `previous` onto a freshly configured
    /// descriptor so reconfiguration does not reset history.
    pub fn with_bookkeeping_from(mut self, previous: &CalendarSource) -> Self {
        self.last_sync_at = previous.last_sync_at;
        self.consecutive_errors = previous.consecutive_errors;
        self.last_error_at = previous.last_error_at;
        self.last_error.clone_from(&previous.last_error);
        if self.kind == previous.kind && self.url == previous.url {
            self.sync_cursor.clone_from(&previous.sync_cursor);
        }
        self
    }
}

/// Half-open interval `[start, end)` of absolute instants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Build a window, rejecting empty or inverted ranges
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if end <= start {
            return Err(HomeboardError::InvalidInput(format!(
                "window end {end} must be after start {start}"
            )));
        }
        Ok(Self { start, end })
    }

    /// True when `[start, end)` overlaps this window.
    ///
    /// Zero-length events are treated as instants and are visible when the
    /// instant falls inside the window.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        if end <= start {
            return start >= self.start && start < self.end;
        }
        start < self.end && end > self.start
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

/// Event shape every fetcher translates vendor payloads into
///
/// Times are absolute instants. All-day events carry UTC midnight of their
/// start date and of the day after their last date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalEvent {
    pub external_id: String,
    pub title: String,
    pub description: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub all_day: bool,
    pub location: Option<String>,
    pub color: Option<String>,
    #[serde(default)]
    pub participants: Vec<String>,
    /// Upstream version marker (ETag, SEQUENCE, ...) when the source has one
    pub version: Option<String>,
}

impl CanonicalEvent {
    /// Stable fingerprint of the fields the display cares about.
    ///
    /// Used by the diff step to tell updated events from unchanged ones
    /// without relying on upstream version markers.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        let mut field = |value: &str| {
            hasher.update(value.len().to_le_bytes());
            hasher.update(value.as_bytes());
        };

        field(&self.title);
        field(self.description.as_deref().unwrap_or(""));
        field(&self.start.timestamp().to_string());
        field(&self.end.timestamp().to_string());
        field(if self.all_day { "1" } else { "0" });
        field(self.location.as_deref().unwrap_or(""));
        field(self.color.as_deref().unwrap_or(""));
        for participant in &self.participants {
            field(participant);
        }

        hex::encode(&hasher.finalize()[..16])
    }
}

/// An event owned by exactly one calendar source, keyed by
/// `(source_id, external_id)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncedEvent {
    pub source_id: String,
    pub external_id: String,
    pub title: String,
    pub description: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub all_day: bool,
    pub location: Option<String>,
    /// Per-event override; the source colour applies when `None`
    pub color: Option<String>,
    pub participants: Vec<String>,
    pub version: Option<String>,
    pub content_hash: String,
    pub updated_at: DateTime<Utc>,
}

impl SyncedEvent {
    /// Build the stored form of a fetched event
    pub fn from_canonical(
        source_id: &str,
        event: &CanonicalEvent,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            source_id: source_id.to_string(),
            external_id: event.external_id.clone(),
            title: event.title.clone(),
            description: event.description.clone(),
            start: event.start,
            end: event.end,
            all_day: event.all_day,
            location: event.location.clone(),
            color: event.color.clone(),
            participants: event.participants.clone(),
            version: event.version.clone(),
            content_hash: event.content_hash(),
            updated_at,
        }
    }
}

/// Locally authored event (managed by the dashboard's CRUD screens)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeEvent {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub all_day: bool,
    pub location: Option<String>,
    pub color: Option<String>,
}

/// Access credential resolved for one source
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Opaque bearer token (OAuth access token, API key)
    Bearer(String),
    /// HTTP basic credentials (CalDAV servers)
    Basic { username: String, password: String },
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bearer(_) => f.write_str("Credential::Bearer(<redacted>)"),
            Self::Basic { username, .. } => {
                write!(f, "Credential::Basic {{ username: {username:?}, password: <redacted> }}")
            }
        }
    }
}
