//! Merged calendar view served to display clients

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::calendar::TimeWindow;

/// Where a merged event came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventOrigin {
    /// Locally authored event
    Native { id: String },
    /// Event synced from an external source
    Synced { source_id: String, source_name: String, external_id: String },
}

impl EventOrigin {
    /// Source id for synced events
    pub fn source_id(&self) -> Option<&str> {
        match self {
            Self::Native { .. } => None,
            Self::Synced { source_id, .. } => Some(source_id),
        }
    }
}

/// One event in the display's unified list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedEvent {
    /// Identifier unique within a merged result
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub all_day: bool,
    pub location: Option<String>,
    pub color: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub participants: Vec<String>,
    pub origin: EventOrigin,
}

/// Result of a merged read
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedEvents {
    /// Echo of the requested window
    pub window: TimeWindow,
    pub events: Vec<MergedEvent>,
    /// Some origin could not be read; `events` lacks its contribution
    pub partial: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_sources: Vec<String>,
    pub generated_at: DateTime<Utc>,
    /// Most recent successful sync across contributing sources
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl MergedEvents {
    /// Empty but well-formed result used when nothing could be read
    pub fn empty(window: TimeWindow, generated_at: DateTime<Utc>) -> Self {
        Self {
            window,
            events: Vec::new(),
            partial: true,
            failed_sources: Vec::new(),
            generated_at,
            last_synced_at: None,
        }
    }
}
