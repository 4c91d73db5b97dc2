//! Messages pushed over the live update channel

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::impl_domain_status_conversions;

/// What happened to the entity named in a notice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
    /// A sync cycle changed a batch of events for one source
    Synced,
}

impl_domain_status_conversions!(ChangeKind {
    Created => "created",
    Updated => "updated",
    Deleted => "deleted",
    Synced => "synced",
});

/// "Something changed, refetch" notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeNotice {
    pub domain: String,
    pub kind: ChangeKind,
    pub entity_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    pub at: DateTime<Utc>,
}

impl ChangeNotice {
    /// Notice for a calendar mutation
    pub fn calendar(kind: ChangeKind, entity_id: impl Into<String>, source_id: Option<String>) -> Self {
        Self {
            domain: crate::constants::CALENDAR_DOMAIN.to_string(),
            kind,
            entity_id: entity_id.into(),
            source_id,
            at: Utc::now(),
        }
    }
}

/// Frame delivered to a connected display
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LiveMessage {
    Connected { client_id: String, at: DateTime<Utc> },
    Heartbeat { at: DateTime<Utc> },
    Change(ChangeNotice),
}

impl LiveMessage {
    /// Event name used on the SSE stream
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Heartbeat { .. } => "heartbeat",
            Self::Change(_) => "change",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_message_serializes_flat() {
        let notice = ChangeNotice::calendar(ChangeKind::Synced, "family", Some("family".into()));
        let json = serde_json::to_value(LiveMessage::Change(notice)).unwrap();
        assert_eq!(json["type"], "change");
        assert_eq!(json["domain"], "calendar");
        assert_eq!(json["kind"], "synced");
        assert_eq!(json["entity_id"], "family");
    }
}
