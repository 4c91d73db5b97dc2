//! Per-source post-processing applied to merged events

use std::sync::Arc;

use async_trait::async_trait;
use homeboard_domain::{CalendarSource, MergedEvent, Result};

use crate::calendar::ports::UserDirectory;

/// Source-specific rewrite of merged events
///
/// Processors run after colour attribution and before sorting. A failing
/// processor is logged and skipped.
#[async_trait]
pub trait EventPostProcessor: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Whether this processor is configured for `source`
    fn applies_to(&self, source: &CalendarSource) -> bool;

    async fn process(&self, source: &CalendarSource, events: &mut [MergedEvent]) -> Result<()>;
}

/// Colours events by their first participant known to the household
/// directory, for sources with `resolve_participant_colors` set.
pub struct ParticipantColorProcessor {
    directory: Arc<dyn UserDirectory>,
}

impl ParticipantColorProcessor {
    pub fn new(directory: Arc<dyn UserDirectory>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl EventPostProcessor for ParticipantColorProcessor {
    fn name(&self) -> &'static str {
        "participant_color"
    }

    fn applies_to(&self, source: &CalendarSource) -> bool {
        source.options.resolve_participant_colors
    }

    async fn process(&self, _source: &CalendarSource, events: &mut [MergedEvent]) -> Result<()> {
        if events.iter().all(|event| event.participants.is_empty()) {
            return Ok(());
        }

        let colors = self.directory.member_colors().await?;
        for event in events.iter_mut() {
            let resolved = event
                .participants
                .iter()
                .find_map(|participant| colors.get(&participant.trim().to_lowercase()));
            if let Some(color) = resolved {
                event.color.clone_from(color);
            }
        }
        Ok(())
    }
}
