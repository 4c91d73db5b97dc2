//! Domain types and models

pub mod calendar;
pub mod live;
pub mod merge;
pub mod sync;

pub use calendar::{
    CalendarSource, CanonicalEvent, Credential, NativeEvent, SourceKind, SourceOptions,
    SyncedEvent, TimeWindow, WritePolicy,
};
pub use live::{ChangeKind, ChangeNotice, LiveMessage};
pub use merge::{EventOrigin, MergedEvent, MergedEvents};
pub use sync::{
    ActiveSchedule, SourceSyncResult, SyncAllSummary, SyncCycleReport, SyncFailure,
    TriggerOptions,
};
