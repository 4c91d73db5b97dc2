//! Live update fan-out to connected displays

pub mod broadcaster;

pub use broadcaster::{HeartbeatStats, LiveBroadcaster, LiveSettings, LiveSubscription};
