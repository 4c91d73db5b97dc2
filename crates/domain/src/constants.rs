//! Application constants
//!
//! Centralized location for domain-level constants used throughout the
//! engine.

/// Domain name carried by change notices for calendar mutations
pub const CALENDAR_DOMAIN: &str = "calendar";

/// Colour used for synced events when neither event nor source sets one
pub const FALLBACK_EVENT_COLOR: &str = "#64748b";

/// Colour attributed to locally authored events by default
pub const DEFAULT_NATIVE_COLOR: &str = "#4f46e5";

/// Title substituted for upstream events without a summary
pub const UNTITLED_EVENT: &str = "Untitled event";

/// Maximum length kept for an error message recorded on a source
pub const MAX_SOURCE_ERROR_LENGTH: usize = 500;
