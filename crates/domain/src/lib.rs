//! # Homeboard Domain
//!
//! Business domain types and models for the calendar engine.
//!
//! This crate contains:
//! - Calendar sources, synced and native events, time windows
//! - Sync cycle results, merged views and live-update messages
//! - Domain error types and Result definitions
//! - Configuration structures
//!
//! ## Architecture
//! - No dependencies on other Homeboard crates
//! - Only external dependencies allowed
//! - Pure domain models and data structures

pub mod config;
pub mod constants;
pub mod errors;
pub mod macros;
pub mod types;

// Re-export commonly used items
pub use config::*;
pub use errors::*;
pub use types::*;
