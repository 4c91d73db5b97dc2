//! Modular common utilities shared across Homeboard crates.
//!
//! # Feature Tiers
//!
//! Enable cargo features to opt into the tiers you need:
//! - (always): constant-time comparison helpers
//! - `runtime`: clock abstraction and the keyed token-bucket rate guard
//! - `test-utils`: everything in `runtime`, for downstream test suites

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod security;

// Runtime tier
// --------------------------------------------------------------------
#[cfg(feature = "runtime")]
pub mod resilience;

// Re-export commonly used types and traits for convenience
// ------------------------
#[cfg(feature = "runtime")]
pub use resilience::{
    Clock, MockClock, RateDecision, RateGuard, RateGuardConfig, SweepStats, SystemClock,
};
pub use security::constant_time_eq;
