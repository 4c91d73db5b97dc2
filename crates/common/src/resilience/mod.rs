//! Resilience primitives for the request path
//!
//! - **Clock**: monotonic/wall time abstraction so time-based logic can be
//!   driven deterministically from tests (`MockClock`)
//! - **Rate Guard**: per-identity token buckets with idle eviction and a hard
//!   population cap

pub mod clock;
pub mod rate_limiter;

pub use clock::{Clock, MockClock, SystemClock};
pub use rate_limiter::{RateDecision, RateGuard, RateGuardConfig, SweepStats};
