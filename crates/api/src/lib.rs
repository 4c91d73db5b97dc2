//! # Homeboard API
//!
//! HTTP layer of the household calendar display.
//!
//! This crate contains:
//! - The axum router: merged calendar reads, the live SSE stream, sync
//!   status and the administrative source/sync endpoints
//! - Application context (dependency injection)
//! - Request guards: per-identity rate limiting and the admin token
//!
//! ## Architecture
//! - Depends on `homeboard-common`, `homeboard-domain`, `homeboard-core`
//!   and `homeboard-infra`
//! - Wires up the hexagonal architecture
//! - Display-facing reads degrade instead of failing; operator endpoints
//!   surface errors as JSON

use std::sync::Arc;

pub mod auth;
pub mod context;
pub mod error;
pub mod rate_limit;
pub mod routes;
pub mod utils;

pub use context::AppContext;
pub use error::ApiError;
pub use routes::router;

/// Shared state handed to every handler
pub type AppState = Arc<AppContext>;
