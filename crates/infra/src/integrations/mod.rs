//! External calendar integrations

pub mod calendar;

pub use calendar::{create_fetcher, FetcherRegistry, FetcherSettings};
