//! Shared HTTP client used by the source fetchers

mod client;

pub use client::{HttpClient, HttpClientBuilder};
