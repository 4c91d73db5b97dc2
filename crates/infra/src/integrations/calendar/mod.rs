//! Calendar source fetchers
//!
//! One [`SourceFetcher`] per [`SourceKind`]:
//! - iCalendar feeds (HTTP or `webcal://`)
//! - CalDAV collections
//! - Google Calendar v3 (vendor API)
//! - Shift roster JSON API
//!
//! Fetchers are selected by the source's declared kind through the
//! [`FetcherRegistry`], which also records per-fetch timing.

pub mod ics;
pub mod providers;
mod time;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono_tz::Tz;
use homeboard_core::{FetchAuthority, FetchBatch, FetchRequest, SourceFetcher};
use homeboard_domain::{Config, Result, SourceKind};

pub use ics::{parse_calendar, ParsedCalendar};
pub use providers::{CalDavFetcher, GoogleCalendarFetcher, IcsFeedFetcher, RosterFetcher};

use crate::http::HttpClient;
use crate::observability::log_metric;
use crate::observability::metrics::FetchMetrics;

/// Shared dependencies of the built-in fetchers
#[derive(Clone)]
pub struct FetcherSettings {
    pub http: HttpClient,
    /// Zone used for floating (offset-less) upstream times
    pub timezone: Tz,
}

impl FetcherSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        let http = HttpClient::builder().timeout(config.sync.fetch_timeout()).build()?;
        Ok(Self { http, timezone: config.merge.timezone()? })
    }
}

/// Build the fetcher serving a source kind
pub fn create_fetcher(kind: SourceKind, settings: &FetcherSettings) -> Arc<dyn SourceFetcher> {
    match kind {
        SourceKind::IcsFeed => Arc::new(IcsFeedFetcher::new(settings.clone())),
        SourceKind::CalDav => Arc::new(CalDavFetcher::new(settings.clone())),
        SourceKind::VendorApi => Arc::new(GoogleCalendarFetcher::new(settings.clone())),
        SourceKind::Roster => Arc::new(RosterFetcher::new(settings.clone())),
    }
}

/// Fetchers keyed by source kind
pub struct FetcherRegistry {
    fetchers: HashMap<SourceKind, Arc<dyn SourceFetcher>>,
    metrics: Arc<FetchMetrics>,
}

impl FetcherRegistry {
    /// Empty registry
    pub fn new(metrics: Arc<FetchMetrics>) -> Self {
        Self { fetchers: HashMap::new(), metrics }
    }

    /// Registry holding the built-in fetcher for every kind
    pub fn with_defaults(settings: &FetcherSettings, metrics: Arc<FetchMetrics>) -> Self {
        let mut registry = Self::new(metrics);
        for kind in [SourceKind::IcsFeed, SourceKind::CalDav, SourceKind::VendorApi, SourceKind::Roster] {
            registry.register(create_fetcher(kind, settings));
        }
        registry
    }

    /// Install a fetcher for its kind, replacing any previous one
    pub fn register(&mut self, fetcher: Arc<dyn SourceFetcher>) {
        let metered = MeteredFetcher { inner: fetcher, metrics: Arc::clone(&self.metrics) };
        self.fetchers.insert(metered.kind(), Arc::new(metered));
    }

    pub fn get(&self, kind: SourceKind) -> Option<Arc<dyn SourceFetcher>> {
        self.fetchers.get(&kind).cloned()
    }

    pub fn metrics(&self) -> &Arc<FetchMetrics> {
        &self.metrics
    }
}

struct MeteredFetcher {
    inner: Arc<dyn SourceFetcher>,
    metrics: Arc<FetchMetrics>,
}

#[async_trait]
impl SourceFetcher for MeteredFetcher {
    fn kind(&self) -> SourceKind {
        self.inner.kind()
    }

    fn authority(&self) -> FetchAuthority {
        self.inner.authority()
    }

    async fn fetch(&self, request: FetchRequest<'_>) -> Result<FetchBatch> {
        let started = Instant::now();
        let result = self.inner.fetch(request).await;
        match &result {
            Ok(batch) => log_metric(
                self.metrics.record_fetch(started.elapsed(), batch.not_modified, batch.skipped),
                "fetch",
            ),
            Err(_) => log_metric(self.metrics.record_error(), "fetch_error"),
        }
        result
    }
}
