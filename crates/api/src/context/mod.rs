//! Application context - dependency injection container

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use homeboard_common::{RateGuard, RateGuardConfig};
use homeboard_core::{
    ChangeNotifier, EventStore, ExecutorSettings, MergeService, MergeSettings,
    NativeEventRepository, ParticipantColorProcessor, SourceRepository, SyncExecutor,
    UserDirectory,
};
use homeboard_domain::{Config, HomeboardError, RateLimitConfig, Result};
use homeboard_infra::observability::metrics::{FetchMetrics, SyncMetrics};
use homeboard_infra::{
    ConfigCredentialStore, DbManager, FetcherRegistry, FetcherSettings, LiveBroadcaster,
    LiveSettings, OrchestratorSettings, SqliteEventStore, SqliteNativeEventRepository,
    SqliteSourceRepository, SqliteUserDirectory, SyncOrchestrator,
};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::utils::health::{ComponentHealth, HealthStatus};

/// Rate guard configuration from the `rate_limit` section
pub fn rate_guard_config(config: &RateLimitConfig) -> RateGuardConfig {
    RateGuardConfig {
        max_tokens: config.max_tokens,
        refill_per_sec: config.refill_per_sec,
        retention: Duration::from_secs(config.retention_secs),
        max_buckets: config.max_buckets,
    }
}

/// Application context - holds all services and dependencies
pub struct AppContext {
    pub config: Config,
    pub db: Arc<DbManager>,
    pub sources: Arc<dyn SourceRepository>,
    pub orchestrator: SyncOrchestrator,
    pub merge: Arc<MergeService>,
    pub broadcaster: LiveBroadcaster,
    pub rate_guard: Arc<RateGuard>,
    pub fetch_metrics: Arc<FetchMetrics>,
    display_tokens: HashSet<String>,
    background: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl AppContext {
    /// Open the database, apply migrations and wire every service.
    ///
    /// Nothing runs in the background until [`AppContext::start`].
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let db = Arc::new(DbManager::new(&config.database.path, config.database.pool_size)?);
        db.run_migrations()?;

        let sources: Arc<dyn SourceRepository> =
            Arc::new(SqliteSourceRepository::new(Arc::clone(&db)));
        let events: Arc<dyn EventStore> = Arc::new(SqliteEventStore::new(Arc::clone(&db)));
        let native: Arc<dyn NativeEventRepository> =
            Arc::new(SqliteNativeEventRepository::new(Arc::clone(&db)));
        let directory: Arc<dyn UserDirectory> =
            Arc::new(SqliteUserDirectory::new(Arc::clone(&db)));

        let broadcaster = LiveBroadcaster::new(LiveSettings::from_config(&config.live));
        let notifier: Arc<dyn ChangeNotifier> = Arc::new(broadcaster.clone());

        let executor = Arc::new(SyncExecutor::new(
            Arc::clone(&sources),
            Arc::clone(&events),
            Arc::new(ConfigCredentialStore::from_config(&config)),
            notifier,
            ExecutorSettings::from_config(&config.sync),
        ));

        let fetch_metrics = Arc::new(FetchMetrics::new());
        let fetchers = Arc::new(FetcherRegistry::with_defaults(
            &FetcherSettings::from_config(&config)?,
            Arc::clone(&fetch_metrics),
        ));

        let orchestrator = SyncOrchestrator::new(
            executor,
            fetchers,
            Arc::clone(&sources),
            Arc::clone(&events),
            broadcaster.clone(),
            Arc::new(SyncMetrics::new()),
            OrchestratorSettings::from_config(&config.sync),
        );

        let merge = Arc::new(
            MergeService::new(
                Arc::clone(&sources),
                events,
                native,
                MergeSettings::from_config(&config.merge)?,
            )
            .with_processor(Arc::new(ParticipantColorProcessor::new(directory))),
        );

        let rate_guard = Arc::new(
            RateGuard::new(rate_guard_config(&config.rate_limit))
                .map_err(|e| HomeboardError::Config(format!("rate_limit: {e}")))?,
        );

        let display_tokens = config
            .server
            .display_tokens
            .iter()
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
            .collect();

        info!(
            db_path = %config.database.path,
            sources = config.sources.len(),
            sync_enabled = config.sync.enabled,
            "application context created"
        );

        Ok(Self {
            config,
            db,
            sources,
            orchestrator,
            merge,
            broadcaster,
            rate_guard,
            fetch_metrics,
            display_tokens,
            background: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Seed configured sources, install schedules and spawn the heartbeat
    /// and rate guard sweeper.
    pub async fn start(&self) -> Result<()> {
        let seeded = self.orchestrator.seed_sources(&self.config.sources).await?;
        let scheduled = self.orchestrator.start().await?;

        let sweep_every = Duration::from_secs(self.config.rate_limit.sweep_interval_secs.max(1));
        let mut tasks = self.tasks.lock();
        tasks.push(self.broadcaster.spawn_heartbeat(self.background.child_token()));
        tasks.push(
            Arc::clone(&self.rate_guard).spawn_sweeper(sweep_every, self.background.child_token()),
        );

        info!(seeded, scheduled, "background services started");
        Ok(())
    }

    /// True when `token` is one of the configured display tokens
    pub fn is_display_token(&self, token: &str) -> bool {
        self.display_tokens.contains(token)
    }

    /// Aggregate health of the database and the background services
    pub async fn health_check(&self) -> HealthStatus {
        let mut status = HealthStatus::new()
            .add_component(self.check_database_health().await)
            .add_component(ComponentHealth::healthy_with(
                "scheduler",
                format!("{} active schedules", self.orchestrator.list_active().len()),
            ))
            .add_component(ComponentHealth::healthy_with(
                "live",
                format!("{} connected clients", self.broadcaster.client_count()),
            ));
        status.calculate_score();
        status
    }

    /// Check database health by attempting a simple query
    ///
    /// Uses spawn_blocking to avoid blocking the async runtime with synchronous
    /// database operations.
    async fn check_database_health(&self) -> ComponentHealth {
        let db = Arc::clone(&self.db);
        match tokio::task::spawn_blocking(move || db.health_check()).await {
            Ok(Ok(())) => ComponentHealth::healthy("database"),
            Ok(Err(e)) => {
                warn!(error = %e, "database health check failed");
                ComponentHealth::unhealthy("database", format!("query failed: {e}"))
            }
            Err(e) => {
                warn!(error = %e, "database health check task panicked");
                ComponentHealth::unhealthy("database", format!("task panic: {e}"))
            }
        }
    }

    /// Stop schedules, the heartbeat and the sweeper
    pub async fn shutdown(&self) {
        info!("shutdown called on AppContext");

        self.orchestrator.shutdown().await;
        self.background.cancel();

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "background task failed during shutdown");
            }
        }
    }
}
