//! Health check infrastructure for AppContext components
//!
//! Provides HealthStatus and ComponentHealth types reported by `GET /health`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Share of healthy components required for the service to count as healthy
const HEALTHY_THRESHOLD: f64 = 0.8;

/// Overall health status of the service
///
/// # Example
/// ```
/// use homeboard_api::utils::health::{ComponentHealth, HealthStatus};
///
/// let mut status = HealthStatus::new()
///     .add_component(ComponentHealth::healthy("database"))
///     .add_component(ComponentHealth::unhealthy("scheduler", "stopped"));
/// status.calculate_score();
///
/// assert_eq!(status.score, 0.5);
/// assert!(!status.is_healthy);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Overall health indicator
    pub is_healthy: bool,

    /// Health score from 0.0 (completely unhealthy) to 1.0 (fully healthy)
    pub score: f64,

    pub version: String,

    /// Individual component health checks
    pub components: Vec<ComponentHealth>,

    pub checked_at: DateTime<Utc>,
}

impl HealthStatus {
    /// Healthy status with score 1.0 and no components
    pub fn new() -> Self {
        Self {
            is_healthy: true,
            score: 1.0,
            version: env!("CARGO_PKG_VERSION").to_string(),
            components: Vec::new(),
            checked_at: Utc::now(),
        }
    }

    /// Add a component health check to the status
    pub fn add_component(mut self, component: ComponentHealth) -> Self {
        self.components.push(component);
        self
    }

    /// Recompute `score` and `is_healthy` from the components.
    ///
    /// Should be called after all components have been added.
    #[allow(clippy::cast_precision_loss)]
    pub fn calculate_score(&mut self) {
        if self.components.is_empty() {
            return;
        }

        let healthy_count = self.components.iter().filter(|c| c.is_healthy).count();

        self.score = healthy_count as f64 / self.components.len() as f64;
        self.is_healthy = self.score >= HEALTHY_THRESHOLD;
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Health status of an individual component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    /// Component identifier (e.g., "database", "scheduler")
    pub name: String,

    pub is_healthy: bool,

    /// Optional message describing health state or error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ComponentHealth {
    pub fn healthy(name: impl Into<String>) -> Self {
        Self { name: name.into(), is_healthy: true, message: None }
    }

    /// Healthy component carrying an informational message
    pub fn healthy_with(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self { name: name.into(), is_healthy: true, message: Some(message.into()) }
    }

    pub fn unhealthy(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self { name: name.into(), is_healthy: false, message: Some(message.into()) }
    }
}
