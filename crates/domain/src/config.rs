//! Configuration management
//!
//! Every section has serde defaults so a file only needs to name what it
//! overrides. Sources and credentials are declared as tables keyed by id.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_NATIVE_COLOR, FALLBACK_EVENT_COLOR};
use crate::errors::{HomeboardError, Result};
use crate::types::{CalendarSource, Credential, SourceKind, SourceOptions, WritePolicy};

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub sync: SyncConfig,
    pub live: LiveConfig,
    pub rate_limit: RateLimitConfig,
    pub merge: MergeConfig,
    pub logging: LoggingConfig,
    pub sources: Vec<SourceConfig>,
    pub credentials: HashMap<String, CredentialConfig>,
}

impl Config {
    /// Check cross-field constraints that serde cannot express
    pub fn validate(&self) -> Result<()> {
        self.merge.timezone()?;

        if self.database.pool_size == 0 {
            return Err(HomeboardError::Config("database.pool_size must be at least 1".into()));
        }
        if self.rate_limit.max_tokens < 1.0 || self.rate_limit.refill_per_sec <= 0.0 {
            return Err(HomeboardError::Config(
                "rate_limit requires max_tokens >= 1 and refill_per_sec > 0".into(),
            ));
        }
        if self.live.max_missed_heartbeats == 0 || self.live.heartbeat_interval_secs == 0 {
            return Err(HomeboardError::Config(
                "live heartbeat interval and max_missed_heartbeats must be positive".into(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for source in &self.sources {
            if !seen.insert(source.id.as_str()) {
                return Err(HomeboardError::Config(format!("duplicate source id '{}'", source.id)));
            }
            source.to_source().validate().map_err(|e| HomeboardError::Config(e.to_string()))?;
        }
        Ok(())
    }
}

/// HTTP server configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Out-of-band credential for administrative endpoints. When absent,
    /// every administrative call is rejected.
    #[serde(skip_serializing)]
    pub admin_token: Option<String>,
    /// Tokens that kiosks present to be rate limited by identity rather
    /// than by network address.
    #[serde(skip_serializing)]
    pub display_tokens: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind_addr: "0.0.0.0:8080".to_string(), admin_token: None, display_tokens: Vec::new() }
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind_addr", &self.bind_addr)
            .field("admin_token", &self.admin_token.as_ref().map(|_| "<redacted>"))
            .field("display_tokens", &self.display_tokens.len())
            .finish()
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
    pub pool_size: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: "homeboard.db".to_string(), pool_size: 8 }
    }
}

/// Poll interval per source kind, in minutes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncIntervals {
    pub ics_feed_mins: u64,
    pub caldav_mins: u64,
    pub vendor_api_mins: u64,
    pub roster_mins: u64,
}

impl Default for SyncIntervals {
    fn default() -> Self {
        Self { ics_feed_mins: 30, caldav_mins: 15, vendor_api_mins: 5, roster_mins: 60 }
    }
}

/// Sync orchestration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub enabled: bool,
    pub intervals: SyncIntervals,
    pub fetch_timeout_secs: u64,
    pub credential_timeout_secs: u64,
    pub cycle_timeout_secs: u64,
    /// Minimum spacing between two cycles of one source unless forced
    pub min_trigger_interval_secs: u64,
    pub lookback_days: u32,
    pub lookahead_days: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            intervals: SyncIntervals::default(),
            fetch_timeout_secs: 30,
            credential_timeout_secs: 10,
            cycle_timeout_secs: 120,
            min_trigger_interval_secs: 15,
            lookback_days: 7,
            lookahead_days: 90,
        }
    }
}

impl SyncConfig {
    /// Poll interval for a source kind. Feeds poll less often than APIs
    /// that support incremental fetch.
    pub fn interval_for(&self, kind: SourceKind) -> Duration {
        let mins = match kind {
            SourceKind::IcsFeed => self.intervals.ics_feed_mins,
            SourceKind::CalDav => self.intervals.caldav_mins,
            SourceKind::VendorApi => self.intervals.vendor_api_mins,
            SourceKind::Roster => self.intervals.roster_mins,
        };
        Duration::from_secs(mins.max(1) * 60)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn credential_timeout(&self) -> Duration {
        Duration::from_secs(self.credential_timeout_secs)
    }

    pub fn cycle_timeout(&self) -> Duration {
        Duration::from_secs(self.cycle_timeout_secs)
    }

    pub fn min_trigger_interval(&self) -> Duration {
        Duration::from_secs(self.min_trigger_interval_secs)
    }
}

/// Live update channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    pub heartbeat_interval_secs: u64,
    /// Heartbeats a client may miss before it is reaped
    pub max_missed_heartbeats: u32,
    /// Buffered frames per client
    pub channel_capacity: usize,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self { heartbeat_interval_secs: 25, max_missed_heartbeats: 3, channel_capacity: 32 }
    }
}

/// Rate guard configuration for the display read path
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_tokens: f64,
    pub refill_per_sec: f64,
    pub retention_secs: u64,
    pub max_buckets: usize,
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_tokens: 60.0,
            refill_per_sec: 1.0,
            retention_secs: 600,
            max_buckets: 10_000,
            sweep_interval_secs: 60,
        }
    }
}

/// Event merge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    pub default_native_color: String,
    /// IANA zone used for all-day boundaries and floating times
    pub timezone: String,
    /// Collapse the same event reported by several sources
    pub dedupe_across_sources: bool,
    /// Window length used when a read omits `end`
    pub default_window_days: u32,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            default_native_color: DEFAULT_NATIVE_COLOR.to_string(),
            timezone: "UTC".to_string(),
            dedupe_across_sources: true,
            default_window_days: 7,
        }
    }
}

impl MergeConfig {
    /// Parsed household timezone
    pub fn timezone(&self) -> Result<chrono_tz::Tz> {
        self.timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|e| HomeboardError::Config(format!("invalid merge.timezone: {e}")))
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: LogFormat::Pretty }
    }
}

/// Declared calendar source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    pub kind: SourceKind,
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
    pub url: String,
    #[serde(default)]
    pub credential_ref: Option<String>,
    #[serde(default)]
    pub write_policy: WritePolicy,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub options: SourceOptions,
}

fn default_true() -> bool {
    true
}

impl SourceConfig {
    /// Source descriptor with empty bookkeeping
    pub fn to_source(&self) -> CalendarSource {
        let mut source = CalendarSource::new(&self.id, self.kind, &self.name, &self.url);
        source.color = self.color.clone().unwrap_or_else(|| FALLBACK_EVENT_COLOR.to_string());
        source.credential_ref.clone_from(&self.credential_ref);
        source.write_policy = self.write_policy;
        source.enabled = self.enabled;
        source.options = self.options.clone();
        source
    }
}

/// Secret material of a configured credential
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CredentialSecret {
    Bearer { token: String },
    Basic { username: String, password: String },
}

impl fmt::Debug for CredentialSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bearer { .. } => f.write_str("Bearer { token: <redacted> }"),
            Self::Basic { username, .. } => {
                write!(f, "Basic {{ username: {username:?}, password: <redacted> }}")
            }
        }
    }
}

/// Credential entry referenced by `SourceConfig::credential_ref`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialConfig {
    #[serde(flatten)]
    pub secret: CredentialSecret,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl CredentialConfig {
    pub fn credential(&self) -> Credential {
        match &self.secret {
            CredentialSecret::Bearer { token } => Credential::Bearer(token.clone()),
            CredentialSecret::Basic { username, password } => {
                Credential::Basic { username: username.clone(), password: password.clone() }
            }
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}
