//! Per-identity token-bucket rate limiting
//!
//! Each identity (display token, peer address, ...) owns a bucket holding at
//! most `max_tokens` tokens that refill continuously at `refill_per_sec`.
//! A request consumes one token when at least one whole token is available;
//! rejected requests consume nothing.
//!
//! Buckets are created lazily. A periodic sweep drops buckets idle for longer
//! than the retention window and then trims the oldest-by-access buckets until
//! the population is back under `max_buckets`, which bounds memory when
//! identities churn (e.g. spoofed addresses). A new identity arriving over
//! the cap evicts the single least recently used bucket. State is
//! process-local and resets on restart.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{Clock, SystemClock};

/// Configuration for the rate guard
#[derive(Debug, Clone)]
pub struct RateGuardConfig {
    /// Maximum number of tokens a bucket can hold
    pub max_tokens: f64,
    /// Tokens added per second of elapsed time
    pub refill_per_sec: f64,
    /// Buckets untouched for longer than this are evicted by the sweep
    pub retention: Duration,
    /// Hard cap on the number of tracked identities
    pub max_buckets: usize,
}

impl Default for RateGuardConfig {
    fn default() -> Self {
        Self {
            max_tokens: 60.0,
            refill_per_sec: 1.0,
            retention: Duration::from_secs(600),
            max_buckets: 10_000,
        }
    }
}

impl RateGuardConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if !(self.max_tokens >= 1.0) {
            return Err("max_tokens must be at least 1".to_string());
        }
        if !(self.refill_per_sec > 0.0) {
            return Err("refill_per_sec must be greater than 0".to_string());
        }
        if self.max_buckets == 0 {
            return Err("max_buckets must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Outcome of a single admission check
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateDecision {
    /// Request admitted; `remaining` whole tokens are left afterwards
    Allowed {
        /// Whole tokens left in the bucket
        remaining: u64,
    },
    /// Request rejected; one token becomes available after `retry_after`
    Rejected {
        /// Time until the next token is available
        retry_after: Duration,
        /// Whole tokens left in the bucket (always 0)
        remaining: u64,
    },
}

impl RateDecision {
    /// True when the request was admitted
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }

    /// Whole tokens remaining after this decision
    pub fn remaining(&self) -> u64 {
        match self {
            Self::Allowed { remaining } | Self::Rejected { remaining, .. } => *remaining,
        }
    }
}

/// Result of an eviction sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Buckets removed because they were idle past the retention window
    pub expired: usize,
    /// Buckets removed to bring the population under the cap
    pub trimmed: usize,
    /// Buckets still tracked after the sweep
    pub remaining: usize,
}

#[derive(Debug, Clone, Copy)]
struct RateBucket {
    tokens: f64,
    last_refill: Instant,
    last_access: Instant,
}

impl RateBucket {
    fn full(capacity: f64, now: Instant) -> Self {
        Self { tokens: capacity, last_refill: now, last_access: now }
    }

    fn refill(&mut self, now: Instant, config: &RateGuardConfig) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * config.refill_per_sec).min(config.max_tokens);
            self.last_refill = now;
        }
    }
}

/// Keyed token-bucket limiter guarding the public read path
///
/// # Examples
///
/// ```rust
/// use homeboard_common::resilience::{RateGuard, RateGuardConfig};
///
/// let guard = RateGuard::new(RateGuardConfig::default()).expect("valid config");
/// let decision = guard.check("kiosk-kitchen");
/// assert!(decision.is_allowed());
/// ```
pub struct RateGuard<C: Clock = SystemClock> {
    config: RateGuardConfig,
    buckets: DashMap<String, RateBucket>,
    clock: Arc<C>,
}

impl RateGuard<SystemClock> {
    /// Create a new rate guard with the system clock
    pub fn new(config: RateGuardConfig) -> Result<Self, String> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> RateGuard<C> {
    /// Create a new rate guard with a custom clock
    pub fn with_clock(config: RateGuardConfig, clock: C) -> Result<Self, String> {
        config.validate()?;
        Ok(Self { config, buckets: DashMap::new(), clock: Arc::new(clock) })
    }

    /// Active configuration
    pub fn config(&self) -> &RateGuardConfig {
        &self.config
    }

    /// Admit or reject one request for `identity`.
    pub fn check(&self, identity: &str) -> RateDecision {
        let now = self.clock.now();
        let inserted = !self.buckets.contains_key(identity);

        let decision = {
            let mut bucket = self
                .buckets
                .entry(identity.to_string())
                .or_insert_with(|| RateBucket::full(self.config.max_tokens, now));

            bucket.refill(now, &self.config);
            bucket.last_access = now;

            if bucket.tokens >= 1.0 {
                bucket.tokens -= 1.0;
                RateDecision::Allowed { remaining: whole_tokens(bucket.tokens) }
            } else {
                let missing = 1.0 - bucket.tokens;
                let retry_after = Duration::try_from_secs_f64(missing / self.config.refill_per_sec)
                    .unwrap_or(Duration::MAX);
                RateDecision::Rejected { retry_after, remaining: 0 }
            }
        };

        if inserted && self.buckets.len() > self.config.max_buckets && self.evict_oldest(identity) {
            debug!(cap = self.config.max_buckets, "rate guard over cap, evicted oldest bucket");
        }

        if !decision.is_allowed() {
            debug!(identity, "rate limit exceeded");
        }

        decision
    }

    /// Whole tokens currently available to `identity` without consuming any.
    ///
    /// Returns `None` for identities with no bucket yet.
    pub fn remaining(&self, identity: &str) -> Option<u64> {
        let now = self.clock.now();
        self.buckets.get_mut(identity).map(|mut bucket| {
            bucket.refill(now, &self.config);
            whole_tokens(bucket.tokens)
        })
    }

    /// Number of tracked identities
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// True when no identity is tracked
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Evict idle buckets, then trim oldest-by-access buckets over the cap.
    pub fn sweep(&self) -> SweepStats {
        let now = self.clock.now();
        let retention = self.config.retention;

        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now.saturating_duration_since(bucket.last_access) <= retention);
        let expired = before - self.buckets.len();

        let trimmed = if self.buckets.len() > self.config.max_buckets {
            self.trim_oldest(self.config.max_buckets)
        } else {
            0
        };

        SweepStats { expired, trimmed, remaining: self.buckets.len() }
    }

    /// Drop the least recently used bucket other than `keep` with one scan
    fn evict_oldest(&self, keep: &str) -> bool {
        let oldest = self
            .buckets
            .iter()
            .filter(|entry| entry.key() != keep)
            .min_by_key(|entry| entry.value().last_access)
            .map(|entry| entry.key().clone());
        oldest.is_some_and(|key| self.buckets.remove(&key).is_some())
    }

    fn trim_oldest(&self, cap: usize) -> usize {
        let mut by_access: Vec<(String, Instant)> = self
            .buckets
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().last_access))
            .collect();

        if by_access.len() <= cap {
            return 0;
        }

        by_access.sort_by_key(|(_, last_access)| *last_access);
        let excess = by_access.len() - cap;

        by_access
            .into_iter()
            .take(excess)
            .filter(|(key, _)| self.buckets.remove(key).is_some())
            .count()
    }
}

impl<C: Clock> RateGuard<C> {
    /// Spawn the periodic eviction sweep.
    ///
    /// The task exits when `cancel` fires; callers own the join handle.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        debug!("rate guard sweeper cancelled");
                        break;
                    }
                    _ = ticker.tick() => {
                        let stats = self.sweep();
                        if stats.expired > 0 || stats.trimmed > 0 {
                            info!(
                                expired = stats.expired,
                                trimmed = stats.trimmed,
                                remaining = stats.remaining,
                                "rate guard sweep"
                            );
                        }
                    }
                }
            }
        })
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn whole_tokens(tokens: f64) -> u64 {
    tokens.max(0.0).floor() as u64
}
