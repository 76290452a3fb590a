//! Configuration for the replicator.
//!
//! [`ReplicatorConfig`] is passed to
//! [`ReplicatorEngine::new()`](crate::ReplicatorEngine::new) and can be built
//! programmatically, deserialized from YAML/JSON, or read from the
//! environment with [`ReplicatorConfig::from_env()`].
//!
//! # Quick Start
//!
//! ```rust
//! use configmap_replicator::config::ReplicatorConfig;
//!
//! let config = ReplicatorConfig {
//!     reconciliation_interval: "30s".into(),
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! ReplicatorConfig
//! ├── reconciliation_interval: String       # Full resync period ("1m")
//! ├── default_excluded_partitions: [String] # Deny-list when unannotated
//! ├── default_allowed_partitions: [String]  # Allow-list when unannotated
//! ├── max_concurrent_targets: usize         # Fan-out bulkhead
//! ├── watch_retry: WatchRetryConfig         # Watch re-establishment backoff
//! ├── rate_limit: RateLimitSettings         # Optional write throttle
//! └── shutdown_timeout: String              # Lane drain timeout
//! ```
//!
//! # Environment
//!
//! | Variable | Field |
//! |----------|-------|
//! | `REPLICATOR_INTERVAL` | `reconciliation_interval` |
//! | `REPLICATOR_EXCLUDED_NAMESPACES` | `default_excluded_partitions` (comma-separated) |
//! | `REPLICATOR_ALLOWED_NAMESPACES` | `default_allowed_partitions` (comma-separated) |
//! | `REPLICATOR_MAX_CONCURRENT_TARGETS` | `max_concurrent_targets` |

use crate::error::{ReplicatorError, Result};
use crate::policy::{check_disjoint, parse_partition_list, PolicyDefaults, DEFAULT_EXCLUDED_PARTITION};
use crate::resilience::{ThrottleConfig, WatchBackoff};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const ENV_INTERVAL: &str = "REPLICATOR_INTERVAL";
pub const ENV_EXCLUDED: &str = "REPLICATOR_EXCLUDED_NAMESPACES";
pub const ENV_ALLOWED: &str = "REPLICATOR_ALLOWED_NAMESPACES";
pub const ENV_MAX_CONCURRENT: &str = "REPLICATOR_MAX_CONCURRENT_TARGETS";

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicatorConfig {
    /// Period of the full resync pass, as a duration string (e.g. "1m").
    /// Invalid or zero values are rejected at startup.
    #[serde(default = "default_reconciliation_interval")]
    pub reconciliation_interval: String,

    /// Deny-list applied to objects that carry no deny-list annotation.
    #[serde(default = "default_excluded_partitions")]
    pub default_excluded_partitions: Vec<String>,

    /// Allow-list applied to objects that carry no allow-list annotation.
    #[serde(default)]
    pub default_allowed_partitions: Vec<String>,

    /// Maximum per-target operations in flight across all objects.
    #[serde(default = "default_max_concurrent_targets")]
    pub max_concurrent_targets: usize,

    #[serde(default)]
    pub watch_retry: WatchRetryConfig,

    #[serde(default)]
    pub rate_limit: RateLimitSettings,

    /// How long shutdown waits for in-flight work, as a duration string.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: String,
}

fn default_reconciliation_interval() -> String {
    "1m".to_string()
}

fn default_excluded_partitions() -> Vec<String> {
    vec![DEFAULT_EXCLUDED_PARTITION.to_string()]
}

fn default_max_concurrent_targets() -> usize {
    32
}

fn default_shutdown_timeout() -> String {
    "10s".to_string()
}

impl Default for ReplicatorConfig {
    fn default() -> Self {
        Self {
            reconciliation_interval: default_reconciliation_interval(),
            default_excluded_partitions: default_excluded_partitions(),
            default_allowed_partitions: Vec::new(),
            max_concurrent_targets: default_max_concurrent_targets(),
            watch_retry: WatchRetryConfig::default(),
            rate_limit: RateLimitSettings::default(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

impl ReplicatorConfig {
    /// Fast timings for tests: short resync, fast watch retry, no default lists.
    pub fn for_testing() -> Self {
        Self {
            reconciliation_interval: "100ms".to_string(),
            default_excluded_partitions: Vec::new(),
            default_allowed_partitions: Vec::new(),
            max_concurrent_targets: 8,
            watch_retry: WatchRetryConfig {
                initial_delay_ms: 10,
                max_delay_ms: 100,
                backoff_factor: 2.0,
            },
            rate_limit: RateLimitSettings::default(),
            shutdown_timeout: "2s".to_string(),
        }
    }

    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    ///
    /// Unset variables leave the field alone. A value that cannot be parsed
    /// is a configuration error.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(interval) = lookup(ENV_INTERVAL) {
            self.reconciliation_interval = interval;
        }
        if let Some(excluded) = lookup(ENV_EXCLUDED) {
            self.default_excluded_partitions = parse_partition_list(&excluded).into_iter().collect();
        }
        if let Some(allowed) = lookup(ENV_ALLOWED) {
            self.default_allowed_partitions = parse_partition_list(&allowed).into_iter().collect();
        }
        if let Some(max) = lookup(ENV_MAX_CONCURRENT) {
            self.max_concurrent_targets = max.parse().map_err(|e| {
                ReplicatorError::Config(format!("{}={:?}: {}", ENV_MAX_CONCURRENT, max, e))
            })?;
        }
        Ok(self)
    }

    /// Parsed resync period. Zero is rejected: it would spin.
    pub fn reconciliation_interval(&self) -> Result<Duration> {
        let interval = parse_duration("reconciliation_interval", &self.reconciliation_interval)?;
        if interval.is_zero() {
            return Err(ReplicatorError::Config(
                "reconciliation_interval must be greater than zero".to_string(),
            ));
        }
        Ok(interval)
    }

    pub fn shutdown_timeout(&self) -> Result<Duration> {
        parse_duration("shutdown_timeout", &self.shutdown_timeout)
    }

    /// Check the whole configuration. Called by the engine constructor.
    pub fn validate(&self) -> Result<()> {
        self.reconciliation_interval()?;
        self.shutdown_timeout()?;

        if self.max_concurrent_targets == 0 {
            return Err(ReplicatorError::Config(
                "max_concurrent_targets must be greater than zero".to_string(),
            ));
        }

        let defaults = self.policy_defaults();
        check_disjoint(&defaults.allowed, &defaults.excluded)
            .map_err(|e| ReplicatorError::Config(format!("default partition lists: {}", e)))?;

        self.watch_retry.validate()?;
        Ok(())
    }

    pub fn policy_defaults(&self) -> PolicyDefaults {
        PolicyDefaults {
            allowed: self.default_allowed_partitions.iter().cloned().collect(),
            excluded: self.default_excluded_partitions.iter().cloned().collect(),
        }
    }

    pub fn watch_backoff(&self) -> WatchBackoff {
        self.watch_retry.to_backoff()
    }

    /// Write throttle settings, `None` when disabled.
    pub fn throttle_config(&self) -> Option<ThrottleConfig> {
        self.rate_limit.to_throttle_config()
    }
}

fn parse_duration(field: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value)
        .map_err(|e| ReplicatorError::Config(format!("invalid {} {:?}: {}", field, value, e)))
}

// ═══════════════════════════════════════════════════════════════════════════════
// WatchRetryConfig
// ═══════════════════════════════════════════════════════════════════════════════

/// Backoff for re-establishing the watch after it breaks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchRetryConfig {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_backoff_factor() -> f64 {
    2.0
}

impl Default for WatchRetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

impl WatchRetryConfig {
    fn validate(&self) -> Result<()> {
        if !(self.backoff_factor.is_finite() && self.backoff_factor >= 1.0) {
            return Err(ReplicatorError::Config(format!(
                "watch_retry.backoff_factor must be >= 1.0, got {}",
                self.backoff_factor
            )));
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(ReplicatorError::Config(
                "watch_retry.max_delay_ms must not be below initial_delay_ms".to_string(),
            ));
        }
        Ok(())
    }

    pub fn to_backoff(&self) -> WatchBackoff {
        WatchBackoff {
            initial: Duration::from_millis(self.initial_delay_ms),
            ceiling: Duration::from_millis(self.max_delay_ms),
            factor: self.backoff_factor,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RateLimitSettings
// ═══════════════════════════════════════════════════════════════════════════════

/// Client-side throttle for replica writes (QPS/burst).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitSettings {
    #[serde(default)]
    pub enabled: bool,

    /// Sustained writes per second.
    #[serde(default = "default_rate_limit_per_sec")]
    pub per_sec: u32,

    #[serde(default = "default_rate_limit_burst")]
    pub burst: u32,
}

fn default_rate_limit_per_sec() -> u32 {
    50
}

fn default_rate_limit_burst() -> u32 {
    100
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            per_sec: default_rate_limit_per_sec(),
            burst: default_rate_limit_burst(),
        }
    }
}

impl RateLimitSettings {
    pub fn to_throttle_config(&self) -> Option<ThrottleConfig> {
        self.enabled.then(|| ThrottleConfig {
            burst: self.burst,
            per_sec: self.per_sec,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
