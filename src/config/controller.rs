//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

/// Output format for the tracing subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "text" | "plain" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
/// Environment variables are populated from a ConfigMap using `envFrom` in the deployment.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Port for `/metrics`, `/healthz` and `/readyz`
    pub metrics_port: u16,
    /// Requeue interval after a successful reconciliation (seconds)
    /// This is the periodic resync that corrects drift nobody told us about
    pub resync_interval_secs: u64,
    /// Requeue delay after an optimistic-concurrency conflict (seconds)
    pub conflict_requeue_secs: u64,
    /// Minimum error backoff (seconds)
    pub backoff_min_secs: u64,
    /// Maximum error backoff (seconds)
    pub backoff_max_secs: u64,
    /// Timeout for a single sops/gpg invocation (seconds)
    pub gateway_timeout_secs: u64,
    /// GnuPG home shared by the keyring and the decryption tool
    /// When unset, both tools use their own default
    pub gnupg_home: Option<PathBuf>,
    /// Explicit path to the sops binary (resolved from PATH when unset)
    pub sops_binary: Option<PathBuf>,
    /// Explicit path to the gpg binary (resolved from PATH when unset)
    pub gpg_binary: Option<PathBuf>,
    /// Restrict watches to a single namespace (all namespaces when unset)
    pub watch_namespace: Option<String>,
    /// Log format (json, text)
    pub log_format: LogFormat,
    /// Maximum concurrent reconciliations per controller
    pub max_concurrent_reconciliations: u16,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        use crate::constants::{
            DEFAULT_BACKOFF_MAX_SECS, DEFAULT_BACKOFF_MIN_SECS, DEFAULT_CONFLICT_REQUEUE_SECS,
            DEFAULT_GATEWAY_TIMEOUT_SECS, DEFAULT_MAX_CONCURRENT_RECONCILIATIONS,
            DEFAULT_METRICS_PORT, DEFAULT_RESYNC_INTERVAL_SECS,
        };
        Self {
            metrics_port: DEFAULT_METRICS_PORT,
            resync_interval_secs: DEFAULT_RESYNC_INTERVAL_SECS,
            conflict_requeue_secs: DEFAULT_CONFLICT_REQUEUE_SECS,
            backoff_min_secs: DEFAULT_BACKOFF_MIN_SECS,
            backoff_max_secs: DEFAULT_BACKOFF_MAX_SECS,
            gateway_timeout_secs: DEFAULT_GATEWAY_TIMEOUT_SECS,
            gnupg_home: None,
            sops_binary: None,
            gpg_binary: None,
            watch_namespace: None,
            log_format: LogFormat::Text,
            max_concurrent_reconciliations: DEFAULT_MAX_CONCURRENT_RECONCILIATIONS,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    ///
    /// Unparseable values fall back to the default for that key.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let min = var_or(&lookup, "BACKOFF_MIN_SECS", defaults.backoff_min_secs).max(1);
        Self {
            metrics_port: var_or(&lookup, "METRICS_PORT", defaults.metrics_port),
            resync_interval_secs: var_or(
                &lookup,
                "RESYNC_INTERVAL_SECS",
                defaults.resync_interval_secs,
            ),
            conflict_requeue_secs: var_or(
                &lookup,
                "CONFLICT_REQUEUE_SECS",
                defaults.conflict_requeue_secs,
            ),
            backoff_min_secs: min,
            // A max below the min would make the sequence shrink
            backoff_max_secs: var_or(&lookup, "BACKOFF_MAX_SECS", defaults.backoff_max_secs)
                .max(min),
            gateway_timeout_secs: var_or(
                &lookup,
                "GATEWAY_TIMEOUT_SECS",
                defaults.gateway_timeout_secs,
            ),
            gnupg_home: non_empty(&lookup, "GNUPGHOME").map(PathBuf::from),
            sops_binary: non_empty(&lookup, "SOPS_BINARY").map(PathBuf::from),
            gpg_binary: non_empty(&lookup, "GPG_BINARY").map(PathBuf::from),
            watch_namespace: non_empty(&lookup, "WATCH_NAMESPACE"),
            log_format: non_empty(&lookup, "LOG_FORMAT")
                .and_then(|v| LogFormat::parse(&v))
                .unwrap_or(defaults.log_format),
            max_concurrent_reconciliations: var_or(
                &lookup,
                "MAX_CONCURRENT_RECONCILIATIONS",
                defaults.max_concurrent_reconciliations,
            ),
        }
    }

    /// Get periodic resync duration
    #[must_use]
    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    /// Get conflict requeue duration
    #[must_use]
    pub fn conflict_requeue(&self) -> Duration {
        Duration::from_secs(self.conflict_requeue_secs)
    }

    /// Get gateway timeout duration
    #[must_use]
    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway_timeout_secs)
    }
}

/// Read a variable and parse it, or return the default value
fn var_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
