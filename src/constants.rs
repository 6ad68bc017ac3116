//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! These values represent reasonable defaults and can be overridden via
//! environment variables where applicable (see [`crate::config::ControllerConfig`]).

/// API group for `SopsSecret` and `SopsKey`
pub const API_GROUP: &str = "sops.octopilot.io";

/// API version for `SopsSecret` and `SopsKey`
pub const API_VERSION: &str = "v1alpha1";

/// Finalizer token placed on `SopsSecret` resources
pub const SOPS_SECRET_FINALIZER: &str = "sopssecret.finalizers.sops.octopilot.io";

/// Finalizer token placed on `SopsKey` resources
pub const SOPS_KEY_FINALIZER: &str = "sopskey.finalizers.sops.octopilot.io";

/// Field manager used for status patches
pub const FIELD_MANAGER: &str = "sops-secret-controller";

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// Default periodic resync interval after a successful reconciliation (seconds)
pub const DEFAULT_RESYNC_INTERVAL_SECS: u64 = 300;

/// Default requeue delay after an optimistic-concurrency conflict (seconds)
pub const DEFAULT_CONFLICT_REQUEUE_SECS: u64 = 1;

/// Default minimum error backoff (seconds)
pub const DEFAULT_BACKOFF_MIN_SECS: u64 = 5;

/// Default maximum error backoff (seconds)
pub const DEFAULT_BACKOFF_MAX_SECS: u64 = 300;

/// Default timeout for a single sops/gpg invocation (seconds)
pub const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 30;

/// Default maximum concurrent reconciliations per controller
pub const DEFAULT_MAX_CONCURRENT_RECONCILIATIONS: u16 = 10;

/// Length of an OpenPGP v4 fingerprint in hex characters
pub const FINGERPRINT_LENGTH: usize = 40;
