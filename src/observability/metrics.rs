//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `sops_secret_controller_reconciliations_total{kind}` - Total number of reconciliations
//! - `sops_secret_controller_reconciliation_errors_total{kind}` - Total number of failed reconciliations
//! - `sops_secret_controller_reconciliation_duration_seconds{kind}` - Duration of reconciliations
//! - `sops_secret_controller_secret_writes_total{operation}` - Derived Secret creates, updates and deletes
//! - `sops_secret_controller_gateway_operations_total{operation,outcome}` - sops/gpg invocations
//! - `sops_secret_controller_gateway_operation_duration_seconds{operation}` - Duration of sops/gpg invocations
//! - `sops_secret_controller_requeues_total{reason}` - Requeues by reason

use anyhow::Result;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "sops_secret_controller_reconciliations_total",
            "Total number of reconciliations",
        ),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "sops_secret_controller_reconciliation_errors_total",
            "Total number of failed reconciliations",
        ),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "sops_secret_controller_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static SECRET_WRITES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "sops_secret_controller_secret_writes_total",
            "Total number of derived Secret writes by operation",
        ),
        &["operation"],
    )
    .expect("Failed to create SECRET_WRITES_TOTAL metric - this should never happen")
});

static GATEWAY_OPERATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "sops_secret_controller_gateway_operations_total",
            "Total number of sops/gpg invocations by operation and outcome",
        ),
        &["operation", "outcome"],
    )
    .expect("Failed to create GATEWAY_OPERATIONS_TOTAL metric - this should never happen")
});

static GATEWAY_OPERATION_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "sops_secret_controller_gateway_operation_duration_seconds",
            "Duration of sops/gpg invocations in seconds",
        )
        .buckets(vec![0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
        &["operation"],
    )
    .expect("Failed to create GATEWAY_OPERATION_DURATION metric - this should never happen")
});

static REQUEUES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "sops_secret_controller_requeues_total",
            "Total number of requeues by reason",
        ),
        &["reason"],
    )
    .expect("Failed to create REQUEUES_TOTAL metric - this should never happen")
});

/// Register all metrics with the global registry
///
/// # Errors
///
/// Fails if a metric is already registered.
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(SECRET_WRITES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(GATEWAY_OPERATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(GATEWAY_OPERATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;

    Ok(())
}

pub fn increment_reconciliations(kind: &str) {
    RECONCILIATIONS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_reconciliation_errors(kind: &str) {
    RECONCILIATION_ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn observe_reconciliation_duration(kind: &str, duration: f64) {
    RECONCILIATION_DURATION
        .with_label_values(&[kind])
        .observe(duration);
}

/// Count a derived Secret write (`create`, `update` or `delete`)
pub fn increment_secret_writes(operation: &str) {
    SECRET_WRITES_TOTAL.with_label_values(&[operation]).inc();
}

pub fn observe_gateway_operation(operation: &str, outcome: &str, duration: f64) {
    GATEWAY_OPERATIONS_TOTAL
        .with_label_values(&[operation, outcome])
        .inc();
    GATEWAY_OPERATION_DURATION
        .with_label_values(&[operation])
        .observe(duration);
}

pub fn increment_requeues_total(reason: &str) {
    REQUEUES_TOTAL.with_label_values(&[reason]).inc();
}
