//! # Error Policy
//!
//! Requeue decisions for failed reconciliations.
//!
//! Conflicts mean another writer got there first; they are retried after a
//! short fixed delay with fresh state. Every other failure is retried with a
//! per-resource Fibonacci backoff that resets after the next success.

use crate::controller::reconciler::{resource_key, Reconciler, ReconcilerError, ResourceIdentity};
use crate::observability::metrics;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Decide when a failed reconciliation is retried
pub fn handle_reconciliation_error(
    kind: &str,
    id: &ResourceIdentity,
    error: &ReconcilerError,
    ctx: &Reconciler,
) -> Action {
    if error.is_conflict() {
        let delay = ctx.config.conflict_requeue();
        info!(
            "Conflict on {} {}, retrying in {}s: {}",
            kind,
            id,
            delay.as_secs(),
            error
        );
        metrics::increment_requeues_total("conflict");
        return Action::requeue(delay);
    }

    let (backoff_seconds, error_count) = ctx.next_error_backoff(&resource_key(kind, id));
    let next_trigger_time = chrono::Utc::now()
        + chrono::Duration::seconds(i64::try_from(backoff_seconds).unwrap_or(i64::MAX));
    warn!(
        "Retrying {} {} with Fibonacci backoff: {}s (error count: {}, next retry: {})",
        kind,
        id,
        backoff_seconds,
        error_count,
        next_trigger_time.to_rfc3339()
    );

    metrics::increment_requeues_total("error-backoff");
    Action::requeue(Duration::from_secs(backoff_seconds))
}

/// `kube_runtime::Controller` error policy for either declaration kind
pub fn error_policy<K>(obj: Arc<K>, error: &ReconcilerError, ctx: Arc<Reconciler>) -> Action
where
    K: kube::Resource<DynamicType = ()>,
{
    let id = ResourceIdentity::new(obj.namespace().unwrap_or_default(), obj.name_any());
    handle_reconciliation_error(&K::kind(&()), &id, error, &ctx)
}
