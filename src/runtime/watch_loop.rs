//! # Watch Loop
//!
//! Runs the `SopsSecret` and `SopsKey` controllers side by side until a
//! shutdown signal arrives.
//!
//! The `SopsSecret` controller also watches Secrets it owns, so edits to a
//! derived Secret re-trigger reconciliation of its declaration. Successful
//! reconciliations requeue after the resync interval.

use crate::controller::reconciler::{
    reconcile_sops_key, reconcile_sops_secret, resource_key, Reconciler, ReconcilerError,
    ResourceIdentity,
};
use crate::controller::server::ServerState;
use crate::crd::{SopsKey, SopsSecret, SOPS_SECRET_KIND};
use crate::observability::metrics;
use crate::runtime::error_policy::error_policy;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use kube_runtime::controller::{self, Action};
use kube_runtime::{watcher, Controller};
use std::sync::Arc;
use tracing::{debug, info};

fn api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>,
{
    match namespace {
        Some(namespace) => Api::namespaced(client.clone(), namespace),
        None => Api::all(client.clone()),
    }
}

/// Requeue a converged resource for periodic resync
fn converged(kind: &str, id: &ResourceIdentity, ctx: &Reconciler) -> Action {
    if ctx.reset_backoff(&resource_key(kind, id)) {
        info!("{} {} recovered, backoff reset", kind, id);
    }
    metrics::increment_requeues_total("resync");
    Action::requeue(ctx.config.resync_interval())
}

async fn reconcile_secret_object(
    obj: Arc<SopsSecret>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    let id = ResourceIdentity::of(obj.as_ref())?;
    reconcile_sops_secret(&ctx, &id).await?;
    Ok(converged(SOPS_SECRET_KIND, &id, &ctx))
}

async fn reconcile_key_object(
    obj: Arc<SopsKey>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    let id = ResourceIdentity::of(obj.as_ref())?;
    reconcile_sops_key(&ctx, &id).await?;
    Ok(converged("SopsKey", &id, &ctx))
}

/// Run both controllers until shutdown
///
/// Readiness is withdrawn once both controllers have stopped.
pub async fn run_watch_loop(client: Client, reconciler: Arc<Reconciler>, server_state: Arc<ServerState>) {
    let namespace = reconciler.config.watch_namespace.clone();
    let controller_config = controller::Config::default()
        .concurrency(reconciler.config.max_concurrent_reconciliations);

    info!(
        "Starting controllers (namespace: {}, concurrency: {})",
        namespace.as_deref().unwrap_or("all"),
        reconciler.config.max_concurrent_reconciliations
    );

    let secret_controller = Controller::new(
        api::<SopsSecret>(&client, namespace.as_deref()),
        watcher::Config::default().any_semantic(),
    )
    .owns(
        api::<Secret>(&client, namespace.as_deref()),
        watcher::Config::default().any_semantic(),
    )
    .with_config(controller_config.clone())
    .shutdown_on_signal()
    .run(
        reconcile_secret_object,
        error_policy::<SopsSecret>,
        Arc::clone(&reconciler),
    )
    .for_each(|result| {
        if let Err(e) = result {
            debug!("SopsSecret controller event error: {}", e);
        }
        futures::future::ready(())
    });

    let key_controller = Controller::new(
        api::<SopsKey>(&client, namespace.as_deref()),
        watcher::Config::default().any_semantic(),
    )
    .with_config(controller_config)
    .shutdown_on_signal()
    .run(reconcile_key_object, error_policy::<SopsKey>, Arc::clone(&reconciler))
    .for_each(|result| {
        if let Err(e) = result {
            debug!("SopsKey controller event error: {}", e);
        }
        futures::future::ready(())
    });

    server_state.mark_ready();
    futures::join!(secret_controller, key_controller);

    server_state.mark_not_ready();
    info!("Controllers stopped");
}
