//! # SopsSecret Reconciler
//!
//! Converges one `SopsSecret` to exactly one derived Secret.
//!
//! Every invocation re-reads the declaration by identity and either runs the
//! cleanup branch (deletion requested) or the update branch. Both branches are
//! idempotent, so redundant, out-of-order or redelivered invocations converge
//! to the same state.
//!
//! Cleanup deletes every owned Secret before the finalizer is removed. A crash
//! between the two is harmless: the next pass finds nothing owned and goes
//! straight to finalizer removal.

use super::decrypt::{decrypt_declaration, desired_secret, DecryptedFields};
use super::status::update_sops_secret_status;
use super::types::{Phase, Reconciler, ReconcilerError, ResourceIdentity};
use crate::constants::SOPS_SECRET_FINALIZER;
use crate::controller::finalizer::{add_finalizer, has_finalizer, is_deleting, remove_finalizer};
use crate::controller::store::StoreError;
use crate::crd::{SopsSecret, SOPS_SECRET_KIND};
use crate::observability::metrics;
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use std::time::Instant;
use tracing::{debug, error, info, info_span, Instrument, Span};

/// Reconcile the `SopsSecret` identified by `id`
///
/// # Errors
///
/// Any failed step aborts the invocation; nothing after the failing step is
/// persisted and the caller is expected to redeliver.
pub async fn reconcile_sops_secret(
    ctx: &Reconciler,
    id: &ResourceIdentity,
) -> Result<(), ReconcilerError> {
    let span = info_span!(
        "reconcile",
        kind = SOPS_SECRET_KIND,
        namespace = %id.namespace,
        name = %id.name,
        phase = tracing::field::Empty,
    );
    let start = Instant::now();

    let result = async {
        metrics::increment_reconciliations(SOPS_SECRET_KIND);
        let result = run(ctx, id).await;
        if let Err(e) = &result {
            error!("Reconciliation of SopsSecret {} failed: {}", id, e);
            metrics::increment_reconciliation_errors(SOPS_SECRET_KIND);
        }
        result
    }
    .instrument(span)
    .await;

    metrics::observe_reconciliation_duration(SOPS_SECRET_KIND, start.elapsed().as_secs_f64());
    result
}

async fn run(ctx: &Reconciler, id: &ResourceIdentity) -> Result<(), ReconcilerError> {
    let declaration = match ctx.store.get_sops_secret(&id.namespace, &id.name).await {
        Ok(declaration) => declaration,
        Err(e) if e.is_not_found() => {
            debug!("SopsSecret {} is gone, nothing to do", id);
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    if is_deleting(&declaration.metadata) {
        Span::current().record("phase", Phase::Cleanup.as_str());
        cleanup(ctx, id, declaration).await
    } else {
        Span::current().record("phase", Phase::Update.as_str());
        apply(ctx, id, declaration).await
    }
}

async fn cleanup(
    ctx: &Reconciler,
    id: &ResourceIdentity,
    mut declaration: SopsSecret,
) -> Result<(), ReconcilerError> {
    if !has_finalizer(&declaration.metadata, SOPS_SECRET_FINALIZER) {
        debug!("SopsSecret {} has no finalizer, no cleanup owed", id);
        return Ok(());
    }

    info!("Triggering finalizer for SopsSecret {}", id);
    let owned = ctx.store.find_owned_secrets(&id.namespace, &id.name).await?;
    for secret in &owned {
        let name = secret.metadata.name.as_deref().unwrap_or_default();
        info!("Deleting derived Secret {}/{}", id.namespace, name);
        // Stop at the first failure, the finalizer stays until every delete succeeded
        ctx.store.delete_secret(&id.namespace, name).await?;
        metrics::increment_secret_writes("delete");
    }

    remove_finalizer(&mut declaration.metadata, SOPS_SECRET_FINALIZER);
    ctx.store.replace_sops_secret(&declaration).await?;
    info!(
        "Removed finalizer from SopsSecret {} after deleting {} Secret(s)",
        id,
        owned.len()
    );
    Ok(())
}

async fn apply(
    ctx: &Reconciler,
    id: &ResourceIdentity,
    mut declaration: SopsSecret,
) -> Result<(), ReconcilerError> {
    if add_finalizer(&mut declaration.metadata, SOPS_SECRET_FINALIZER) {
        info!("Adding finalizer to SopsSecret {}", id);
        declaration = ctx.store.replace_sops_secret(&declaration).await?;
    }

    let owned = ctx.store.find_owned_secrets(&id.namespace, &id.name).await?;
    let existing = owned.first();
    if owned.len() > 1 {
        // Only one Secret is ever created per declaration; extras come from outside
        debug!(
            "SopsSecret {} controls {} Secrets, updating the first",
            id,
            owned.len()
        );
    }

    let fields = decrypt_declaration(&declaration, ctx.decryptor.as_ref()).await?;
    let desired = desired_secret(existing, &declaration, &fields)?;

    let secret = match existing {
        Some(existing) if *existing == desired => {
            debug!("Derived Secret for {} is up to date", id);
            desired
        }
        Some(_) => {
            info!("Updating derived Secret {}", id);
            let updated = ctx.store.replace_secret(&desired).await?;
            metrics::increment_secret_writes("update");
            updated
        }
        None => {
            info!("Creating derived Secret {}", id);
            match ctx.store.create_secret(&desired).await {
                Ok(created) => {
                    metrics::increment_secret_writes("create");
                    created
                }
                Err(e @ StoreError::AlreadyExists { .. }) => {
                    adopt_existing(ctx, id, &declaration, &fields, e).await?
                }
                Err(e) => return Err(e.into()),
            }
        }
    };

    update_sops_secret_status(ctx, id, &declaration, &secret).await;
    Ok(())
}

/// Take over a Secret the owner index has not caught up with yet
///
/// Only a Secret already controlled by this declaration is adopted. A name
/// clash with anything else stays a failed create.
async fn adopt_existing(
    ctx: &Reconciler,
    id: &ResourceIdentity,
    declaration: &SopsSecret,
    fields: &DecryptedFields,
    create_error: StoreError,
) -> Result<Secret, ReconcilerError> {
    let existing = ctx.store.get_secret(&id.namespace, &id.name).await?;
    if !is_controlled_by(&existing, declaration) {
        return Err(create_error.into());
    }

    debug!("Derived Secret {} exists but is not indexed yet", id);
    let desired = desired_secret(Some(&existing), declaration, fields)?;
    if desired == existing {
        return Ok(existing);
    }
    info!("Updating derived Secret {}", id);
    let updated = ctx.store.replace_secret(&desired).await?;
    metrics::increment_secret_writes("update");
    Ok(updated)
}

fn is_controlled_by(secret: &Secret, declaration: &SopsSecret) -> bool {
    declaration.metadata.uid.as_ref().is_some_and(|uid| {
        secret
            .owner_references()
            .iter()
            .any(|r| r.controller == Some(true) && &r.uid == uid)
    })
}
