//! # SopsKey Reconciler
//!
//! Converges one `SopsKey` to imported key material.
//!
//! Only PGP keys are imported into the keyring. KMS, Azure Key Vault and GCP
//! KMS keys are resolved by the decryption tool from ambient credentials, so
//! for those the reconciler only manages the finalizer and status.

use super::status::update_sops_key_status;
use super::types::{Phase, Reconciler, ReconcilerError, ResourceIdentity};
use crate::constants::SOPS_KEY_FINALIZER;
use crate::controller::finalizer::{add_finalizer, has_finalizer, is_deleting, remove_finalizer};
use crate::controller::gateway::GatewayError;
use crate::crd::{KeySource, SopsKey};
use crate::observability::metrics;
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

const KIND: &str = "SopsKey";

/// Reconcile the `SopsKey` identified by `id`
///
/// # Errors
///
/// Store, gateway and key source errors abort the invocation for redelivery.
pub async fn reconcile_sops_key(
    ctx: &Reconciler,
    id: &ResourceIdentity,
) -> Result<(), ReconcilerError> {
    let span = info_span!(
        "reconcile",
        kind = KIND,
        namespace = %id.namespace,
        name = %id.name,
        phase = tracing::field::Empty,
        keytype = tracing::field::Empty,
    );
    let start = Instant::now();

    let result = async {
        metrics::increment_reconciliations(KIND);
        let result = run(ctx, id).await;
        if let Err(e) = &result {
            error!("Reconciliation of SopsKey {} failed: {}", id, e);
            metrics::increment_reconciliation_errors(KIND);
        }
        result
    }
    .instrument(span)
    .await;

    metrics::observe_reconciliation_duration(KIND, start.elapsed().as_secs_f64());
    result
}

async fn run(ctx: &Reconciler, id: &ResourceIdentity) -> Result<(), ReconcilerError> {
    let key = match ctx.store.get_sops_key(&id.namespace, &id.name).await {
        Ok(key) => key,
        Err(e) if e.is_not_found() => {
            debug!("SopsKey {} is gone, nothing to do", id);
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    if is_deleting(&key.metadata) {
        Span::current().record("phase", Phase::Cleanup.as_str());
        cleanup(ctx, id, key).await
    } else {
        Span::current().record("phase", Phase::Update.as_str());
        apply(ctx, id, key).await
    }
}

async fn cleanup(
    ctx: &Reconciler,
    id: &ResourceIdentity,
    mut key: SopsKey,
) -> Result<(), ReconcilerError> {
    if !has_finalizer(&key.metadata, SOPS_KEY_FINALIZER) {
        debug!("SopsKey {} has no finalizer, no cleanup owed", id);
        return Ok(());
    }

    info!("Triggering finalizer for SopsKey {}", id);
    if let Ok(source) = key.spec.source() {
        Span::current().record("keytype", source.key_type());
    }
    // Only the pgp section matters here, ambiguity does not block deletion
    for fingerprint in imported_fingerprints(ctx, id, &key).await? {
        ctx.keyring.delete(&fingerprint).await?;
        info!("Deleted PGP key {} for SopsKey {}", fingerprint, id);
    }

    remove_finalizer(&mut key.metadata, SOPS_KEY_FINALIZER);
    ctx.store.replace_sops_key(&key).await?;
    info!("Removed finalizer from SopsKey {}", id);
    Ok(())
}

/// Fingerprints this key may have put into the keyring
///
/// The current payload's fingerprint plus the one recorded in status, which
/// differs after a rotation whose previous key was not yet removed.
async fn imported_fingerprints(
    ctx: &Reconciler,
    id: &ResourceIdentity,
    key: &SopsKey,
) -> Result<Vec<String>, ReconcilerError> {
    let mut fingerprints = Vec::new();
    if let Some(pgp) = &key.spec.pgp {
        match ctx.keyring.fingerprint(pgp.key.as_bytes()).await {
            Ok(fingerprint) => fingerprints.push(fingerprint),
            // Nothing importable in the payload, so nothing of it is in the keyring
            Err(GatewayError::FingerprintNotFound) => {
                warn!("SopsKey {} payload holds no PGP key", id);
            }
            Err(e) => return Err(e.into()),
        }
    }
    if let Some(recorded) = recorded_fingerprint(key) {
        if !fingerprints.iter().any(|f| f == recorded) {
            fingerprints.push(recorded.to_string());
        }
    }
    Ok(fingerprints)
}

fn recorded_fingerprint(key: &SopsKey) -> Option<&str> {
    key.status.as_ref()?.fingerprint.as_deref()
}

async fn apply(
    ctx: &Reconciler,
    id: &ResourceIdentity,
    mut key: SopsKey,
) -> Result<(), ReconcilerError> {
    if add_finalizer(&mut key.metadata, SOPS_KEY_FINALIZER) {
        info!("Adding finalizer to SopsKey {}", id);
        key = ctx.store.replace_sops_key(&key).await?;
    }

    let source = key.spec.source()?;
    Span::current().record("keytype", source.key_type());
    let fingerprint = match source {
        KeySource::Pgp(pgp) => {
            // The finalizer is already persisted, a failed import is retried
            ctx.keyring.import(pgp.key.as_bytes()).await?;
            let fingerprint = match ctx.keyring.fingerprint(pgp.key.as_bytes()).await {
                Ok(fingerprint) => fingerprint,
                Err(e) => {
                    warn!("Imported SopsKey {} but could not fingerprint it: {}", id, e);
                    return Ok(());
                }
            };
            // Status still names the replaced key until it is gone from the keyring
            if let Some(previous) = recorded_fingerprint(&key).filter(|p| *p != fingerprint) {
                ctx.keyring.delete(previous).await?;
                info!("Deleted rotated-out PGP key {} for SopsKey {}", previous, id);
            }
            Some(fingerprint)
        }
        KeySource::Kms(_) | KeySource::AzureKv(_) | KeySource::GcpKms(_) => None,
        KeySource::None => {
            debug!("SopsKey {} declares no key provider", id);
            return Ok(());
        }
    };

    update_sops_key_status(ctx, id, &key, source.key_type(), fingerprint).await;
    Ok(())
}
