//! # Status
//!
//! Best-effort status maintenance. A failed status update is logged and
//! never fails the reconciliation.

use super::types::{Reconciler, ResourceIdentity};
use crate::crd::{ResourceRef, SopsKey, SopsKeyStatus, SopsSecret, SopsSecretStatus};
use k8s_openapi::api::core::v1::Secret;
use kube::{Resource, ResourceExt};
use std::collections::BTreeSet;
use tracing::{debug, warn};

fn secret_ref(secret: &Secret) -> ResourceRef {
    ResourceRef {
        api_version: Some(Secret::api_version(&()).into_owned()),
        kind: Some(Secret::kind(&()).into_owned()),
        name: secret.name_any(),
        namespace: secret.namespace(),
        uid: secret.uid(),
    }
}

fn key_ref(key: &SopsKey) -> ResourceRef {
    ResourceRef {
        api_version: Some(SopsKey::api_version(&()).into_owned()),
        kind: Some(SopsKey::kind(&()).into_owned()),
        name: key.name_any(),
        namespace: key.namespace(),
        uid: key.uid(),
    }
}

/// Keys whose imported fingerprint is a PGP recipient of the declaration
#[must_use]
pub fn recipient_keys(declaration: &SopsSecret, keys: &[SopsKey]) -> Vec<ResourceRef> {
    let recipients: BTreeSet<&str> = declaration.sops.pgp_fingerprints().collect();
    let mut refs: Vec<ResourceRef> = keys
        .iter()
        .filter(|key| {
            key.status
                .as_ref()
                .and_then(|status| status.fingerprint.as_deref())
                .is_some_and(|fp| recipients.contains(fp))
        })
        .map(key_ref)
        .collect();
    refs.sort_by(|a, b| a.name.cmp(&b.name));
    refs
}

/// Point the declaration's status at its derived Secret and recipient keys
///
/// Skips the write when nothing changed.
pub async fn update_sops_secret_status(
    ctx: &Reconciler,
    id: &ResourceIdentity,
    declaration: &SopsSecret,
    secret: &Secret,
) {
    let keys = match ctx.store.list_sops_keys(&id.namespace).await {
        Ok(keys) => recipient_keys(declaration, &keys),
        Err(e) => {
            warn!("Failed to list SopsKeys for status of {}: {}", id, e);
            declaration
                .status
                .as_ref()
                .map(|status| status.keys.clone())
                .unwrap_or_default()
        }
    };

    let status = SopsSecretStatus {
        secret: Some(secret_ref(secret)),
        keys,
    };
    if declaration.status.as_ref() == Some(&status) {
        debug!("Status of SopsSecret {} unchanged, skipping update", id);
        return;
    }

    if let Err(e) = ctx
        .store
        .patch_sops_secret_status(&id.namespace, &id.name, &status)
        .await
    {
        warn!("Failed to update status of SopsSecret {}: {}", id, e);
    }
}

/// Record the imported key's identity
///
/// `lastImportTime` only moves when the fingerprint or key type changes, so
/// periodic re-imports of the same key do not rewrite the status.
pub async fn update_sops_key_status(
    ctx: &Reconciler,
    id: &ResourceIdentity,
    key: &SopsKey,
    key_type: &str,
    fingerprint: Option<String>,
) {
    let current = key.status.clone().unwrap_or_default();
    if current.key_type.as_deref() == Some(key_type) && current.fingerprint == fingerprint {
        debug!("Status of SopsKey {} unchanged, skipping update", id);
        return;
    }

    let status = SopsKeyStatus {
        fingerprint,
        key_type: Some(key_type.to_string()),
        last_import_time: Some(chrono::Utc::now().to_rfc3339()),
    };
    if let Err(e) = ctx
        .store
        .patch_sops_key_status(&id.namespace, &id.name, &status)
        .await
    {
        warn!("Failed to update status of SopsKey {}: {}", id, e);
    }
}
