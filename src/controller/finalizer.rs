//! # Finalizers
//!
//! Helpers for the controller's own finalizer token. They never touch tokens
//! placed by other controllers.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Whether deletion has been requested for the object
#[must_use]
pub fn is_deleting(meta: &ObjectMeta) -> bool {
    meta.deletion_timestamp.is_some()
}

#[must_use]
pub fn has_finalizer(meta: &ObjectMeta, token: &str) -> bool {
    meta.finalizers
        .as_ref()
        .is_some_and(|finalizers| finalizers.iter().any(|f| f == token))
}

/// Add `token` if absent, returns whether the metadata changed
pub fn add_finalizer(meta: &mut ObjectMeta, token: &str) -> bool {
    if has_finalizer(meta, token) {
        return false;
    }
    meta.finalizers
        .get_or_insert_with(Vec::new)
        .push(token.to_string());
    true
}

/// Remove every occurrence of `token`, returns whether the metadata changed
pub fn remove_finalizer(meta: &mut ObjectMeta, token: &str) -> bool {
    let Some(finalizers) = meta.finalizers.as_mut() else {
        return false;
    };
    let before = finalizers.len();
    finalizers.retain(|f| f != token);
    let changed = finalizers.len() != before;
    if finalizers.is_empty() {
        meta.finalizers = None;
    }
    changed
}
