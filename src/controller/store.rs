//! # Resource Store
//!
//! The reconcilers only talk to the cluster through [`ResourceStore`], so
//! tests can substitute an in-memory implementation.
//!
//! Writes to declarations use `replace`, which carries the object's
//! `resourceVersion`: a stale write fails with [`StoreError::Conflict`]
//! instead of silently overwriting someone else's change.

use crate::constants::FIELD_MANAGER;
use crate::controller::index::OwnerIndex;
use crate::crd::{SopsKey, SopsKeyStatus, SopsSecret, SopsSecretStatus};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{DeleteParams, Patch, PatchParams, PostParams};
use kube::{Api, Client};
use std::sync::Arc;
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    /// A create hit an existing object that is not ours to update
    #[error("{kind} {namespace}/{name} already exists: {message}")]
    AlreadyExists {
        kind: &'static str,
        namespace: String,
        name: String,
        message: String,
    },

    #[error("conflict writing {kind} {namespace}/{name}: {message}")]
    Conflict {
        kind: &'static str,
        namespace: String,
        name: String,
        message: String,
    },

    #[error("{operation} {kind} {namespace}/{name} failed: {message}")]
    Api {
        operation: &'static str,
        kind: &'static str,
        namespace: String,
        name: String,
        message: String,
    },
}

impl StoreError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Cluster operations used by the reconcilers
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get_sops_secret(&self, namespace: &str, name: &str) -> Result<SopsSecret, StoreError>;

    /// Full overwrite, guarded by the object's resourceVersion
    async fn replace_sops_secret(&self, secret: &SopsSecret) -> Result<SopsSecret, StoreError>;

    async fn patch_sops_secret_status(
        &self,
        namespace: &str,
        name: &str,
        status: &SopsSecretStatus,
    ) -> Result<(), StoreError>;

    async fn get_sops_key(&self, namespace: &str, name: &str) -> Result<SopsKey, StoreError>;

    /// Full overwrite, guarded by the object's resourceVersion
    async fn replace_sops_key(&self, key: &SopsKey) -> Result<SopsKey, StoreError>;

    async fn patch_sops_key_status(
        &self,
        namespace: &str,
        name: &str,
        status: &SopsKeyStatus,
    ) -> Result<(), StoreError>;

    async fn list_sops_keys(&self, namespace: &str) -> Result<Vec<SopsKey>, StoreError>;

    /// Secrets in `namespace` controlled by the `SopsSecret` named `owner`
    async fn find_owned_secrets(&self, namespace: &str, owner: &str)
        -> Result<Vec<Secret>, StoreError>;

    /// Read a Secret by name, bypassing the owner index
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, StoreError>;

    async fn create_secret(&self, secret: &Secret) -> Result<Secret, StoreError>;

    async fn replace_secret(&self, secret: &Secret) -> Result<Secret, StoreError>;

    /// Deleting a Secret that is already gone succeeds
    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), StoreError>;
}

/// [`ResourceStore`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    index: Arc<OwnerIndex>,
}

impl std::fmt::Debug for KubeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore")
            .field("index_ready", &self.index.is_ready())
            .finish_non_exhaustive()
    }
}

impl KubeStore {
    /// Create a store and start the owner index watch
    ///
    /// `watch_namespace` restricts the Secret watch to one namespace.
    #[must_use]
    pub fn new(client: Client, watch_namespace: Option<&str>) -> Self {
        let index = Arc::new(OwnerIndex::new());
        let secrets: Api<Secret> = match watch_namespace {
            Some(namespace) => Api::namespaced(client.clone(), namespace),
            None => Api::all(client.clone()),
        };
        let watch_index = Arc::clone(&index);
        tokio::spawn(async move { watch_index.run(secrets).await });
        Self { client, index }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Map a kube error into the store taxonomy
fn map_error(
    error: kube::Error,
    operation: &'static str,
    kind: &'static str,
    namespace: &str,
    name: &str,
) -> StoreError {
    match error {
        kube::Error::Api(response) if response.code == 404 => StoreError::NotFound {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        },
        kube::Error::Api(response) if response.code == 409 && response.reason == "AlreadyExists" => {
            StoreError::AlreadyExists {
                kind,
                namespace: namespace.to_string(),
                name: name.to_string(),
                message: response.message.clone(),
            }
        }
        kube::Error::Api(response) if response.code == 409 => StoreError::Conflict {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
            message: response.message.clone(),
        },
        other => StoreError::Api {
            operation,
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
            message: other.to_string(),
        },
    }
}

fn identity<K: kube::ResourceExt>(obj: &K) -> (String, String) {
    (obj.namespace().unwrap_or_default(), obj.name_any())
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn get_sops_secret(&self, namespace: &str, name: &str) -> Result<SopsSecret, StoreError> {
        self.api::<SopsSecret>(namespace)
            .get(name)
            .await
            .map_err(|e| map_error(e, "get", "SopsSecret", namespace, name))
    }

    async fn replace_sops_secret(&self, secret: &SopsSecret) -> Result<SopsSecret, StoreError> {
        let (namespace, name) = identity(secret);
        self.api::<SopsSecret>(&namespace)
            .replace(&name, &PostParams::default(), secret)
            .await
            .map_err(|e| map_error(e, "replace", "SopsSecret", &namespace, &name))
    }

    async fn patch_sops_secret_status(
        &self,
        namespace: &str,
        name: &str,
        status: &SopsSecretStatus,
    ) -> Result<(), StoreError> {
        let patch = serde_json::json!({ "status": status });
        self.api::<SopsSecret>(namespace)
            .patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(patch))
            .await
            .map(|_| ())
            .map_err(|e| map_error(e, "patch status of", "SopsSecret", namespace, name))
    }

    async fn get_sops_key(&self, namespace: &str, name: &str) -> Result<SopsKey, StoreError> {
        self.api::<SopsKey>(namespace)
            .get(name)
            .await
            .map_err(|e| map_error(e, "get", "SopsKey", namespace, name))
    }

    async fn replace_sops_key(&self, key: &SopsKey) -> Result<SopsKey, StoreError> {
        let (namespace, name) = identity(key);
        self.api::<SopsKey>(&namespace)
            .replace(&name, &PostParams::default(), key)
            .await
            .map_err(|e| map_error(e, "replace", "SopsKey", &namespace, &name))
    }

    async fn patch_sops_key_status(
        &self,
        namespace: &str,
        name: &str,
        status: &SopsKeyStatus,
    ) -> Result<(), StoreError> {
        let patch = serde_json::json!({ "status": status });
        self.api::<SopsKey>(namespace)
            .patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(patch))
            .await
            .map(|_| ())
            .map_err(|e| map_error(e, "patch status of", "SopsKey", namespace, name))
    }

    async fn list_sops_keys(&self, namespace: &str) -> Result<Vec<SopsKey>, StoreError> {
        self.api::<SopsKey>(namespace)
            .list(&kube::api::ListParams::default())
            .await
            .map(|list| list.items)
            .map_err(|e| map_error(e, "list", "SopsKey", namespace, "*"))
    }

    async fn find_owned_secrets(
        &self,
        namespace: &str,
        owner: &str,
    ) -> Result<Vec<Secret>, StoreError> {
        self.index.wait_ready().await;
        Ok(self.index.find_owned(namespace, owner))
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, StoreError> {
        self.api::<Secret>(namespace)
            .get(name)
            .await
            .map_err(|e| map_error(e, "get", "Secret", namespace, name))
    }

    async fn create_secret(&self, secret: &Secret) -> Result<Secret, StoreError> {
        let (namespace, name) = identity(secret);
        self.api::<Secret>(&namespace)
            .create(&PostParams::default(), secret)
            .await
            .map_err(|e| map_error(e, "create", "Secret", &namespace, &name))
    }

    async fn replace_secret(&self, secret: &Secret) -> Result<Secret, StoreError> {
        let (namespace, name) = identity(secret);
        self.api::<Secret>(&namespace)
            .replace(&name, &PostParams::default(), secret)
            .await
            .map_err(|e| map_error(e, "replace", "Secret", &namespace, &name))
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        match self
            .api::<Secret>(namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => match map_error(e, "delete", "Secret", namespace, name) {
                StoreError::NotFound { .. } => Ok(()),
                other => Err(other),
            },
        }
    }
}
