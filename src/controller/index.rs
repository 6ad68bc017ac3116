//! # Owner Index
//!
//! Secondary lookup from a `SopsSecret` to the Secrets it controls.
//!
//! A Secret is indexed under an owner name only when it carries an active
//! controller reference whose kind is `SopsSecret`. The index is fed by a
//! watcher over all Secrets, so a lookup is a single scoped map read instead
//! of a list call.

use crate::crd::SOPS_SECRET_KIND;
use futures::{pin_mut, StreamExt};
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, ResourceExt};
use kube_runtime::watcher::{self, watcher};
use kube_runtime::WatchStreamExt;
use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Extract the owning `SopsSecret` name of a Secret, if any
#[must_use]
pub fn owner_index_key(secret: &Secret) -> Option<String> {
    let owner = secret
        .metadata
        .owner_references
        .as_ref()?
        .iter()
        .find(|owner| owner.controller == Some(true))?;
    (owner.kind == SOPS_SECRET_KIND).then(|| owner.name.clone())
}

/// (namespace, name)
type ObjectKey = (String, String);

#[derive(Debug, Default)]
struct IndexState {
    /// (namespace, owner) -> secret name -> secret
    owned: HashMap<ObjectKey, BTreeMap<String, Secret>>,
    /// (namespace, secret) -> owner, to unindex on owner change
    owners: HashMap<ObjectKey, String>,
    /// Listing in progress, swapped in on `InitDone`
    relist: Option<Vec<Secret>>,
}

impl IndexState {
    fn upsert(&mut self, secret: Secret) {
        let key = (secret.namespace().unwrap_or_default(), secret.name_any());
        self.unindex(&key);
        if let Some(owner) = owner_index_key(&secret) {
            self.owned
                .entry((key.0.clone(), owner.clone()))
                .or_default()
                .insert(key.1.clone(), secret);
            self.owners.insert(key, owner);
        }
    }

    fn unindex(&mut self, key: &ObjectKey) {
        let Some(owner) = self.owners.remove(key) else {
            return;
        };
        let owner_key = (key.0.clone(), owner);
        if let Some(secrets) = self.owned.get_mut(&owner_key) {
            secrets.remove(&key.1);
            if secrets.is_empty() {
                self.owned.remove(&owner_key);
            }
        }
    }
}

/// Index of Secrets by owning `SopsSecret`
#[derive(Debug)]
pub struct OwnerIndex {
    state: RwLock<IndexState>,
    ready: watch::Sender<bool>,
}

impl Default for OwnerIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl OwnerIndex {
    #[must_use]
    pub fn new() -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            state: RwLock::new(IndexState::default()),
            ready,
        }
    }

    /// Apply one watcher event
    pub fn apply_event(&self, event: watcher::Event<Secret>) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        match event {
            watcher::Event::Init => {
                state.relist = Some(Vec::new());
            }
            watcher::Event::InitApply(secret) => match state.relist.as_mut() {
                Some(relist) => relist.push(secret),
                None => state.upsert(secret),
            },
            watcher::Event::InitDone => {
                let relist = state.relist.take().unwrap_or_default();
                state.owned.clear();
                state.owners.clear();
                for secret in relist {
                    state.upsert(secret);
                }
                drop(state);
                self.ready.send_replace(true);
                debug!("Owner index listing complete");
            }
            watcher::Event::Apply(secret) => state.upsert(secret),
            watcher::Event::Delete(secret) => {
                let key = (secret.namespace().unwrap_or_default(), secret.name_any());
                state.unindex(&key);
            }
        }
    }

    /// Whether the initial listing has completed
    #[must_use]
    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Wait for the initial listing to complete
    pub async fn wait_ready(&self) {
        let mut ready = self.ready.subscribe();
        // The sender lives as long as `self`, so this cannot fail while we're borrowed
        if ready.wait_for(|ready| *ready).await.is_err() {
            warn!("Owner index readiness channel closed");
        }
    }

    /// Secrets in `namespace` controlled by the `SopsSecret` named `owner`
    #[must_use]
    pub fn find_owned(&self, namespace: &str, owner: &str) -> Vec<Secret> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .owned
            .get(&(namespace.to_string(), owner.to_string()))
            .map(|secrets| secrets.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Feed the index from a watch over `api` until the stream ends
    pub async fn run(&self, api: Api<Secret>) {
        info!("Starting owner index watch over Secrets");
        let stream = watcher(api, watcher::Config::default()).default_backoff();
        pin_mut!(stream);

        while let Some(event) = stream.next().await {
            match event {
                Ok(event) => self.apply_event(event),
                // Retried by the stream backoff
                Err(e) => warn!("Owner index watch error: {}", e),
            }
        }

        warn!("Owner index watch stream ended");
    }
}
