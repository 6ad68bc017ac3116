//! # Types
//!
//! Core types for the reconcilers.

use crate::config::ControllerConfig;
use crate::controller::backoff::FibonacciBackoff;
use crate::controller::gateway::{Decryptor, GatewayError, Keyring};
use crate::controller::store::{ResourceStore, StoreError};
use crate::crd::KeySourceError;
use kube::ResourceExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcilerError {
    /// Optimistic-concurrency conflict, retried promptly with fresh state
    #[error("stale write: {0}")]
    Conflict(#[source] StoreError),

    #[error("persistence failure: {0}")]
    Persistence(#[source] StoreError),

    #[error("gateway failure: {0}")]
    Gateway(#[from] GatewayError),

    /// The decryption document could not be encoded or decoded
    #[error("decryption document error: {0}")]
    Document(String),

    #[error("invalid SopsKey: {0}")]
    InvalidKey(#[from] KeySourceError),

    #[error("{kind} {name} has no namespace")]
    MissingNamespace { kind: String, name: String },

    #[error("{kind} {namespace}/{name} has no uid, cannot own derived objects")]
    MissingUid {
        kind: &'static str,
        namespace: String,
        name: String,
    },
}

impl From<StoreError> for ReconcilerError {
    fn from(error: StoreError) -> Self {
        if error.is_conflict() {
            ReconcilerError::Conflict(error)
        } else {
            ReconcilerError::Persistence(error)
        }
    }
}

impl ReconcilerError {
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, ReconcilerError::Conflict(_))
    }
}

/// Namespaced identity of a declaration
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceIdentity {
    pub namespace: String,
    pub name: String,
}

impl ResourceIdentity {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Identity of a namespaced resource
    ///
    /// # Errors
    ///
    /// Returns [`ReconcilerError::MissingNamespace`] for objects without a namespace.
    pub fn of<K>(obj: &K) -> Result<Self, ReconcilerError>
    where
        K: kube::Resource<DynamicType = ()>,
    {
        let name = obj.name_any();
        match obj.namespace() {
            Some(namespace) => Ok(Self { namespace, name }),
            None => Err(ReconcilerError::MissingNamespace {
                kind: K::kind(&()).into_owned(),
                name,
            }),
        }
    }
}

impl std::fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Which branch of the state machine an invocation took
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Update,
    Cleanup,
}

impl Phase {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Update => "update",
            Phase::Cleanup => "cleanup",
        }
    }
}

/// Backoff state for a specific resource
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: FibonacciBackoff,
    pub error_count: u32,
}

impl BackoffState {
    #[must_use]
    pub fn new(min_seconds: u64, max_seconds: u64) -> Self {
        Self {
            backoff: FibonacciBackoff::new(min_seconds, max_seconds),
            error_count: 0,
        }
    }

    pub fn increment_error(&mut self) {
        self.error_count += 1;
    }
}

/// Shared reconciliation context
///
/// Every collaborator is injected, so tests run the real state machines
/// against in-memory fakes.
#[derive(Clone)]
pub struct Reconciler {
    pub store: Arc<dyn ResourceStore>,
    pub decryptor: Arc<dyn Decryptor>,
    pub keyring: Arc<dyn Keyring>,
    pub config: ControllerConfig,
    /// Backoff state per resource, keyed by `kind/namespace/name`
    pub backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    #[must_use]
    pub fn new(
        store: Arc<dyn ResourceStore>,
        decryptor: Arc<dyn Decryptor>,
        keyring: Arc<dyn Keyring>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            store,
            decryptor,
            keyring,
            config,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Advance the error backoff for a resource
    ///
    /// Returns the delay in seconds and the number of consecutive errors.
    pub fn next_error_backoff(&self, resource_key: &str) -> (u64, u32) {
        let mut states = self
            .backoff_states
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let state = states.entry(resource_key.to_string()).or_insert_with(|| {
            BackoffState::new(self.config.backoff_min_secs, self.config.backoff_max_secs)
        });
        state.increment_error();
        (state.backoff.next_backoff_seconds(), state.error_count)
    }

    /// Forget the error backoff for a resource, returns whether it was backing off
    pub fn reset_backoff(&self, resource_key: &str) -> bool {
        let mut states = self
            .backoff_states
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // Dropped rather than reset, so the map only holds resources that are failing
        states
            .remove(resource_key)
            .is_some_and(|state| state.error_count > 0)
    }
}

/// Key for per-resource backoff state
#[must_use]
pub fn resource_key(kind: &str, identity: &ResourceIdentity) -> String {
    format!("{kind}/{identity}")
}
