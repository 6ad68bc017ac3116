//! # Prelude
//!
//! Re-exports commonly used types and traits.
//!
//! ```rust
//! use sops_secret_controller::prelude::*;
//! ```

// CRD types
pub use crate::crd::*;

// Seams implemented by the Kubernetes store and the tool adapters
pub use crate::controller::gateway::{DecryptOptions, Decryptor, GatewayError, Keyring};
pub use crate::controller::store::{ResourceStore, StoreError};

// Reconciler types
pub use crate::controller::reconciler::{
    reconcile_sops_key, reconcile_sops_secret, Reconciler, ReconcilerError, ResourceIdentity,
};

pub use crate::config::ControllerConfig;
