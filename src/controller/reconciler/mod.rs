//! # Reconciler
//!
//! State machines for the two declaration kinds.
//!
//! - `secret`: `SopsSecret` to derived Secret, with cleanup on deletion
//! - `key`: `SopsKey` to imported key material, with cleanup on deletion
//! - `decrypt`: decryption document building, decoding and materialization
//! - `status`: best-effort status maintenance
//! - `types`: shared context, identity and error types

pub mod decrypt;
pub mod key;
pub mod secret;
pub mod status;
pub mod types;

pub use key::reconcile_sops_key;
pub use secret::reconcile_sops_secret;
pub use types::{resource_key, BackoffState, Phase, Reconciler, ReconcilerError, ResourceIdentity};
