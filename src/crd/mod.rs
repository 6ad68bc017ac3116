//! # Custom Resource Definitions
//!
//! CRD types for the SOPS Secret Controller.
//!
//! ## Module Structure
//!
//! - `sops_secret.rs` - `SopsSecret`, the encrypted declaration (hand-written resource)
//! - `sops_key.rs` - `SopsKey`, key material for the decryption tool
//! - `sops_metadata.rs` - the `sops:` block written by the SOPS tool
//! - `status.rs` - status records for both kinds

mod sops_key;
mod sops_metadata;
mod sops_secret;
mod status;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::core::CustomResourceExt;

pub use sops_key::{
    AzureKvKeySpec, GcpKmsKeySpec, KeySource, KeySourceError, KmsKeySpec, PgpKeySpec, SopsKey,
    SopsKeySpec,
};
pub use sops_metadata::{
    SopsAzureKvEntry, SopsGcpKmsEntry, SopsKmsEntry, SopsMetadata, SopsPgpEntry,
};
pub use sops_secret::{SopsSecret, SOPS_SECRET_KIND};
pub use status::{ResourceRef, SopsKeyStatus, SopsSecretStatus};

/// All CRDs served by the controller, in install order
///
/// # Errors
///
/// Propagates schema assembly failures from [`SopsSecret::crd`].
pub fn all_crds() -> Result<Vec<CustomResourceDefinition>, serde_json::Error> {
    Ok(vec![SopsSecret::crd()?, SopsKey::crd()])
}
