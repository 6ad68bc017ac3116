//! # Status
//!
//! Status records kept current by the reconcilers. Both are best-effort:
//! a stale status never blocks convergence.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reference to another object in the cluster
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

/// Status of a `SopsSecret`
///
/// Fields are always serialized so that a merge patch clears stale values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SopsSecretStatus {
    /// The derived Secret
    #[serde(default)]
    pub secret: Option<ResourceRef>,
    /// `SopsKey` resources whose fingerprint is a recipient of this secret
    #[serde(default)]
    pub keys: Vec<ResourceRef>,
}

/// Status of a `SopsKey`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SopsKeyStatus {
    /// Fingerprint of the imported key
    #[serde(default)]
    pub fingerprint: Option<String>,
    /// Provider of the key material (pgp, kms, azureKv, gcpKms)
    #[serde(default)]
    pub key_type: Option<String>,
    /// Time of the last import that changed the status (RFC3339)
    #[serde(default)]
    pub last_import_time: Option<String>,
}
