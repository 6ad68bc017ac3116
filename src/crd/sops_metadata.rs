//! # SOPS Metadata
//!
//! The `sops:` block the SOPS tool writes at the root of an encrypted manifest.
//! Field names follow the SOPS file format exactly: they are part of the
//! document handed to the decryption tool, not a Kubernetes convention.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Decryption metadata carried by a `SopsSecret`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct SopsMetadata {
    /// Integrity code over the encrypted tree
    #[serde(default)]
    pub mac: String,
    /// Regex selecting the keys that were encrypted
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub encrypted_regex: String,
    /// SOPS format version
    #[serde(default)]
    pub version: String,
    /// Timestamp of the last encryption (RFC3339)
    #[serde(default)]
    pub lastmodified: String,
    #[serde(default)]
    pub azure_kv: Vec<SopsAzureKvEntry>,
    #[serde(default)]
    pub gcp_kms: Vec<SopsGcpKmsEntry>,
    #[serde(default)]
    pub kms: Vec<SopsKmsEntry>,
    #[serde(default)]
    pub pgp: Vec<SopsPgpEntry>,
}

impl SopsMetadata {
    /// Fingerprints of the PGP keys the data key was encrypted for
    pub fn pgp_fingerprints(&self) -> impl Iterator<Item = &str> {
        self.pgp.iter().map(|entry| entry.fp.as_str())
    }
}

/// Data key encrypted for a PGP key
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct SopsPgpEntry {
    #[serde(default)]
    pub created_at: String,
    pub enc: String,
    /// Fingerprint of the recipient key
    pub fp: String,
}

/// Data key encrypted with AWS KMS
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct SopsKmsEntry {
    pub arn: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<std::collections::BTreeMap<String, String>>,
    #[serde(default)]
    pub created_at: String,
    pub enc: String,
    #[serde(default)]
    pub aws_profile: String,
}

/// Data key encrypted with GCP KMS
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct SopsGcpKmsEntry {
    pub resource_id: String,
    #[serde(default)]
    pub created_at: String,
    pub enc: String,
}

/// Data key encrypted with Azure Key Vault
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct SopsAzureKvEntry {
    pub vault_url: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub created_at: String,
    pub enc: String,
}
