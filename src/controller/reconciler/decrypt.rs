//! # Decrypt Pipeline
//!
//! Turns a `SopsSecret` into the fields of its derived Secret.
//!
//! The declaration is serialized back into the YAML document the user
//! encrypted (field names and nesting are what the decryption tool expects),
//! piped through the [`Decryptor`] with MAC verification disabled, and the
//! plaintext document is parsed back. Labels and annotations are copied from
//! the decrypted metadata, values are copied verbatim.

use super::types::ReconcilerError;
use crate::controller::gateway::{DecryptOptions, Decryptor};
use crate::crd::{SopsMetadata, SopsSecret};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::{Resource, ResourceExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;
use zeroize::{Zeroize, Zeroizing};

/// The document handed to the decryption tool
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EncryptedDocument<'a> {
    api_version: &'a str,
    kind: &'a str,
    metadata: DocumentMetadata<'a>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    data: &'a BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    string_data: &'a BTreeMap<String, String>,
    sops: &'a SopsMetadata,
}

/// User-authored metadata only; server-populated fields never went through SOPS
#[derive(Serialize)]
struct DocumentMetadata<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    labels: Option<&'a BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    annotations: Option<&'a BTreeMap<String, String>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DecryptedDocument {
    #[serde(default)]
    metadata: DecryptedMetadata,
    #[serde(default)]
    data: BTreeMap<String, serde_yaml::Value>,
    #[serde(default)]
    string_data: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Deserialize, Default)]
struct DecryptedMetadata {
    #[serde(default)]
    labels: Option<BTreeMap<String, String>>,
    #[serde(default)]
    annotations: Option<BTreeMap<String, String>>,
}

/// Plaintext fields of a derived Secret
///
/// Values are zeroized on drop.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DecryptedFields {
    pub labels: Option<BTreeMap<String, String>>,
    pub annotations: Option<BTreeMap<String, String>>,
    pub data: BTreeMap<String, String>,
    pub string_data: BTreeMap<String, String>,
}

impl Drop for DecryptedFields {
    fn drop(&mut self) {
        self.data.values_mut().for_each(Zeroize::zeroize);
        self.string_data.values_mut().for_each(Zeroize::zeroize);
    }
}

/// Serialize a declaration into the decryption tool's input document
///
/// # Errors
///
/// Returns [`ReconcilerError::Document`] if YAML encoding fails.
pub fn build_document(declaration: &SopsSecret) -> Result<String, ReconcilerError> {
    let document = EncryptedDocument {
        api_version: &declaration.api_version,
        kind: &declaration.kind,
        metadata: DocumentMetadata {
            name: declaration.metadata.name.as_deref(),
            namespace: declaration.metadata.namespace.as_deref(),
            labels: declaration.metadata.labels.as_ref(),
            annotations: declaration.metadata.annotations.as_ref(),
        },
        data: &declaration.data,
        string_data: &declaration.string_data,
        sops: &declaration.sops,
    };
    serde_yaml::to_string(&document)
        .map_err(|e| ReconcilerError::Document(format!("failed to encode document: {e}")))
}

/// Parse the decryption tool's output document
///
/// # Errors
///
/// Returns [`ReconcilerError::Document`] if the output is not a document of
/// the expected shape, or a value is not a scalar.
pub fn decode_document(plaintext: &str) -> Result<DecryptedFields, ReconcilerError> {
    let document: DecryptedDocument = serde_yaml::from_str(plaintext)
        .map_err(|e| ReconcilerError::Document(format!("failed to decode document: {e}")))?;

    Ok(DecryptedFields {
        labels: document.metadata.labels,
        annotations: document.metadata.annotations,
        data: scalar_map("data", document.data)?,
        string_data: scalar_map("stringData", document.string_data)?,
    })
}

/// Render decrypted scalars as strings
///
/// SOPS restores the original YAML type, so a value written as `8080` comes
/// back as a number.
fn scalar_map(
    field: &str,
    values: BTreeMap<String, serde_yaml::Value>,
) -> Result<BTreeMap<String, String>, ReconcilerError> {
    values
        .into_iter()
        .map(|(key, value)| {
            let rendered = match value {
                serde_yaml::Value::String(s) => s,
                serde_yaml::Value::Number(n) => n.to_string(),
                serde_yaml::Value::Bool(b) => b.to_string(),
                serde_yaml::Value::Null => String::new(),
                serde_yaml::Value::Sequence(_)
                | serde_yaml::Value::Mapping(_)
                | serde_yaml::Value::Tagged(_) => {
                    return Err(ReconcilerError::Document(format!(
                        "{field}.{key} is not a scalar value"
                    )));
                }
            };
            Ok((key, rendered))
        })
        .collect()
}

/// Run the full pipeline for one declaration
///
/// # Errors
///
/// Propagates document and gateway errors unchanged.
pub async fn decrypt_declaration(
    declaration: &SopsSecret,
    decryptor: &dyn Decryptor,
) -> Result<DecryptedFields, ReconcilerError> {
    let document = build_document(declaration)?;
    let options = DecryptOptions {
        ignore_mac: true,
        verbose: false,
    };
    let plaintext = Zeroizing::new(decryptor.decrypt(&document, &options).await?);
    let fields = decode_document(&plaintext)?;
    debug!(
        "Decrypted {} data and {} stringData entries",
        fields.data.len(),
        fields.string_data.len()
    );
    Ok(fields)
}

/// Upsert the controller reference to `owner`
///
/// Non-controller references are kept; any other controller reference is
/// replaced.
///
/// # Errors
///
/// Returns [`ReconcilerError::MissingUid`] when the owner has not been
/// persisted yet.
pub fn set_controller_reference(
    meta: &mut ObjectMeta,
    owner: &SopsSecret,
) -> Result<(), ReconcilerError> {
    let owner_ref = owner
        .controller_owner_ref(&())
        .ok_or_else(|| ReconcilerError::MissingUid {
            kind: "SopsSecret",
            namespace: owner.namespace().unwrap_or_default(),
            name: owner.name_any(),
        })?;

    let refs = meta.owner_references.get_or_insert_with(Vec::new);
    refs.retain(|r| r.uid != owner_ref.uid && r.controller != Some(true));
    refs.push(owner_ref);
    Ok(())
}

/// Compute the desired state of the derived Secret
///
/// `existing` is the Secret found through the owner index. Only the managed
/// fields are overwritten, everything else is kept as found.
///
/// # Errors
///
/// Fails if the controller reference cannot be set.
pub fn desired_secret(
    existing: Option<&Secret>,
    declaration: &SopsSecret,
    fields: &DecryptedFields,
) -> Result<Secret, ReconcilerError> {
    let mut secret = existing.cloned().unwrap_or_else(|| Secret {
        metadata: ObjectMeta {
            name: declaration.metadata.name.clone(),
            namespace: declaration.metadata.namespace.clone(),
            ..ObjectMeta::default()
        },
        ..Secret::default()
    });

    secret.metadata.labels = non_empty(fields.labels.clone());
    secret.metadata.annotations = non_empty(fields.annotations.clone());
    secret.data = non_empty(Some(fold_data(fields)));
    secret.string_data = None;
    set_controller_reference(&mut secret.metadata, declaration)?;
    Ok(secret)
}

/// Fold `stringData` into `data` the way the API server does
fn fold_data(fields: &DecryptedFields) -> BTreeMap<String, ByteString> {
    fields
        .data
        .iter()
        .chain(&fields.string_data)
        .map(|(key, value)| (key.clone(), ByteString(value.as_bytes().to_vec())))
        .collect()
}

fn non_empty<V>(map: Option<BTreeMap<String, V>>) -> Option<BTreeMap<String, V>> {
    map.filter(|m| !m.is_empty())
}
