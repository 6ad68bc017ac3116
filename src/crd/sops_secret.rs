//! # SopsSecret
//!
//! A SOPS-encrypted Secret manifest committed to Git and applied as-is.
//!
//! SOPS writes its `sops:` block at the root of the document it encrypts, and
//! users encrypt the whole manifest, so `data`, `stringData` and `sops` live at
//! the top level instead of under `spec`. `#[derive(CustomResource)]` only
//! produces `spec`-rooted types, which is why [`kube::Resource`] is implemented
//! by hand here and the CRD document is assembled in [`SopsSecret::crd`].
//!
//! # Example
//!
//! ```yaml
//! apiVersion: sops.octopilot.io/v1alpha1
//! kind: SopsSecret
//! metadata:
//!   name: db-creds
//!   namespace: app
//! data:
//!   password: ENC[AES256_GCM,data:...,type:str]
//! sops:
//!   mac: ENC[AES256_GCM,data:...,type:str]
//!   encrypted_regex: ^(data|stringData)$
//!   version: 3.8.1
//!   lastmodified: "2024-01-01T00:00:00Z"
//!   pgp:
//!     - fp: 0123456789ABCDEF0123456789ABCDEF01234567
//!       enc: |
//!         -----BEGIN PGP MESSAGE-----
//! ```

use super::status::SopsSecretStatus;
use super::SopsMetadata;
use crate::constants::{API_GROUP, API_VERSION};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::NamespaceResourceScope;
use kube::Resource;
use schemars::generate::SchemaSettings;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;

pub const SOPS_SECRET_KIND: &str = "SopsSecret";
const SOPS_SECRET_PLURAL: &str = "sopssecrets";

/// Declared encrypted secret
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SopsSecret {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    /// Encrypted key/value mapping (becomes `Secret.data`)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, String>,
    /// Encrypted string/value mapping (becomes `Secret.stringData`)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub string_data: BTreeMap<String, String>,
    #[serde(default)]
    pub sops: SopsMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SopsSecretStatus>,
}

fn default_api_version() -> String {
    format!("{API_GROUP}/{API_VERSION}")
}

fn default_kind() -> String {
    SOPS_SECRET_KIND.to_string()
}

impl Default for SopsSecret {
    fn default() -> Self {
        Self {
            api_version: default_api_version(),
            kind: default_kind(),
            metadata: ObjectMeta::default(),
            data: BTreeMap::new(),
            string_data: BTreeMap::new(),
            sops: SopsMetadata::default(),
            status: None,
        }
    }
}

impl SopsSecret {
    #[must_use]
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..ObjectMeta::default()
            },
            ..Self::default()
        }
    }

    /// Generate the `CustomResourceDefinition` for `SopsSecret`
    ///
    /// # Errors
    ///
    /// Fails only if the generated schema cannot be represented as a CRD,
    /// which would be a programming error in the schema types.
    pub fn crd() -> Result<CustomResourceDefinition, serde_json::Error> {
        let mut generator = SchemaSettings::openapi3()
            .with(|settings| settings.inline_subschemas = true)
            .into_generator();
        let sops = clean_schema(serde_json::to_value(
            generator.root_schema_for::<SopsMetadata>(),
        )?);
        let status = clean_schema(serde_json::to_value(
            generator.root_schema_for::<SopsSecretStatus>(),
        )?);
        let string_map = serde_json::json!({
            "type": "object",
            "additionalProperties": { "type": "string" }
        });

        serde_json::from_value(serde_json::json!({
            "apiVersion": "apiextensions.k8s.io/v1",
            "kind": "CustomResourceDefinition",
            "metadata": { "name": format!("{SOPS_SECRET_PLURAL}.{API_GROUP}") },
            "spec": {
                "group": API_GROUP,
                "scope": "Namespaced",
                "names": {
                    "kind": SOPS_SECRET_KIND,
                    "plural": SOPS_SECRET_PLURAL,
                    "singular": "sopssecret",
                    "shortNames": ["sopss"]
                },
                "versions": [{
                    "name": API_VERSION,
                    "served": true,
                    "storage": true,
                    "subresources": { "status": {} },
                    "additionalPrinterColumns": [
                        { "name": "Secret", "type": "string", "jsonPath": ".status.secret.name" },
                        { "name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp" }
                    ],
                    "schema": {
                        "openAPIV3Schema": {
                            "type": "object",
                            "properties": {
                                "apiVersion": { "type": "string" },
                                "kind": { "type": "string" },
                                "metadata": { "type": "object" },
                                "data": string_map,
                                "stringData": string_map,
                                "sops": sops,
                                "status": status
                            }
                        }
                    }
                }]
            }
        }))
    }
}

/// Drop the document-level keys schemars adds to a root schema
fn clean_schema(mut value: serde_json::Value) -> serde_json::Value {
    if let Some(object) = value.as_object_mut() {
        object.remove("$schema");
        object.remove("title");
        object.remove("definitions");
        object.remove("$defs");
    }
    value
}

impl Resource for SopsSecret {
    type DynamicType = ();
    type Scope = NamespaceResourceScope;

    fn kind(_: &()) -> Cow<'_, str> {
        Cow::Borrowed(SOPS_SECRET_KIND)
    }

    fn group(_: &()) -> Cow<'_, str> {
        Cow::Borrowed(API_GROUP)
    }

    fn version(_: &()) -> Cow<'_, str> {
        Cow::Borrowed(API_VERSION)
    }

    fn plural(_: &()) -> Cow<'_, str> {
        Cow::Borrowed(SOPS_SECRET_PLURAL)
    }

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}
