//! Container images embedded into OS trees.

use serde::{Deserialize, Serialize};

/// A container image reference requested by the blueprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContainerSource {
    pub source: String,
    /// Name to store the image under; defaults to `source`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_verify: Option<bool>,
}

impl ContainerSource {
    pub fn local_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.source)
    }
}

/// A resolved container image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub source: String,
    /// Manifest digest, `sha256:<hex>`.
    pub digest: String,
    /// Image (config) id, `sha256:<hex>`.
    pub image_id: String,
    pub local_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_verify: Option<bool>,
}
