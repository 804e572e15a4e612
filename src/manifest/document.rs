//! The serialized manifest handed to the build executor.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use super::stages::Stage;
use crate::container::ContainerSpec;
use crate::ostree::CommitSpec;
use crate::rpmmd::PackageSpec;

pub const MANIFEST_VERSION: &str = "2";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDocument {
    pub name: String,
    /// `name:<build pipeline>`; absent for the root build pipeline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runner: Option<String>,
    #[serde(default)]
    pub stages: Vec<Stage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestDocument {
    pub version: String,
    pub pipelines: Vec<PipelineDocument>,
    #[serde(default)]
    pub sources: BTreeMap<String, Value>,
}

impl ManifestDocument {
    pub fn new(pipelines: Vec<PipelineDocument>, sources: Sources) -> Self {
        Self {
            version: MANIFEST_VERSION.to_string(),
            pipelines,
            sources: sources.into_document(),
        }
    }

    pub fn pipeline(&self, name: &str) -> Option<&PipelineDocument> {
        self.pipelines.iter().find(|p| p.name == name)
    }

    pub fn pipeline_names(&self) -> Vec<&str> {
        self.pipelines.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// sha256 of the compact JSON encoding.
    pub fn digest(&self) -> serde_json::Result<String> {
        let bytes = serde_json::to_vec(self)?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(format!("{:x}", hasher.finalize()))
    }
}

/// Everything the executor must fetch before running the pipelines.
#[derive(Debug, Clone, Default)]
pub struct Sources {
    curl: BTreeMap<String, String>,
    ostree: BTreeMap<String, String>,
    skopeo: BTreeMap<String, Value>,
}

impl Sources {
    pub fn add_packages(&mut self, specs: &[PackageSpec]) {
        for spec in specs {
            self.curl
                .insert(spec.checksum.clone(), spec.remote_location.clone());
        }
    }

    pub fn add_commits(&mut self, specs: &[CommitSpec]) {
        for spec in specs {
            self.ostree.insert(spec.checksum.clone(), spec.url.clone());
        }
    }

    pub fn add_containers(&mut self, specs: &[ContainerSpec]) {
        for spec in specs {
            let mut image = Map::new();
            image.insert("name".into(), json!(spec.source));
            image.insert("digest".into(), json!(spec.digest));
            if let Some(tls_verify) = spec.tls_verify {
                image.insert("tls-verify".into(), json!(tls_verify));
            }
            self.skopeo
                .insert(spec.image_id.clone(), json!({ "image": image }));
        }
    }

    fn into_document(self) -> BTreeMap<String, Value> {
        let mut sources = BTreeMap::new();
        if !self.curl.is_empty() {
            let items: Map<String, Value> = self
                .curl
                .into_iter()
                .map(|(checksum, url)| (checksum, json!({ "url": url })))
                .collect();
            sources.insert("org.osbuild.curl".to_string(), json!({ "items": items }));
        }
        if !self.ostree.is_empty() {
            let items: Map<String, Value> = self
                .ostree
                .into_iter()
                .map(|(checksum, url)| (checksum, json!({ "remote": { "url": url } })))
                .collect();
            sources.insert("org.osbuild.ostree".to_string(), json!({ "items": items }));
        }
        if !self.skopeo.is_empty() {
            let items: Map<String, Value> = self.skopeo.into_iter().collect();
            sources.insert("org.osbuild.skopeo".to_string(), json!({ "items": items }));
        }
        sources
    }
}
