//! Image requests read from TOML.
//!
//! ```toml
//! arch = "x86_64"
//! image_type = "qcow2"
//! seed = 42
//! size = "20 GiB"
//!
//! [[repositories]]
//! id = "baseos"
//! baseurl = ["https://cdn.example.com/rhel9/baseos"]
//!
//! [blueprint]
//! packages = ["tmux"]
//!
//! [[blueprint.customizations.filesystem]]
//! mountpoint = "/var"
//! minsize = "5 GiB"
//! ```

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::blueprint::{deserialize_size, Blueprint};
use crate::rpmmd::RepoConfig;

/// Everything needed to assemble one image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImageRequest {
    pub arch: String,
    pub image_type: String,
    /// Seeds every generated identifier.
    #[serde(default)]
    pub seed: u64,
    /// Requested disk size in bytes; 0 selects the image type's default.
    #[serde(default, deserialize_with = "deserialize_size")]
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ostree: Option<OstreeOptions>,
    #[serde(default)]
    pub repositories: Vec<RepoConfig>,
    #[serde(default)]
    pub blueprint: Blueprint,
}

/// Where ostree-based image types get their commit from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OstreeOptions {
    /// Ref to build or install; defaults to the distro's ref for the arch.
    #[serde(default, rename = "ref")]
    pub reference: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    /// Ref of the parent commit fetched from `url`.
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub content_url: Option<String>,
}

pub fn load_request(path: &Path) -> Result<ImageRequest> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading image request '{}'", path.display()))?;
    let request: ImageRequest = toml::from_str(&text)
        .with_context(|| format!("parsing image request '{}'", path.display()))?;

    if request.arch.trim().is_empty() {
        bail!("invalid image request '{}': arch must not be empty", path.display());
    }
    if request.image_type.trim().is_empty() {
        bail!(
            "invalid image request '{}': image_type must not be empty",
            path.display()
        );
    }
    Ok(request)
}
