//! OSTree commit references and remotes.

use serde::{Deserialize, Serialize};

/// A commit to fetch: a ref on a remote repository, checksum still unknown.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommitSource {
    #[serde(rename = "ref")]
    pub reference: String,
    pub url: String,
}

/// A resolved commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSpec {
    #[serde(rename = "ref")]
    pub reference: String,
    pub url: String,
    pub checksum: String,
}

/// Remote configured inside a deployed ostree system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Remote {
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gpg_key_paths: Vec<String>,
}

/// Expand `{arch}` in an ostree ref template.
pub fn default_ref(template: &str, arch: &str) -> String {
    template.replace("{arch}", arch)
}

/// A ref is a `/`-separated list of non-empty components made of
/// alphanumerics, `-`, `_` and `.`.
pub fn verify_ref(reference: &str) -> bool {
    !reference.is_empty()
        && reference.split('/').all(|part| {
            !part.is_empty()
                && part
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        })
}
