//! Package sets handed to the depsolver and the specs it hands back.

use serde::{Deserialize, Serialize};

/// A repository a package set may be resolved against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepoConfig {
    pub id: String,
    #[serde(default)]
    pub baseurl: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metalink: Option<String>,
    #[serde(default)]
    pub gpg_keys: Vec<String>,
    #[serde(default)]
    pub check_gpg: bool,
    /// Package set names this repository is limited to. Empty means every set.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub package_sets: Vec<String>,
}

impl RepoConfig {
    pub fn applies_to(&self, set_name: &str) -> bool {
        self.package_sets.is_empty() || self.package_sets.iter().any(|s| s == set_name)
    }
}

/// Split `repos` into the general ones and those scoped to `set_name`.
pub fn repos_for(repos: &[RepoConfig], set_name: &str) -> Vec<RepoConfig> {
    repos
        .iter()
        .filter(|repo| repo.applies_to(set_name))
        .cloned()
        .collect()
}

/// GPG keys of every repository that checks signatures, deduplicated.
pub fn repo_gpg_keys(repos: &[RepoConfig]) -> Vec<String> {
    let mut keys: Vec<String> = repos
        .iter()
        .filter(|repo| repo.check_gpg)
        .flat_map(|repo| repo.gpg_keys.iter().cloned())
        .collect();
    keys.sort();
    keys.dedup();
    keys
}

/// A named group of package names to resolve together.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PackageSet {
    pub name: String,
    pub include: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub repositories: Vec<RepoConfig>,
}

impl PackageSet {
    pub fn new(name: &str, include: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            include: include.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn with_exclude(mut self, exclude: &[&str]) -> Self {
        self.exclude = exclude.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Merge another set's includes and excludes into this one.
    pub fn append(mut self, other: &PackageSet) -> Self {
        self.include.extend(other.include.iter().cloned());
        self.exclude.extend(other.exclude.iter().cloned());
        self
    }

    /// Sort and deduplicate the package name lists.
    pub fn normalized(mut self) -> Self {
        self.include.sort();
        self.include.dedup();
        self.exclude.sort();
        self.exclude.dedup();
        self
    }
}

/// One concrete package chosen by the depsolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSpec {
    pub name: String,
    #[serde(default)]
    pub epoch: u32,
    pub version: String,
    pub release: String,
    pub arch: String,
    pub remote_location: String,
    /// `sha256:<hex>`
    pub checksum: String,
    #[serde(default)]
    pub check_gpg: bool,
}

impl PackageSpec {
    /// `version-release.arch`, the form used for kernel paths under `/boot`.
    pub fn version_release_arch(&self) -> String {
        format!("{}-{}.{}", self.version, self.release, self.arch)
    }
}

/// Find the `version-release.arch` string of package `name`.
pub fn package_version(specs: &[PackageSpec], name: &str) -> Option<String> {
    specs
        .iter()
        .find(|spec| spec.name == name)
        .map(PackageSpec::version_release_arch)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo(id: &str, sets: &[&str]) -> RepoConfig {
        RepoConfig {
            id: id.to_string(),
            baseurl: vec![format!("https://example.com/{}", id)],
            metalink: None,
            gpg_keys: Vec::new(),
            check_gpg: false,
            package_sets: sets.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_repo_scoping() {
        let repos = vec![repo("baseos", &[]), repo("extras", &["blueprint"])];
        assert_eq!(repos_for(&repos, "build").len(), 1);
        assert_eq!(repos_for(&repos, "blueprint").len(), 2);
    }

    #[test]
    fn test_normalized_sorts_and_dedups() {
        let set = PackageSet::new("os", &["vim", "bash", "vim"]).normalized();
        assert_eq!(set.include, vec!["bash", "vim"]);
    }

    #[test]
    fn test_package_version() {
        let specs = vec![PackageSpec {
            name: "kernel".into(),
            epoch: 0,
            version: "5.14.0".into(),
            release: "362.el9".into(),
            arch: "x86_64".into(),
            remote_location: "https://example.com/kernel.rpm".into(),
            checksum: "sha256:00".into(),
            check_gpg: true,
        }];
        assert_eq!(
            package_version(&specs, "kernel").as_deref(),
            Some("5.14.0-362.el9.x86_64")
        );
        assert_eq!(package_version(&specs, "kernel-rt"), None);
    }
}
