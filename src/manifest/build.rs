//! The build root every other pipeline runs its stages in.

use serde_json::json;

use super::pipeline::{PipelineBehaviour, ResolvedInputs};
use super::stages::{rpm_stage, Stage};
use super::{Manifest, PipelineRef};
use crate::platform::strings;
use crate::rpmmd::{repo_gpg_keys, repos_for, PackageSet, RepoConfig};

pub const BUILD_PACKAGE_SET: &str = "build";

#[derive(Debug, Clone)]
pub struct BuildRoot {
    /// Stage runner of the host distribution, e.g. `org.osbuild.rhel90`.
    pub runner: String,
    pub repos: Vec<RepoConfig>,
    pub base_packages: Vec<String>,
}

impl BuildRoot {
    pub fn new(runner: &str, repos: Vec<RepoConfig>) -> Self {
        Self {
            runner: runner.to_string(),
            repos: repos_for(&repos, BUILD_PACKAGE_SET),
            base_packages: strings(&[
                "dnf",
                "dosfstools",
                "e2fsprogs",
                "glibc",
                "lorax-templates-generic",
                "lorax-templates-rhel",
                "policycoreutils",
                "python3-iniparse",
                "qemu-img",
                "rpm",
                "selinux-policy-targeted",
                "systemd",
                "tar",
                "xfsprogs",
                "xz",
            ]),
        }
    }
}

impl PipelineBehaviour for BuildRoot {
    fn package_sets(&self, manifest: &Manifest, dependents: &[PipelineRef]) -> Vec<PackageSet> {
        let mut include = self.base_packages.clone();
        for dependent in dependents {
            include.extend(manifest.pipeline(*dependent).required_build_packages(manifest));
        }
        let set = PackageSet {
            name: BUILD_PACKAGE_SET.to_string(),
            include,
            exclude: Vec::new(),
            repositories: self.repos.clone(),
        };
        vec![set.normalized()]
    }

    fn stages(&self, _manifest: &Manifest, resolved: &ResolvedInputs) -> Vec<Stage> {
        vec![
            rpm_stage(&resolved.packages, &repo_gpg_keys(&self.repos)),
            Stage::new(
                "org.osbuild.selinux",
                json!({
                    "file_contexts": "etc/selinux/targeted/contexts/files/file_contexts",
                    "labels": { "/usr/bin/cp": "system_u:object_r:install_exec_t:s0" }
                }),
            ),
        ]
    }

    fn runner(&self) -> Option<&str> {
        Some(&self.runner)
    }
}
