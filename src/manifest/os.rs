//! Package-based operating system tree.

use serde_json::json;

use super::pipeline::{PipelineBehaviour, ResolvedInputs};
use super::stages::{
    fstab_stage, grub2_stage, groups_stage, hostname_stage, keymap_stage, locale_stage, rpm_stage,
    selinux_stage, skopeo_stage, systemd_stage, timezone_stage, users_stage, Stage,
};
use super::{Manifest, PipelineRef};
use crate::blueprint::{GroupCustomization, UserCustomization};
use crate::container::ContainerSource;
use crate::disk::PartitionTable;
use crate::error::PlanError;
use crate::platform::Platform;
use crate::rpmmd::{package_version, repo_gpg_keys, repos_for, PackageSet, RepoConfig};

pub const OS_PACKAGE_SET: &str = "os";
pub const BLUEPRINT_PACKAGE_SET: &str = "blueprint";

/// Settings applied to the tree after the packages are installed.
#[derive(Debug, Clone, PartialEq)]
pub struct OsCustomizations {
    pub hostname: Option<String>,
    pub language: String,
    pub keyboard: Option<String>,
    pub timezone: String,
    pub kernel_name: String,
    pub kernel_options: Vec<String>,
    pub users: Vec<UserCustomization>,
    pub groups: Vec<GroupCustomization>,
    pub enabled_services: Vec<String>,
    pub disabled_services: Vec<String>,
}

impl Default for OsCustomizations {
    fn default() -> Self {
        Self {
            hostname: None,
            language: "C.UTF-8".to_string(),
            keyboard: None,
            timezone: "UTC".to_string(),
            kernel_name: "kernel".to_string(),
            kernel_options: Vec::new(),
            users: Vec::new(),
            groups: Vec::new(),
            enabled_services: Vec::new(),
            disabled_services: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OsTree {
    pub platform: Platform,
    pub repos: Vec<RepoConfig>,
    /// Base package set of the image type.
    pub packages: PackageSet,
    pub blueprint_packages: Vec<String>,
    pub containers: Vec<ContainerSource>,
    pub customizations: OsCustomizations,
    /// Table the tree is deployed onto; drives fstab and the bootloader.
    pub partition_table: Option<PartitionTable>,
    /// When set, the tree is prepared to be committed under this ref.
    pub ostree_ref: Option<String>,
    /// Install a kernel and bootloader.
    pub bootable: bool,
}

impl OsTree {
    fn kernel_name(&self) -> &str {
        &self.customizations.kernel_name
    }
}

impl PipelineBehaviour for OsTree {
    fn build_packages(&self, _manifest: &Manifest) -> Vec<String> {
        let mut packages = vec![
            "rpm".to_string(),
            "policycoreutils".to_string(),
            "selinux-policy-targeted".to_string(),
        ];
        if !self.containers.is_empty() {
            packages.push("skopeo".to_string());
        }
        if self.ostree_ref.is_some() {
            packages.push("rpm-ostree".to_string());
        }
        if self.bootable {
            packages.extend(self.platform.build_packages.iter().cloned());
        }
        packages
    }

    fn package_sets(&self, _manifest: &Manifest, _dependents: &[PipelineRef]) -> Vec<PackageSet> {
        let mut os = self.packages.clone();
        os.name = OS_PACKAGE_SET.to_string();
        if self.bootable {
            os.include.extend(self.platform.packages.iter().cloned());
            os.include.push(self.kernel_name().to_string());
        }
        if let Some(table) = &self.partition_table {
            os.include.extend(table.build_packages());
        }
        os.repositories = repos_for(&self.repos, OS_PACKAGE_SET);
        let mut chain = vec![os.normalized()];

        if !self.blueprint_packages.is_empty() {
            chain.push(
                PackageSet {
                    name: BLUEPRINT_PACKAGE_SET.to_string(),
                    include: self.blueprint_packages.clone(),
                    exclude: Vec::new(),
                    repositories: repos_for(&self.repos, BLUEPRINT_PACKAGE_SET),
                }
                .normalized(),
            );
        }
        chain
    }

    fn container_sources(&self) -> Vec<ContainerSource> {
        self.containers.clone()
    }

    fn resolve(&self, pipeline: &str, inputs: &mut ResolvedInputs) -> Result<(), PlanError> {
        if self.bootable {
            let version = package_version(&inputs.packages, self.kernel_name()).ok_or_else(|| {
                PlanError::missing(pipeline, format!("package '{}'", self.kernel_name()))
            })?;
            inputs.kernel_version = Some(version);
        }
        Ok(())
    }

    fn stages(&self, _manifest: &Manifest, resolved: &ResolvedInputs) -> Vec<Stage> {
        let custom = &self.customizations;
        let mut stages = vec![rpm_stage(&resolved.packages, &repo_gpg_keys(&self.repos))];

        if !resolved.containers.is_empty() {
            stages.push(skopeo_stage(&resolved.containers));
        }

        stages.push(locale_stage(&custom.language));
        if let Some(keyboard) = &custom.keyboard {
            stages.push(keymap_stage(keyboard));
        }
        if let Some(hostname) = &custom.hostname {
            stages.push(hostname_stage(hostname));
        }
        stages.push(timezone_stage(&custom.timezone));

        if !custom.groups.is_empty() {
            stages.push(groups_stage(&custom.groups));
        }
        if !custom.users.is_empty() {
            stages.push(users_stage(&custom.users));
        }
        if !custom.enabled_services.is_empty() || !custom.disabled_services.is_empty() {
            stages.push(systemd_stage(&custom.enabled_services, &custom.disabled_services));
        }

        if let Some(table) = &self.partition_table {
            stages.push(fstab_stage(table));
            if self.bootable {
                stages.push(grub2_stage(
                    table,
                    &self.platform,
                    resolved.kernel_version.as_deref(),
                    &custom.kernel_options,
                ));
            }
        }

        stages.push(selinux_stage());

        if self.ostree_ref.is_some() {
            stages.push(Stage::new(
                "org.osbuild.ostree.preptree",
                json!({ "etc_group_members": ["wheel", "docker"] }),
            ));
        }
        stages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::build::BuildRoot;
    use crate::resolve::fakes;

    fn tree() -> OsTree {
        OsTree {
            platform: Platform::aarch64_uefi("redhat"),
            repos: vec![
                RepoConfig {
                    id: "baseos".into(),
                    baseurl: vec!["https://repo.example.com/baseos".into()],
                    metalink: None,
                    gpg_keys: vec!["KEY".into()],
                    check_gpg: true,
                    package_sets: Vec::new(),
                },
                RepoConfig {
                    id: "extras".into(),
                    baseurl: vec!["https://repo.example.com/extras".into()],
                    metalink: None,
                    gpg_keys: Vec::new(),
                    check_gpg: false,
                    package_sets: vec![BLUEPRINT_PACKAGE_SET.into()],
                },
            ],
            packages: PackageSet::new("os", &["@core", "chrony"]),
            blueprint_packages: vec!["nginx".into()],
            containers: vec![ContainerSource {
                source: "registry.example.com/app:latest".into(),
                name: None,
                tls_verify: None,
            }],
            customizations: OsCustomizations {
                hostname: Some("edge".into()),
                enabled_services: vec!["nginx".into()],
                ..Default::default()
            },
            partition_table: None,
            ostree_ref: Some("rhel/9/aarch64/edge".into()),
            bootable: false,
        }
    }

    #[test]
    fn test_package_set_chain_scopes_repositories() {
        let mut m = Manifest::new();
        let build = m.add("build", None, BuildRoot::new("org.osbuild.rhel90", Vec::new()));
        let os = m.add("os", Some(build), tree());
        let chain = m.pipeline(os).package_set_requirements(&m);
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].repositories.len(), 1);
        assert_eq!(chain[1].repositories.len(), 2);
        assert!(!chain[0].include.contains(&"kernel".to_string()));
        let build_packages = m.pipeline(os).required_build_packages(&m);
        assert!(build_packages.contains(&"skopeo".to_string()));
        assert!(build_packages.contains(&"rpm-ostree".to_string()));
    }

    #[test]
    fn test_stages_follow_customizations() {
        let mut m = Manifest::new();
        let build = m.add("build", None, BuildRoot::new("org.osbuild.rhel90", Vec::new()));
        let os = m.add("os", Some(build), tree());
        let content = m.collect_content().clone();
        assert_eq!(content.containers["os"].len(), 1);
        let resolved = fakes::resolve(&content, "aarch64").unwrap();
        let doc = m.serialize(&resolved).unwrap();
        let os_doc = doc.pipeline(m.name_of(os)).unwrap();
        let kinds: Vec<&str> = os_doc.stages.iter().map(|s| s.kind.as_str()).collect();
        assert_eq!(
            kinds,
            vec![
                "org.osbuild.rpm",
                "org.osbuild.skopeo",
                "org.osbuild.locale",
                "org.osbuild.hostname",
                "org.osbuild.timezone",
                "org.osbuild.systemd",
                "org.osbuild.selinux",
                "org.osbuild.ostree.preptree",
            ]
        );
        assert_eq!(os_doc.stages[0].option("gpgkeys").unwrap()[0], "KEY");
        assert!(doc.sources.contains_key("org.osbuild.skopeo"));
    }
}
