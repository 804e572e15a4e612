//! Installer runtime trees: an Anaconda environment or a CoreOS installer.

use serde_json::{json, Map, Value};

use super::pipeline::{PipelineBehaviour, ResolvedInputs};
use super::stages::{groups_stage, locale_stage, rpm_stage, users_stage, Stage};
use super::{Manifest, PipelineRef};
use crate::blueprint::{FdoCustomization, GroupCustomization, UserCustomization};
use crate::error::PlanError;
use crate::platform::{strings, Arch, Platform};
use crate::rpmmd::{package_version, repo_gpg_keys, repos_for, PackageSet, RepoConfig};

pub const INSTALLER_PACKAGE_SET: &str = "installer";

/// Where the FDO DIUN root certificates land inside the initramfs.
const FDO_ROOT_CERTS_PATH: &str = "/fdo_diun_pub_key_root_certs.pem";

#[derive(Debug, Clone, PartialEq)]
pub enum InstallerFlavor {
    Anaconda {
        /// Anaconda modules enabled in addition to the defaults.
        modules: Vec<String>,
        users: Vec<UserCustomization>,
        groups: Vec<GroupCustomization>,
    },
    CoreOs {
        fdo: Option<FdoCustomization>,
    },
}

#[derive(Debug, Clone)]
pub struct Installer {
    pub platform: Platform,
    pub repos: Vec<RepoConfig>,
    pub flavor: InstallerFlavor,
    pub extra_packages: Vec<String>,
    pub product: String,
    pub version: String,
    pub variant: String,
    pub kernel_name: String,
    /// Name network devices with biosdevname when the installer boots.
    pub biosdevname: bool,
    pub dracut_modules: Vec<String>,
}

impl Installer {
    pub fn new(
        platform: Platform,
        repos: Vec<RepoConfig>,
        flavor: InstallerFlavor,
        product: &str,
        version: &str,
    ) -> Self {
        Self {
            biosdevname: platform.arch == Arch::X86_64,
            platform,
            repos: repos_for(&repos, INSTALLER_PACKAGE_SET),
            flavor,
            extra_packages: Vec::new(),
            product: product.to_string(),
            version: version.to_string(),
            variant: String::new(),
            kernel_name: "kernel".to_string(),
            dracut_modules: Vec::new(),
        }
    }

    /// Bootloader packages the installer media needs.
    ///
    /// Panics for architectures installers are not built for.
    fn boot_packages(&self) -> Vec<String> {
        let mut packages = strings(&[
            "grub2-tools",
            "grub2-tools-extra",
            "grub2-tools-minimal",
            "efibootmgr",
        ]);
        match self.platform.arch {
            Arch::X86_64 => packages.extend(strings(&[
                "grub2-efi-x64",
                "grub2-efi-x64-cdboot",
                "grub2-pc",
                "grub2-pc-modules",
                "shim-x64",
                "syslinux",
                "syslinux-nonlinux",
            ])),
            Arch::Aarch64 => packages.extend(strings(&[
                "grub2-efi-aa64-cdboot",
                "grub2-efi-aa64",
                "shim-aa64",
            ])),
            other => panic!("installer pipelines do not support architecture {}", other),
        }
        packages
    }

    fn flavor_packages(&self) -> Vec<String> {
        match &self.flavor {
            InstallerFlavor::Anaconda { .. } => strings(&[
                "anaconda-dracut",
                "anaconda-install-env-deps",
                "anaconda-widgets",
                "dracut-config-generic",
                "dracut-network",
                "glibc-all-langpacks",
                "plymouth",
                "rng-tools",
                "rpm-ostree",
                "selinux-policy-targeted",
                "tmux",
            ]),
            InstallerFlavor::CoreOs { .. } => strings(&[
                "coreos-installer",
                "coreos-installer-dracut",
                "fdo-init",
            ]),
        }
    }

    fn dracut_stage(&self, kernel_version: Option<&str>, install: &[&str]) -> Stage {
        let mut modules = self.dracut_modules.clone();
        match &self.flavor {
            InstallerFlavor::Anaconda { .. } => {
                modules.extend(strings(&["anaconda", "rdma", "rngd", "multipath", "fcoe", "nfs"]))
            }
            InstallerFlavor::CoreOs { .. } => modules.extend(strings(&["coreos-installer", "fdo"])),
        }
        if self.biosdevname {
            modules.push("biosdevname".to_string());
        }

        let mut options = Map::new();
        options.insert("kernel".into(), json!(kernel_version.into_iter().collect::<Vec<_>>()));
        options.insert("modules".into(), json!(modules));
        if !install.is_empty() {
            options.insert("install".into(), json!(install));
        }
        Stage::new("org.osbuild.dracut", Value::Object(options))
    }
}

impl PipelineBehaviour for Installer {
    fn build_packages(&self, _manifest: &Manifest) -> Vec<String> {
        let mut packages = self.boot_packages();
        packages.extend(strings(&["rpm", "lorax-templates-generic"]));
        packages
    }

    fn package_sets(&self, _manifest: &Manifest, _dependents: &[PipelineRef]) -> Vec<PackageSet> {
        let mut include = self.boot_packages();
        include.extend(self.flavor_packages());
        include.push(self.kernel_name.clone());
        include.extend(self.extra_packages.iter().cloned());
        vec![PackageSet {
            name: INSTALLER_PACKAGE_SET.to_string(),
            include,
            exclude: Vec::new(),
            repositories: self.repos.clone(),
        }
        .normalized()]
    }

    fn resolve(&self, pipeline: &str, inputs: &mut ResolvedInputs) -> Result<(), PlanError> {
        let version = package_version(&inputs.packages, &self.kernel_name)
            .ok_or_else(|| PlanError::missing(pipeline, format!("package '{}'", self.kernel_name)))?;
        inputs.kernel_version = Some(version);
        Ok(())
    }

    fn stages(&self, _manifest: &Manifest, resolved: &ResolvedInputs) -> Vec<Stage> {
        let kernel_version = resolved.kernel_version.as_deref();
        let mut stages = vec![
            rpm_stage(&resolved.packages, &repo_gpg_keys(&self.repos)),
            Stage::new(
                "org.osbuild.buildstamp",
                json!({
                    "arch": self.platform.arch.as_str(),
                    "product": self.product,
                    "variant": self.variant,
                    "version": self.version,
                    "final": true,
                }),
            ),
            locale_stage("C.UTF-8"),
        ];

        match &self.flavor {
            InstallerFlavor::Anaconda { modules, users, groups } => {
                if !groups.is_empty() {
                    stages.push(groups_stage(groups));
                }
                let mut installer_users = vec![
                    UserCustomization {
                        name: "root".into(),
                        password: Some(String::new()),
                        ..Default::default()
                    },
                    UserCustomization {
                        name: "install".into(),
                        uid: Some(0),
                        gid: Some(0),
                        home: Some("/root".into()),
                        shell: Some("/usr/libexec/anaconda/run-anaconda".into()),
                        password: Some(String::new()),
                        ..Default::default()
                    },
                ];
                installer_users.extend(users.iter().cloned());
                stages.push(users_stage(&installer_users));

                let mut kickstart_modules = strings(&[
                    "org.fedoraproject.Anaconda.Modules.Network",
                    "org.fedoraproject.Anaconda.Modules.Payloads",
                    "org.fedoraproject.Anaconda.Modules.Storage",
                ]);
                kickstart_modules.extend(modules.iter().cloned());
                stages.push(Stage::new(
                    "org.osbuild.anaconda",
                    json!({ "kickstart-modules": kickstart_modules }),
                ));
                stages.push(self.dracut_stage(kernel_version, &[]));
                stages.push(Stage::new(
                    "org.osbuild.selinux.config",
                    json!({ "state": "permissive" }),
                ));
            }
            InstallerFlavor::CoreOs { fdo } => {
                let root_certs = fdo.as_ref().and_then(|fdo| fdo.diun_pub_key_root_certs.as_deref());
                let install = match root_certs {
                    Some(certs) => {
                        stages.push(Stage::new(
                            "org.osbuild.fdo",
                            json!({ "rootcerts": certs, "path": FDO_ROOT_CERTS_PATH }),
                        ));
                        vec![FDO_ROOT_CERTS_PATH]
                    }
                    None => Vec::new(),
                };
                stages.push(self.dracut_stage(kernel_version, &install));
            }
        }
        stages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::build::BuildRoot;
    use crate::resolve::fakes;

    fn coreos(fdo: Option<FdoCustomization>) -> Installer {
        Installer::new(
            Platform::aarch64_uefi("redhat"),
            Vec::new(),
            InstallerFlavor::CoreOs { fdo },
            "Red Hat Enterprise Linux",
            "9.4",
        )
    }

    #[test]
    fn test_boot_packages_per_arch() {
        let m = Manifest::new();
        let installer = coreos(None);
        let packages = installer.build_packages(&m);
        assert!(packages.contains(&"shim-aa64".to_string()));
        assert!(!packages.contains(&"syslinux".to_string()));
        assert!(packages.contains(&"lorax-templates-generic".to_string()));

        let anaconda = Installer::new(
            Platform::x86_64_hybrid("redhat"),
            Vec::new(),
            InstallerFlavor::Anaconda {
                modules: Vec::new(),
                users: Vec::new(),
                groups: Vec::new(),
            },
            "Red Hat Enterprise Linux",
            "9.4",
        );
        assert!(anaconda.biosdevname);
        assert!(anaconda.build_packages(&m).contains(&"syslinux-nonlinux".to_string()));
    }

    #[test]
    #[should_panic(expected = "do not support architecture")]
    fn test_unsupported_arch_panics() {
        let mut installer = coreos(None);
        installer.platform.arch = Arch::S390x;
        installer.boot_packages();
    }

    #[test]
    fn test_coreos_with_fdo_root_certs() {
        let mut m = Manifest::new();
        let build = m.add("build", None, BuildRoot::new("org.osbuild.rhel90", Vec::new()));
        m.add(
            "coi-tree",
            Some(build),
            coreos(Some(FdoCustomization {
                manufacturing_server_url: Some("https://fdo.example.com".into()),
                diun_pub_key_root_certs: Some("CERTS".into()),
                ..Default::default()
            })),
        );
        let content = m.collect_content().clone();
        let resolved = fakes::resolve(&content, "aarch64").unwrap();
        let doc = m.serialize(&resolved).unwrap();
        let stages = &doc.pipeline("coi-tree").unwrap().stages;
        let kinds: Vec<&str> = stages.iter().map(|s| s.kind.as_str()).collect();
        assert_eq!(
            kinds,
            vec![
                "org.osbuild.rpm",
                "org.osbuild.buildstamp",
                "org.osbuild.locale",
                "org.osbuild.fdo",
                "org.osbuild.dracut",
            ]
        );
        let dracut = stages.last().unwrap();
        assert_eq!(dracut.option("kernel").unwrap()[0], "1.0-1.el9.aarch64");
        assert_eq!(dracut.option("install").unwrap()[0], FDO_ROOT_CERTS_PATH);
        assert_eq!(stages[1].option("final").unwrap(), true);
    }

    #[test]
    fn test_missing_kernel_is_reported() {
        let mut m = Manifest::new();
        let build = m.add("build", None, BuildRoot::new("org.osbuild.rhel90", Vec::new()));
        m.add("coi-tree", Some(build), coreos(None));
        let content = m.collect_content().clone();
        let mut resolved = fakes::resolve(&content, "aarch64").unwrap();
        if let Some(specs) = resolved.packages.get_mut("coi-tree") {
            specs.retain(|spec| spec.name != "kernel");
        }
        assert!(matches!(
            m.serialize(&resolved),
            Err(PlanError::MissingRequirement { ref pipeline, .. }) if pipeline == "coi-tree"
        ));
    }
}
