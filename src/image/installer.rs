//! Installer ISOs for ostree payloads.

use rand::RngCore;

use super::ostree::OstreeRawImage;
use crate::blueprint::{FdoCustomization, GroupCustomization, UserCustomization};
use crate::common::GIB;
use crate::disk::ids::new_vfat_serial;
use crate::manifest::installer::{Installer, InstallerFlavor};
use crate::manifest::iso::{EfiBootTree, Iso, IsoPayload, IsoRootfsImage, IsoTree};
use crate::manifest::{Manifest, PipelineRef};
use crate::ostree::CommitSource;
use crate::platform::{Arch, Platform};
use crate::rpmmd::RepoConfig;

const KICKSTART_PATH: &str = "/osbuild.ks";
const ROOTFS_IMAGE_SIZE: u64 = 4 * GIB;

/// Settings shared by both installer kinds.
#[derive(Debug, Clone)]
pub struct IsoSettings {
    pub platform: Platform,
    /// Repositories for the installer runtime's package set.
    pub repos: Vec<RepoConfig>,
    pub extra_packages: Vec<String>,
    pub product: String,
    pub os_version: String,
    pub variant: String,
    /// Volume label with `{arch}` standing for the architecture.
    pub iso_label_template: String,
    pub filename: String,
}

impl IsoSettings {
    pub fn iso_label(&self) -> String {
        self.iso_label_template
            .replace("{arch}", self.platform.arch.as_str())
    }

    /// isolinux BIOS boot is only offered on x86_64.
    fn isolinux(&self) -> bool {
        self.platform.arch == Arch::X86_64
    }

    fn installer(&self, flavor: InstallerFlavor) -> Installer {
        let mut installer = Installer::new(
            self.platform.clone(),
            self.repos.clone(),
            flavor,
            &self.product,
            &self.os_version,
        );
        installer.extra_packages = self.extra_packages.clone();
        installer.variant = self.variant.clone();
        installer
    }

    /// `efiboot-tree → bootiso-tree → bootiso` around an installer tree.
    #[allow(clippy::too_many_arguments)]
    fn iso_pipelines(
        &self,
        manifest: &mut Manifest,
        build: PipelineRef,
        installer: PipelineRef,
        rootfs_image: Option<PipelineRef>,
        kernel_options: Vec<String>,
        payload: IsoPayload,
        rng: &mut dyn RngCore,
    ) -> PipelineRef {
        let iso_label = self.iso_label();
        let boot_tree = manifest.add(
            "efiboot-tree",
            Some(build),
            EfiBootTree {
                platform: self.platform.clone(),
                product: self.product.clone(),
                version: self.os_version.clone(),
                iso_label: iso_label.clone(),
                kernel_options: kernel_options.clone(),
            },
        );
        let tree = manifest.add(
            "bootiso-tree",
            Some(build),
            IsoTree {
                installer,
                rootfs_image,
                boot_tree,
                platform: self.platform.clone(),
                iso_label: iso_label.clone(),
                product: self.product.clone(),
                version: self.os_version.clone(),
                kernel_options,
                isolinux: self.isolinux(),
                efiboot_volid: new_vfat_serial(rng),
                payload,
            },
        );
        manifest.add(
            "bootiso",
            Some(build),
            Iso {
                tree,
                filename: self.filename.clone(),
                iso_label,
                isolinux: self.isolinux(),
            },
        )
    }
}

/// Anaconda ISO installing an ostree commit embedded in the media.
#[derive(Debug, Clone)]
pub struct OstreeInstaller {
    pub iso: IsoSettings,
    pub commit: CommitSource,
    pub os_name: String,
    pub remote: String,
    pub users: Vec<UserCustomization>,
    pub groups: Vec<GroupCustomization>,
}

impl OstreeInstaller {
    pub(super) fn instantiate(
        &self,
        manifest: &mut Manifest,
        build: PipelineRef,
        rng: &mut dyn RngCore,
    ) -> PipelineRef {
        let installer = manifest.add(
            "anaconda-tree",
            Some(build),
            self.iso.installer(InstallerFlavor::Anaconda {
                modules: Vec::new(),
                users: self.users.clone(),
                groups: self.groups.clone(),
            }),
        );
        manifest.set_checkpoint(installer);
        let rootfs = manifest.add(
            "rootfs-image",
            Some(build),
            IsoRootfsImage {
                installer,
                size: ROOTFS_IMAGE_SIZE,
            },
        );

        let label = self.iso.iso_label();
        let kernel_options = vec![
            format!("inst.stage2=hd:LABEL={}", label),
            format!("inst.ks=hd:LABEL={}:{}", label, KICKSTART_PATH),
        ];
        let payload = IsoPayload::Ostree {
            commit: self.commit.clone(),
            os_name: self.os_name.clone(),
            remote: self.remote.clone(),
            kickstart_path: KICKSTART_PATH.to_string(),
        };
        self.iso
            .iso_pipelines(manifest, build, installer, Some(rootfs), kernel_options, payload, rng)
    }
}

/// CoreOS installer ISO writing a compressed ostree disk to a fixed device.
#[derive(Debug, Clone)]
pub struct OstreeSimplifiedInstaller {
    pub iso: IsoSettings,
    pub raw_image: OstreeRawImage,
    pub installation_device: String,
    pub fdo: Option<FdoCustomization>,
}

impl OstreeSimplifiedInstaller {
    fn kernel_options(&self, image_file: &str) -> Vec<String> {
        let mut options = vec![
            format!("coreos.inst.install_dev={}", self.installation_device),
            format!("coreos.inst.image_file=/run/media/iso/{}", image_file),
            "coreos.inst.insecure".to_string(),
        ];
        if let Some(fdo) = &self.fdo {
            if let Some(url) = &fdo.manufacturing_server_url {
                options.push(format!("fdo.manufacturing_server_url={}", url));
            }
            if fdo.diun_pub_key_insecure.as_deref() == Some("true") {
                options.push("fdo.diun_pub_key_insecure=true".to_string());
            }
            if let Some(hash) = &fdo.diun_pub_key_hash {
                options.push(format!("fdo.diun_pub_key_hash={}", hash));
            }
            if fdo.diun_pub_key_root_certs.is_some() {
                options.push("fdo.diun_pub_key_root_certs=/fdo_diun_pub_key_root_certs.pem".to_string());
            }
        }
        options
    }

    pub(super) fn instantiate(
        &self,
        manifest: &mut Manifest,
        build: PipelineRef,
        rng: &mut dyn RngCore,
    ) -> PipelineRef {
        let compressed = self.raw_image.instantiate(manifest, build);
        let installer = manifest.add(
            "coi-tree",
            Some(build),
            self.iso.installer(InstallerFlavor::CoreOs {
                fdo: self.fdo.clone(),
            }),
        );
        let kernel_options = self.kernel_options(manifest.output_file(compressed));
        let payload = IsoPayload::RawImage {
            pipeline: compressed,
        };
        self.iso
            .iso_pipelines(manifest, build, installer, None, kernel_options, payload, rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{testing, ImageKind};
    use crate::ostree::Remote;
    use crate::resolve::fakes;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn settings(platform: Platform, filename: &str) -> IsoSettings {
        IsoSettings {
            platform,
            repos: Vec::new(),
            extra_packages: Vec::new(),
            product: "Red Hat Enterprise Linux".into(),
            os_version: "9.4".into(),
            variant: "edge".into(),
            iso_label_template: "RHEL-9-4-0-BaseOS-{arch}".into(),
            filename: filename.into(),
        }
    }

    fn commit() -> CommitSource {
        CommitSource {
            reference: "rhel/9/aarch64/edge".into(),
            url: "https://ostree.example.com/repo".into(),
        }
    }

    #[test]
    fn test_installer_pipeline_order_and_label() {
        let kind = ImageKind::OstreeInstaller(OstreeInstaller {
            iso: settings(Platform::aarch64_uefi("redhat"), "installer.iso"),
            commit: commit(),
            os_name: "rhel".into(),
            remote: "rhel-edge".into(),
            users: Vec::new(),
            groups: Vec::new(),
        });
        let mut m = Manifest::new();
        let last = kind.instantiate(&mut m, "org.osbuild.rhel90", &[], &mut StdRng::seed_from_u64(3));
        let names: Vec<&str> = m.pipelines().iter().map(|p| p.name()).collect();
        assert_eq!(
            names,
            vec!["build", "anaconda-tree", "rootfs-image", "efiboot-tree", "bootiso-tree", "bootiso"]
        );
        assert_eq!(m.checkpoints(), vec!["build", "anaconda-tree"]);
        assert_eq!(m.output_file(last), "installer.iso");

        let content = m.collect_content().clone();
        let resolved = fakes::resolve(&content, "aarch64").unwrap();
        let doc = m.serialize(&resolved).unwrap();
        let boot = &doc.pipeline("efiboot-tree").unwrap().stages[0];
        assert_eq!(
            boot.option("kernel").unwrap()["opts"][1],
            "inst.ks=hd:LABEL=RHEL-9-4-0-BaseOS-aarch64:/osbuild.ks"
        );
        // no isolinux on aarch64
        let tree = &doc.pipeline("bootiso-tree").unwrap().stages;
        assert!(!tree.iter().any(|s| s.kind == "org.osbuild.isolinux"));
        let iso = &doc.pipeline("bootiso").unwrap().stages[0];
        assert!(iso.option("boot").is_none());
    }

    #[test]
    fn test_simplified_installer_embeds_compressed_image() {
        let raw_image = OstreeRawImage {
            platform: Platform::x86_64_hybrid("redhat"),
            commit: CommitSource {
                reference: "rhel/9/x86_64/edge".into(),
                url: "https://ostree.example.com/repo".into(),
            },
            remote: Remote {
                name: "rhel-edge".into(),
                url: "https://ostree.example.com/repo".into(),
                content_url: None,
                gpg_key_paths: Vec::new(),
            },
            os_name: "redhat".into(),
            partition_table: testing::table(),
            kernel_options: Vec::new(),
            users: Vec::new(),
            groups: Vec::new(),
            ignition: false,
            filename: "image.raw.xz".into(),
        };
        let kind = ImageKind::OstreeSimplifiedInstaller(OstreeSimplifiedInstaller {
            iso: settings(Platform::x86_64_hybrid("redhat"), "simplified-installer.iso"),
            raw_image,
            installation_device: "/dev/vda".into(),
            fdo: Some(FdoCustomization {
                manufacturing_server_url: Some("https://fdo.example.com".into()),
                diun_pub_key_insecure: Some("true".into()),
                ..Default::default()
            }),
        });
        let mut m = Manifest::new();
        kind.instantiate(&mut m, "org.osbuild.rhel90", &[], &mut StdRng::seed_from_u64(3));
        let names: Vec<&str> = m.pipelines().iter().map(|p| p.name()).collect();
        assert_eq!(
            names,
            vec![
                "build",
                "ostree-deployment",
                "image",
                "xz",
                "coi-tree",
                "efiboot-tree",
                "bootiso-tree",
                "bootiso"
            ]
        );

        let content = m.collect_content().clone();
        let resolved = fakes::resolve(&content, "x86_64").unwrap();
        let doc = m.serialize(&resolved).unwrap();
        let boot = &doc.pipeline("efiboot-tree").unwrap().stages[0];
        let opts = boot.option("kernel").unwrap()["opts"].as_array().unwrap().clone();
        assert!(opts.iter().any(|o| *o == "coreos.inst.install_dev=/dev/vda"));
        assert!(opts.iter().any(|o| *o == "coreos.inst.image_file=/run/media/iso/image.raw.xz"));
        assert!(opts.iter().any(|o| *o == "fdo.diun_pub_key_insecure=true"));

        let tree = &doc.pipeline("bootiso-tree").unwrap().stages;
        let squash = tree.iter().find(|s| s.kind == "org.osbuild.squashfs").unwrap();
        assert_eq!(squash.inputs.as_ref().unwrap()["tree"]["references"][0], "name:coi-tree");
        let payload_copy = tree
            .iter()
            .filter(|s| s.kind == "org.osbuild.copy")
            .last()
            .unwrap();
        assert_eq!(
            payload_copy.inputs.as_ref().unwrap()["file"]["references"]["name:xz"]["file"],
            "image.raw.xz"
        );
    }

    #[test]
    fn test_same_seed_same_volume_id() {
        let kind = ImageKind::OstreeInstaller(OstreeInstaller {
            iso: settings(Platform::x86_64_hybrid("redhat"), "installer.iso"),
            commit: commit(),
            os_name: "rhel".into(),
            remote: "rhel-edge".into(),
            users: Vec::new(),
            groups: Vec::new(),
        });
        let render = || {
            let mut m = Manifest::new();
            kind.instantiate(&mut m, "org.osbuild.rhel90", &[], &mut StdRng::seed_from_u64(9));
            let content = m.collect_content().clone();
            let resolved = fakes::resolve(&content, "x86_64").unwrap();
            m.serialize(&resolved).unwrap().digest().unwrap()
        };
        assert_eq!(render(), render());
    }
}
