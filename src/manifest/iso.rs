//! Boot ISO pipelines: EFI boot tree, installer rootfs image, the ISO tree
//! and the final ISO file.

use serde_json::{json, Map, Value};

use super::pipeline::{PipelineBehaviour, ResolvedInputs};
use super::stages::{commit_input, file_input, mkdir_stage, tree_input, truncate_stage, Stage};
use super::{Manifest, PipelineRef};
use crate::common::MIB;
use crate::disk::sectors;
use crate::error::PlanError;
use crate::ostree::CommitSource;
use crate::platform::{strings, Arch, Platform};

const PXEBOOT_DIR: &str = "/images/pxeboot";
const ROOTFS_IMAGE: &str = "LiveOS/rootfs.img";
const EFIBOOT_IMAGE: &str = "images/efiboot.img";
const EFIBOOT_SIZE: u64 = 20 * MIB;
pub const OSTREE_PAYLOAD_PATH: &str = "/ostree/repo";

fn product_options(product: &str, version: &str) -> Value {
    json!({ "name": product, "version": version })
}

fn loopback(filename: &str, size: u64) -> Value {
    json!({
        "device": {
            "type": "org.osbuild.loopback",
            "options": { "filename": filename, "size": sectors(size) }
        }
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// EFI boot tree
// ─────────────────────────────────────────────────────────────────────────────

/// `EFI/BOOT` tree with a GRUB configuration booting the installer.
#[derive(Debug, Clone)]
pub struct EfiBootTree {
    pub platform: Platform,
    pub product: String,
    pub version: String,
    pub iso_label: String,
    pub kernel_options: Vec<String>,
}

impl PipelineBehaviour for EfiBootTree {
    fn build_packages(&self, _manifest: &Manifest) -> Vec<String> {
        match self.platform.arch {
            Arch::X86_64 => strings(&["grub2-efi-x64", "grub2-efi-x64-cdboot", "shim-x64"]),
            Arch::Aarch64 => strings(&["grub2-efi-aa64", "grub2-efi-aa64-cdboot", "shim-aa64"]),
            Arch::Ppc64le | Arch::S390x => Vec::new(),
        }
    }

    fn stages(&self, _manifest: &Manifest, _resolved: &ResolvedInputs) -> Vec<Stage> {
        let vendor = self.platform.uefi_vendor.as_deref().unwrap_or("redhat");
        vec![Stage::new(
            "org.osbuild.grub2.iso",
            json!({
                "product": product_options(&self.product, &self.version),
                "kernel": { "dir": PXEBOOT_DIR, "opts": self.kernel_options },
                "isolabel": self.iso_label,
                "architectures": [self.platform.efi_arch()],
                "vendor": vendor,
            }),
        )]
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Installer rootfs image
// ─────────────────────────────────────────────────────────────────────────────

/// The installer tree on an ext4 image, later squashed into the ISO.
#[derive(Debug, Clone)]
pub struct IsoRootfsImage {
    pub installer: PipelineRef,
    pub size: u64,
}

impl PipelineBehaviour for IsoRootfsImage {
    fn inputs(&self) -> Vec<PipelineRef> {
        vec![self.installer]
    }

    fn build_packages(&self, _manifest: &Manifest) -> Vec<String> {
        vec!["e2fsprogs".to_string()]
    }

    fn stages(&self, manifest: &Manifest, _resolved: &ResolvedInputs) -> Vec<Stage> {
        let device = loopback(ROOTFS_IMAGE, self.size);
        vec![
            mkdir_stage(&["/LiveOS"]),
            truncate_stage(ROOTFS_IMAGE, self.size),
            Stage::new(
                "org.osbuild.mkfs.ext4",
                json!({ "uuid": "2fe99653-f7ff-44fd-bea8-fa70107524fb", "label": "Anaconda" }),
            )
            .with_devices(device.clone()),
            Stage::new(
                "org.osbuild.copy",
                json!({ "paths": [{ "from": "input://tree/", "to": "mount://device/" }] }),
            )
            .with_inputs(json!({ "tree": tree_input(manifest.name_of(self.installer)) }))
            .with_devices(device)
            .with_mounts(json!([{
                "name": "device",
                "type": "org.osbuild.ext4",
                "source": "device",
                "target": "/"
            }])),
        ]
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ISO tree
// ─────────────────────────────────────────────────────────────────────────────

/// What the installer media installs.
#[derive(Debug, Clone, PartialEq)]
pub enum IsoPayload {
    /// An ostree commit pulled into the ISO and installed by kickstart.
    Ostree {
        commit: CommitSource,
        os_name: String,
        remote: String,
        kickstart_path: String,
    },
    /// A compressed disk image written to the target by the installer.
    RawImage { pipeline: PipelineRef },
}

#[derive(Debug, Clone)]
pub struct IsoTree {
    pub installer: PipelineRef,
    /// Squashed into `images/install.img`; the installer tree itself when unset.
    pub rootfs_image: Option<PipelineRef>,
    pub boot_tree: PipelineRef,
    pub platform: Platform,
    pub iso_label: String,
    pub product: String,
    pub version: String,
    pub kernel_options: Vec<String>,
    pub isolinux: bool,
    /// FAT volume id of `images/efiboot.img`.
    pub efiboot_volid: String,
    pub payload: IsoPayload,
}

impl IsoTree {
    fn kernel_stage(&self, manifest: &Manifest) -> Stage {
        let installer = manifest.name_of(self.installer);
        let Some(version) = manifest.resolved_kernel_version(self.installer) else {
            panic!("installer '{}' has no resolved kernel version", installer);
        };
        json_copy(
            "tree",
            tree_input(installer),
            vec![
                (format!("/boot/vmlinuz-{}", version), format!("{}/vmlinuz", PXEBOOT_DIR)),
                (format!("/boot/initramfs-{}.img", version), format!("{}/initrd.img", PXEBOOT_DIR)),
            ],
        )
    }

    fn squashfs_stage(&self, manifest: &Manifest) -> Stage {
        let source = self.rootfs_image.unwrap_or(self.installer);
        let bcj = match self.platform.arch {
            Arch::X86_64 => "x86",
            Arch::Aarch64 => "arm",
            Arch::Ppc64le => "powerpc",
            Arch::S390x => "",
        };
        let mut compression = Map::new();
        compression.insert("method".into(), json!("xz"));
        if !bcj.is_empty() {
            compression.insert("options".into(), json!({ "bcj": bcj }));
        }
        Stage::new(
            "org.osbuild.squashfs",
            json!({ "filename": "images/install.img", "compression": Value::Object(compression) }),
        )
        .with_inputs(json!({ "tree": tree_input(manifest.name_of(source)) }))
    }

    fn efiboot_stages(&self, manifest: &Manifest) -> Vec<Stage> {
        let boot_tree = manifest.name_of(self.boot_tree);
        let device = loopback(EFIBOOT_IMAGE, EFIBOOT_SIZE);
        vec![
            truncate_stage(EFIBOOT_IMAGE, EFIBOOT_SIZE),
            Stage::new(
                "org.osbuild.mkfs.fat",
                json!({ "volid": self.efiboot_volid.replace('-', ""), "label": "ANACONDA" }),
            )
            .with_devices(device.clone()),
            Stage::new(
                "org.osbuild.copy",
                json!({ "paths": [{ "from": "input://root-tree/", "to": "mount://root/" }] }),
            )
            .with_inputs(json!({ "root-tree": tree_input(boot_tree) }))
            .with_devices(device)
            .with_mounts(json!([{
                "name": "root",
                "type": "org.osbuild.fat",
                "source": "device",
                "target": "/"
            }])),
            json_copy("tree", tree_input(boot_tree), vec![("/EFI".into(), "/".into())]),
        ]
    }

    fn payload_stages(&self, manifest: &Manifest, resolved: &ResolvedInputs) -> Vec<Stage> {
        match &self.payload {
            IsoPayload::Ostree {
                commit,
                os_name,
                remote,
                kickstart_path,
            } => {
                let Some(spec) = resolved.commits.first() else {
                    return Vec::new();
                };
                vec![
                    Stage::new("org.osbuild.ostree.init", json!({ "path": OSTREE_PAYLOAD_PATH })),
                    Stage::new(
                        "org.osbuild.ostree.pull",
                        json!({ "repo": OSTREE_PAYLOAD_PATH, "remote": remote }),
                    )
                    .with_inputs(json!({ "commits": commit_input(spec) })),
                    Stage::new(
                        "org.osbuild.kickstart",
                        json!({
                            "path": kickstart_path,
                            "ostree": {
                                "osname": os_name,
                                "url": format!("file://{}", OSTREE_PAYLOAD_PATH),
                                "ref": commit.reference,
                                "gpg": false,
                            }
                        }),
                    ),
                ]
            }
            IsoPayload::RawImage { pipeline } => {
                let filename = manifest.output_file(*pipeline);
                vec![json_copy(
                    "file",
                    file_input(manifest.name_of(*pipeline), filename),
                    vec![(format!("/{}", filename), "/".to_string())],
                )]
            }
        }
    }
}

/// `org.osbuild.copy` from a single named input into the pipeline tree.
fn json_copy(input: &str, value: Value, paths: Vec<(String, String)>) -> Stage {
    let paths: Vec<Value> = paths
        .into_iter()
        .map(|(from, to)| {
            json!({
                "from": format!("input://{}{}", input, from),
                "to": format!("tree://{}", to),
            })
        })
        .collect();
    let mut inputs = Map::new();
    inputs.insert(input.to_string(), value);
    Stage::new("org.osbuild.copy", json!({ "paths": paths })).with_inputs(Value::Object(inputs))
}

impl PipelineBehaviour for IsoTree {
    fn inputs(&self) -> Vec<PipelineRef> {
        let mut inputs = vec![self.installer];
        inputs.extend(self.rootfs_image);
        inputs.push(self.boot_tree);
        if let IsoPayload::RawImage { pipeline } = &self.payload {
            inputs.push(*pipeline);
        }
        inputs
    }

    fn build_packages(&self, _manifest: &Manifest) -> Vec<String> {
        let mut packages = strings(&["squashfs-tools", "dosfstools"]);
        if matches!(self.payload, IsoPayload::Ostree { .. }) {
            packages.push("rpm-ostree".to_string());
        }
        packages
    }

    fn commit_sources(&self) -> Vec<CommitSource> {
        match &self.payload {
            IsoPayload::Ostree { commit, .. } => vec![commit.clone()],
            IsoPayload::RawImage { .. } => Vec::new(),
        }
    }

    fn resolve(&self, pipeline: &str, inputs: &mut ResolvedInputs) -> Result<(), PlanError> {
        if let IsoPayload::Ostree { commit, .. } = &self.payload {
            if inputs.commits.is_empty() {
                return Err(PlanError::missing(
                    pipeline,
                    format!("ostree commit '{}'", commit.reference),
                ));
            }
        }
        Ok(())
    }

    fn stages(&self, manifest: &Manifest, resolved: &ResolvedInputs) -> Vec<Stage> {
        let mut stages = vec![mkdir_stage(&["/images", PXEBOOT_DIR])];
        stages.push(self.kernel_stage(manifest));
        stages.push(self.squashfs_stage(manifest));
        stages.extend(self.efiboot_stages(manifest));

        if self.isolinux {
            stages.push(
                Stage::new(
                    "org.osbuild.isolinux",
                    json!({
                        "product": product_options(&self.product, &self.version),
                        "kernel": { "dir": PXEBOOT_DIR, "opts": self.kernel_options },
                    }),
                )
                .with_inputs(json!({ "data": tree_input(manifest.name_of(self.installer)) })),
            );
        }

        stages.extend(self.payload_stages(manifest, resolved));

        stages.push(Stage::new(
            "org.osbuild.discinfo",
            json!({
                "basearch": self.platform.arch.as_str(),
                "release": format!("{} {}", self.product, self.version),
            }),
        ));
        stages
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ISO
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Iso {
    pub tree: PipelineRef,
    pub filename: String,
    pub iso_label: String,
    /// Make the image BIOS bootable through isolinux.
    pub isolinux: bool,
}

impl PipelineBehaviour for Iso {
    fn inputs(&self) -> Vec<PipelineRef> {
        vec![self.tree]
    }

    fn build_packages(&self, _manifest: &Manifest) -> Vec<String> {
        strings(&["isomd5sum", "xorriso"])
    }

    fn stages(&self, manifest: &Manifest, _resolved: &ResolvedInputs) -> Vec<Stage> {
        let mut options = Map::new();
        options.insert("filename".into(), json!(self.filename));
        options.insert("volid".into(), json!(self.iso_label));
        options.insert("sysid".into(), json!("LINUX"));
        if self.isolinux {
            options.insert(
                "boot".into(),
                json!({ "image": "isolinux/isolinux.bin", "catalog": "isolinux/boot.cat" }),
            );
            options.insert("isohybridmbr".into(), json!("/usr/share/syslinux/isohdpfx.bin"));
        }
        options.insert("efi".into(), json!(EFIBOOT_IMAGE));
        options.insert("isolevel".into(), json!(3));

        vec![
            Stage::new("org.osbuild.xorrisofs", Value::Object(options))
                .with_inputs(json!({ "tree": tree_input(manifest.name_of(self.tree)) })),
            Stage::new("org.osbuild.implantisomd5", json!({ "filename": self.filename })),
        ]
    }

    fn filename(&self) -> Option<&str> {
        Some(&self.filename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::build::BuildRoot;
    use crate::manifest::installer::{Installer, InstallerFlavor};
    use crate::resolve::fakes;

    const LABEL: &str = "RHEL-9-4-0-BaseOS-x86_64";

    fn installer_iso(m: &mut Manifest, resolve_commit: bool) -> Result<crate::manifest::ManifestDocument, PlanError> {
        let platform = Platform::x86_64_hybrid("redhat");
        let build = m.add("build", None, BuildRoot::new("org.osbuild.rhel90", Vec::new()));
        let installer = m.add(
            "anaconda-tree",
            Some(build),
            Installer::new(
                platform.clone(),
                Vec::new(),
                InstallerFlavor::Anaconda {
                    modules: Vec::new(),
                    users: Vec::new(),
                    groups: Vec::new(),
                },
                "Red Hat Enterprise Linux",
                "9.4",
            ),
        );
        let rootfs = m.add(
            "rootfs-image",
            Some(build),
            IsoRootfsImage {
                installer,
                size: 4 * crate::common::GIB,
            },
        );
        let kernel_options = vec![
            format!("inst.stage2=hd:LABEL={}", LABEL),
            format!("inst.ks=hd:LABEL={}:/osbuild.ks", LABEL),
        ];
        let boot_tree = m.add(
            "efiboot-tree",
            Some(build),
            EfiBootTree {
                platform: platform.clone(),
                product: "Red Hat Enterprise Linux".into(),
                version: "9.4".into(),
                iso_label: LABEL.into(),
                kernel_options: kernel_options.clone(),
            },
        );
        let tree = m.add(
            "bootiso-tree",
            Some(build),
            IsoTree {
                installer,
                rootfs_image: Some(rootfs),
                boot_tree,
                platform,
                iso_label: LABEL.into(),
                product: "Red Hat Enterprise Linux".into(),
                version: "9.4".into(),
                kernel_options,
                isolinux: true,
                efiboot_volid: "7B77-95E7".into(),
                payload: IsoPayload::Ostree {
                    commit: CommitSource {
                        reference: "rhel/9/x86_64/edge".into(),
                        url: "https://ostree.example.com/repo".into(),
                    },
                    os_name: "rhel".into(),
                    remote: "rhel-edge".into(),
                    kickstart_path: "/osbuild.ks".into(),
                },
            },
        );
        m.add(
            "bootiso",
            Some(build),
            Iso {
                tree,
                filename: "installer.iso".into(),
                iso_label: LABEL.into(),
                isolinux: true,
            },
        );
        let content = m.collect_content().clone();
        let mut resolved = fakes::resolve(&content, "x86_64")?;
        if !resolve_commit {
            resolved.commits.clear();
        }
        m.serialize(&resolved)
    }

    #[test]
    fn test_installer_iso_reads_installer_kernel() {
        let mut m = Manifest::new();
        let doc = installer_iso(&mut m, true).unwrap();
        let names = doc.pipeline_names();
        assert_eq!(
            names,
            vec!["build", "anaconda-tree", "rootfs-image", "efiboot-tree", "bootiso-tree", "bootiso"]
        );

        let tree = &doc.pipeline("bootiso-tree").unwrap().stages;
        let kernel_copy = &tree[1];
        assert_eq!(
            kernel_copy.option("paths").unwrap()[0]["from"],
            "input://tree/boot/vmlinuz-1.0-1.el9.x86_64"
        );
        assert_eq!(
            tree[2].inputs.as_ref().unwrap()["tree"]["references"][0],
            "name:rootfs-image"
        );
        assert!(tree.iter().any(|s| s.kind == "org.osbuild.isolinux"));
        let kickstart = tree.iter().find(|s| s.kind == "org.osbuild.kickstart").unwrap();
        assert_eq!(kickstart.option("ostree").unwrap()["ref"], "rhel/9/x86_64/edge");
        assert_eq!(tree.last().unwrap().kind, "org.osbuild.discinfo");

        let iso = &doc.pipeline("bootiso").unwrap().stages;
        assert_eq!(iso[0].option("volid").unwrap(), LABEL);
        assert_eq!(iso[1].kind, "org.osbuild.implantisomd5");

        let build = &m.content().unwrap().package_sets["build"][0].include;
        assert!(build.contains(&"xorriso".to_string()));
        assert!(build.contains(&"squashfs-tools".to_string()));
    }

    #[test]
    fn test_missing_payload_commit() {
        let mut m = Manifest::new();
        match installer_iso(&mut m, false).unwrap_err() {
            PlanError::MissingRequirement { pipeline, .. } => assert_eq!(pipeline, "bootiso-tree"),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_efiboot_tree_options() {
        let tree = EfiBootTree {
            platform: Platform::aarch64_uefi("redhat"),
            product: "Red Hat Enterprise Linux".into(),
            version: "9.4".into(),
            iso_label: "RHEL-9-4-0-BaseOS-aarch64".into(),
            kernel_options: vec!["inst.stage2=hd:LABEL=RHEL-9-4-0-BaseOS-aarch64".into()],
        };
        let m = Manifest::new();
        let stages = tree.stages(&m, &ResolvedInputs::default());
        assert_eq!(stages[0].option("architectures").unwrap()[0], "AA64");
        assert_eq!(stages[0].option("vendor").unwrap(), "redhat");
        assert!(tree.build_packages(&m).contains(&"shim-aa64".to_string()));
    }
}
