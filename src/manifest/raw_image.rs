//! A partitioned disk image populated from a tree pipeline.

use serde_json::json;

use super::pipeline::{PipelineBehaviour, ResolvedInputs};
use super::stages::{copy_tree_stage, mkfs_stages, partition_stage, truncate_stage, Stage};
use super::{Manifest, PipelineRef};
use crate::disk::{sectors, PartitionTable, TableKind};
use crate::platform::Platform;

#[derive(Debug, Clone)]
pub struct RawImage {
    /// OS tree or ostree deployment copied onto the filesystems.
    pub tree: PipelineRef,
    pub partition_table: PartitionTable,
    pub platform: Platform,
    pub filename: String,
}

impl RawImage {
    /// `org.osbuild.grub2.inst`: embed the BIOS core image behind the table.
    fn grub2_inst_stage(&self, bios_platform: &str) -> Stage {
        let table = &self.partition_table;
        let boot_index = table.boot_partition_index().unwrap_or(0);
        let boot_fs = table.boot_filesystem();
        let prefix_path = if table.find_filesystem("/boot").is_some() { "/grub2" } else { "/boot/grub2" };
        let location = match table.kind {
            TableKind::Gpt => table
                .partitions
                .iter()
                .find(|p| p.bootable)
                .map(|p| sectors(p.start))
                .unwrap_or(0),
            TableKind::Dos => 1,
        };
        Stage::new(
            "org.osbuild.grub2.inst",
            json!({
                "filename": self.filename,
                "platform": bios_platform,
                "location": location,
                "core": {
                    "type": "mkimage",
                    "partlabel": table.kind.as_str(),
                    "filesystem": boot_fs.map(|fs| fs.kind.as_str()).unwrap_or("ext4"),
                },
                "prefix": {
                    "type": "partition",
                    "partlabel": table.kind.as_str(),
                    "number": boot_index,
                    "path": prefix_path,
                }
            }),
        )
    }
}

impl PipelineBehaviour for RawImage {
    fn inputs(&self) -> Vec<PipelineRef> {
        vec![self.tree]
    }

    fn build_packages(&self, _manifest: &Manifest) -> Vec<String> {
        let mut packages = self.partition_table.build_packages();
        packages.extend(self.platform.build_packages.iter().cloned());
        packages
    }

    fn stages(&self, manifest: &Manifest, _resolved: &ResolvedInputs) -> Vec<Stage> {
        let table = &self.partition_table;
        let mut stages = vec![
            truncate_stage(&self.filename, table.size),
            partition_stage(&self.filename, table),
        ];
        stages.extend(mkfs_stages(&self.filename, table));
        stages.push(copy_tree_stage(manifest.name_of(self.tree), &self.filename, table));
        if let Some(bios) = &self.platform.bios_platform {
            stages.push(self.grub2_inst_stage(bios));
        }
        stages
    }

    fn filename(&self) -> Option<&str> {
        Some(&self.filename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use crate::common::{GIB, MIB};
    use crate::disk::types::{BIOS_BOOT_PARTITION_GUID, FILESYSTEM_DATA_GUID, LVM_PARTITION_GUID};
    use crate::disk::{
        Filesystem, FsKind, LvmLogicalVolume, LvmVolumeGroup, Partition, Payload,
    };
    use crate::manifest::build::BuildRoot;
    use crate::manifest::os::{OsCustomizations, OsTree};
    use crate::resolve::fakes;
    use crate::rpmmd::PackageSet;

    fn lvm_table() -> PartitionTable {
        PartitionTable {
            uuid: Some("D209C89E-EA5E-4FBD-B161-B461CCE297E0".into()),
            kind: TableKind::Gpt,
            size: 4 * GIB,
            partitions: vec![
                Partition {
                    start: MIB,
                    size: MIB,
                    bootable: true,
                    type_code: BIOS_BOOT_PARTITION_GUID.into(),
                    uuid: Some("FAC7F1FB-3E8D-4137-A512-961DE09A5549".into()),
                    payload: None,
                },
                Partition {
                    start: 2 * MIB,
                    size: 512 * MIB,
                    bootable: false,
                    type_code: FILESYSTEM_DATA_GUID.into(),
                    uuid: Some("CB07C243-BC44-4717-853E-28852021225B".into()),
                    payload: Some(Payload::Filesystem(
                        Filesystem::new(FsKind::Xfs, "/boot").with_uuid("0194fdc2-fa2f-4cc0-81d3-ff12045b73c8"),
                    )),
                },
                Partition {
                    start: 514 * MIB,
                    size: 3 * GIB,
                    bootable: false,
                    type_code: LVM_PARTITION_GUID.into(),
                    uuid: Some("6264D520-3FB9-423F-8AB8-7A0A8E3D3562".into()),
                    payload: Some(Payload::Lvm(LvmVolumeGroup {
                        name: "rootvg".into(),
                        description: "test".into(),
                        logical_volumes: vec![LvmLogicalVolume {
                            name: "rootlv".into(),
                            size: 2 * GIB,
                            filesystem: Filesystem::new(FsKind::Xfs, "/")
                                .with_uuid("6e4ff95f-f662-45ee-a82a-bdf44a2d0b75"),
                        }],
                    })),
                },
            ],
        }
    }

    #[test]
    fn test_raw_image_stages() {
        let mut m = Manifest::new();
        let build = m.add("build", None, BuildRoot::new("org.osbuild.rhel90", Vec::new()));
        let os = m.add(
            "os",
            Some(build),
            OsTree {
                platform: Platform::x86_64_hybrid("redhat"),
                repos: Vec::new(),
                packages: PackageSet::new("os", &["@core"]),
                blueprint_packages: Vec::new(),
                containers: Vec::new(),
                customizations: OsCustomizations::default(),
                partition_table: Some(lvm_table()),
                ostree_ref: None,
                bootable: true,
            },
        );
        m.add(
            "image",
            Some(build),
            RawImage {
                tree: os,
                partition_table: lvm_table(),
                platform: Platform::x86_64_hybrid("redhat"),
                filename: "disk.img".into(),
            },
        );
        let content = m.collect_content().clone();
        assert!(content.package_sets["build"][0].include.contains(&"lvm2".to_string()));
        let resolved = fakes::resolve(&content, "x86_64").unwrap();
        let doc = m.serialize(&resolved).unwrap();
        let stages = &doc.pipeline("image").unwrap().stages;
        let kinds: Vec<&str> = stages.iter().map(|s| s.kind.as_str()).collect();
        assert_eq!(
            kinds,
            vec![
                "org.osbuild.truncate",
                "org.osbuild.sgdisk",
                "org.osbuild.mkfs.xfs",
                "org.osbuild.lvm2.create",
                "org.osbuild.mkfs.xfs",
                "org.osbuild.copy",
                "org.osbuild.grub2.inst",
            ]
        );
        assert_eq!(stages[0].option("size").and_then(Value::as_str), Some("4294967296"));
        let inst = stages.last().unwrap();
        assert_eq!(inst.option("location").unwrap(), 2048);
        assert_eq!(inst.option("prefix").unwrap()["path"], "/grub2");
        assert_eq!(inst.option("prefix").unwrap()["number"], 1);
        assert_eq!(stages[5].inputs.as_ref().unwrap()["root-tree"]["references"][0], "name:os");
    }
}
