//! Disk geometry: partition tables, partitions, filesystems and LVM.
//!
//! These types are plain data. [`plan`] turns a template table plus
//! mountpoint requests into a concrete instance; the raw image pipeline
//! turns a concrete instance into partitioning and mkfs stages.
//!
//! Sizes and offsets are in bytes.

pub mod ids;
pub mod lvm;
pub mod planner;
pub mod types;

pub use lvm::{LVM_EXTENT_SIZE, LVM_METADATA_SIZE};
pub use planner::{plan, MountpointRequest, PartitionTemplates, PlanOptions};
pub use types::PartitionRole;

use crate::common::MIB;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Partition boundary alignment.
pub const DEFAULT_GRAIN: u64 = MIB;

pub const SECTOR_SIZE: u64 = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableKind {
    Gpt,
    Dos,
}

impl TableKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableKind::Gpt => "gpt",
            TableKind::Dos => "dos",
        }
    }

    /// Leading region kept free for the MBR and, on GPT, the primary header
    /// and partition entry array.
    pub fn header_reserve(&self) -> u64 {
        DEFAULT_GRAIN
    }

    /// Trailing region for the GPT backup header. DOS has none.
    pub fn footer_reserve(&self) -> u64 {
        match self {
            TableKind::Gpt => DEFAULT_GRAIN,
            TableKind::Dos => 0,
        }
    }

    pub fn max_partitions(&self) -> usize {
        match self {
            TableKind::Gpt => 128,
            TableKind::Dos => 4,
        }
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FsKind {
    Vfat,
    Ext4,
    Xfs,
}

impl FsKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FsKind::Vfat => "vfat",
            FsKind::Ext4 => "ext4",
            FsKind::Xfs => "xfs",
        }
    }

    /// Package providing the mkfs tool for this filesystem.
    pub fn tool_package(&self) -> &'static str {
        match self {
            FsKind::Vfat => "dosfstools",
            FsKind::Ext4 => "e2fsprogs",
            FsKind::Xfs => "xfsprogs",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filesystem {
    pub kind: FsKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub mountpoint: String,
    pub fstab_options: String,
    pub fstab_freq: u64,
    pub fstab_passno: u64,
}

impl Filesystem {
    pub fn new(kind: FsKind, mountpoint: &str) -> Self {
        Self {
            kind,
            uuid: None,
            label: None,
            mountpoint: mountpoint.to_string(),
            fstab_options: "defaults".to_string(),
            fstab_freq: 0,
            fstab_passno: 0,
        }
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }

    pub fn with_uuid(mut self, uuid: &str) -> Self {
        self.uuid = Some(uuid.to_string());
        self
    }

    pub fn with_fstab(mut self, options: &str, freq: u64, passno: u64) -> Self {
        self.fstab_options = options.to_string();
        self.fstab_freq = freq;
        self.fstab_passno = passno;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LvmVolumeGroup {
    pub name: String,
    pub description: String,
    pub logical_volumes: Vec<LvmLogicalVolume>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LvmLogicalVolume {
    pub name: String,
    pub size: u64,
    pub filesystem: Filesystem,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Payload {
    Filesystem(Filesystem),
    Lvm(LvmVolumeGroup),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub start: u64,
    pub size: u64,
    #[serde(default)]
    pub bootable: bool,
    pub type_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,
}

impl Partition {
    pub fn end(&self) -> u64 {
        self.start + self.size
    }

    pub fn filesystem(&self) -> Option<&Filesystem> {
        match &self.payload {
            Some(Payload::Filesystem(fs)) => Some(fs),
            _ => None,
        }
    }

    pub fn volume_group(&self) -> Option<&LvmVolumeGroup> {
        match &self.payload {
            Some(Payload::Lvm(vg)) => Some(vg),
            _ => None,
        }
    }

    /// Filesystems stored in this partition, directly or in logical volumes.
    pub fn filesystems(&self) -> Vec<&Filesystem> {
        match &self.payload {
            Some(Payload::Filesystem(fs)) => vec![fs],
            Some(Payload::Lvm(vg)) => vg.logical_volumes.iter().map(|lv| &lv.filesystem).collect(),
            None => Vec::new(),
        }
    }

    pub fn holds_mountpoint(&self, mountpoint: &str) -> bool {
        self.filesystems().iter().any(|fs| fs.mountpoint == mountpoint)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionTable {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    pub kind: TableKind,
    /// Total size. In a template this is a lower bound for the planned table.
    pub size: u64,
    pub partitions: Vec<Partition>,
}

impl PartitionTable {
    /// Every filesystem in table order, logical volumes included.
    pub fn filesystems(&self) -> Vec<&Filesystem> {
        self.partitions.iter().flat_map(|p| p.filesystems()).collect()
    }

    pub fn find_filesystem(&self, mountpoint: &str) -> Option<&Filesystem> {
        self.filesystems().into_iter().find(|fs| fs.mountpoint == mountpoint)
    }

    pub fn root_filesystem(&self) -> Option<&Filesystem> {
        self.find_filesystem("/")
    }

    /// The filesystem holding `/boot`: a dedicated one, or `/`.
    pub fn boot_filesystem(&self) -> Option<&Filesystem> {
        self.find_filesystem("/boot").or_else(|| self.root_filesystem())
    }

    /// Index of the partition holding `/`.
    pub fn root_partition_index(&self) -> Option<usize> {
        self.partitions.iter().position(|p| p.holds_mountpoint("/"))
    }

    /// Index of the partition holding the boot filesystem.
    pub fn boot_partition_index(&self) -> Option<usize> {
        self.partitions
            .iter()
            .position(|p| p.holds_mountpoint("/boot"))
            .or_else(|| self.root_partition_index())
    }

    pub fn contains_lvm(&self) -> bool {
        self.partitions.iter().any(|p| p.volume_group().is_some())
    }

    /// The volume group holding `/`, or the first one.
    pub fn volume_group_mut(&mut self) -> Option<&mut LvmVolumeGroup> {
        let index = self
            .partitions
            .iter()
            .position(|p| p.volume_group().is_some() && p.holds_mountpoint("/"))
            .or_else(|| self.partitions.iter().position(|p| p.volume_group().is_some()))?;
        match &mut self.partitions[index].payload {
            Some(Payload::Lvm(vg)) => Some(vg),
            _ => None,
        }
    }

    /// Tools the build root needs to create this table's filesystems.
    pub fn build_packages(&self) -> Vec<String> {
        let mut packages: Vec<String> = self
            .filesystems()
            .iter()
            .map(|fs| fs.kind.tool_package().to_string())
            .collect();
        if self.contains_lvm() {
            packages.push("lvm2".to_string());
        }
        packages.sort();
        packages.dedup();
        packages
    }

    /// Panics when a partition's type code is foreign to the table kind.
    pub fn assert_type_vocabulary(&self) {
        for (index, partition) in self.partitions.iter().enumerate() {
            assert!(
                self.kind.accepts(&partition.type_code),
                "partition {} has type code '{}' which is not valid in a {} table",
                index,
                partition.type_code,
                self.kind
            );
        }
    }

    /// Check ordering, overlap, reserved regions and the total size.
    pub fn check_layout(&self) -> Result<(), String> {
        let mut cursor = self.kind.header_reserve();
        for (index, partition) in self.partitions.iter().enumerate() {
            if partition.start < cursor {
                return Err(format!(
                    "partition {} starts at {} which overlaps the previous extent ending at {}",
                    index, partition.start, cursor
                ));
            }
            if partition.start % DEFAULT_GRAIN != 0 || partition.size % DEFAULT_GRAIN != 0 {
                return Err(format!("partition {} is not aligned to {} bytes", index, DEFAULT_GRAIN));
            }
            if let Some(vg) = partition.volume_group() {
                let Some(required) = vg.required_size() else {
                    return Err(format!("volume group '{}' size overflows", vg.name));
                };
                if required > partition.size {
                    return Err(format!(
                        "volume group '{}' needs {} bytes but partition {} has {}",
                        vg.name, required, index, partition.size
                    ));
                }
            }
            cursor = partition
                .start
                .checked_add(partition.size)
                .ok_or_else(|| format!("partition {} extends past the addressable range", index))?;
        }
        if cursor.saturating_add(self.kind.footer_reserve()) > self.size {
            return Err(format!(
                "partitions end at {} but the table is only {} bytes",
                cursor, self.size
            ));
        }
        Ok(())
    }
}

/// Byte offset or size to 512-byte sectors.
pub fn sectors(bytes: u64) -> u64 {
    bytes / SECTOR_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PartitionTable {
        let mut vg = LvmVolumeGroup::new("rootvg", "test");
        vg.create_logical_volume(Filesystem::new(FsKind::Xfs, "/"), 8 * MIB);
        vg.create_logical_volume(Filesystem::new(FsKind::Xfs, "/home"), 8 * MIB);
        PartitionTable {
            uuid: None,
            kind: TableKind::Gpt,
            size: 32 * MIB,
            partitions: vec![
                Partition {
                    start: MIB,
                    size: 4 * MIB,
                    bootable: false,
                    type_code: types::EFI_SYSTEM_PARTITION_GUID.into(),
                    uuid: None,
                    payload: Some(Payload::Filesystem(Filesystem::new(FsKind::Vfat, "/boot/efi"))),
                },
                Partition {
                    start: 5 * MIB,
                    size: 20 * MIB,
                    bootable: false,
                    type_code: types::LVM_PARTITION_GUID.into(),
                    uuid: None,
                    payload: Some(Payload::Lvm(vg)),
                },
            ],
        }
    }

    #[test]
    fn test_filesystems_walk_into_lvm() {
        let table = sample();
        let mountpoints: Vec<&str> = table.filesystems().iter().map(|fs| fs.mountpoint.as_str()).collect();
        assert_eq!(mountpoints, vec!["/boot/efi", "/", "/home"]);
        assert_eq!(table.root_partition_index(), Some(1));
        assert_eq!(table.boot_partition_index(), Some(1));
    }

    #[test]
    fn test_build_packages() {
        assert_eq!(sample().build_packages(), vec!["dosfstools", "lvm2", "xfsprogs"]);
    }

    #[test]
    fn test_check_layout_detects_overlap() {
        let mut table = sample();
        assert!(table.check_layout().is_ok());
        table.partitions[1].start = 4 * MIB;
        assert!(table.check_layout().is_err());
    }

    #[test]
    fn test_check_layout_detects_overfull_volume_group() {
        let mut table = sample();
        table.partitions[1].size = 16 * MIB;
        assert!(table.check_layout().unwrap_err().contains("rootvg"));
    }

    #[test]
    #[should_panic(expected = "not valid in a dos table")]
    fn test_mixed_vocabulary_panics() {
        let mut table = sample();
        table.kind = TableKind::Dos;
        table.assert_type_vocabulary();
    }

    #[test]
    fn test_sectors() {
        assert_eq!(sectors(MIB), 2048);
    }
}
