//! Base partition tables the planner starts from, per image type family.

use crate::common::{GIB, MIB};
use crate::disk::lvm::ROOT_VG_NAME;
use crate::disk::types::{
    BIOS_BOOT_PARTITION_GUID, DOS_FAT16_ID, DOS_LINUX_ID, EFI_SYSTEM_PARTITION_GUID,
    FILESYSTEM_DATA_GUID, LVM_PARTITION_GUID,
};
use crate::disk::{
    Filesystem, FsKind, LvmLogicalVolume, LvmVolumeGroup, Partition, PartitionTable,
    PartitionTemplates, Payload, TableKind,
};
use crate::platform::Arch;

const GPT_DISK_UUID: &str = "D209C89E-EA5E-4FBD-B161-B461CCE297E0";
const DOS_DISK_ID: &str = "0xc1748067";

const ESP_FSTAB_OPTIONS: &str = "defaults,uid=0,gid=0,umask=077,shortname=winnt";
const EDGE_ESP_FSTAB_OPTIONS: &str = "umask=0077,shortname=winnt";

fn partition(size: u64, type_code: &str, payload: Option<Payload>) -> Partition {
    Partition {
        start: 0,
        size,
        bootable: false,
        type_code: type_code.to_string(),
        uuid: None,
        payload,
    }
}

fn bios_boot(size: u64) -> Partition {
    Partition {
        bootable: true,
        ..partition(size, BIOS_BOOT_PARTITION_GUID, None)
    }
}

fn filesystem(size: u64, type_code: &str, fs: Filesystem) -> Partition {
    partition(size, type_code, Some(Payload::Filesystem(fs)))
}

fn esp(fstab_options: &str) -> Filesystem {
    Filesystem::new(FsKind::Vfat, "/boot/efi")
        .with_label("EFI-SYSTEM")
        .with_fstab(fstab_options, 0, 2)
}

fn gpt(partitions: Vec<Partition>) -> PartitionTable {
    PartitionTable {
        uuid: Some(GPT_DISK_UUID.to_string()),
        kind: TableKind::Gpt,
        size: 0,
        partitions,
    }
}

/// ESP, `/boot` and `/` on xfs; x86_64 adds a BIOS boot partition.
pub fn default_tables() -> PartitionTemplates {
    let table = |bios: bool| {
        let mut partitions = Vec::new();
        if bios {
            partitions.push(bios_boot(MIB));
        }
        partitions.push(filesystem(200 * MIB, EFI_SYSTEM_PARTITION_GUID, esp(ESP_FSTAB_OPTIONS)));
        partitions.push(filesystem(
            500 * MIB,
            FILESYSTEM_DATA_GUID,
            Filesystem::new(FsKind::Xfs, "/boot").with_label("boot"),
        ));
        partitions.push(filesystem(
            2 * GIB,
            FILESYSTEM_DATA_GUID,
            Filesystem::new(FsKind::Xfs, "/").with_label("root"),
        ));
        gpt(partitions)
    };
    PartitionTemplates::new([(Arch::X86_64, table(true)), (Arch::Aarch64, table(false))])
}

/// Azure RHUI: fixed 64 GiB disk with the root on a preset volume group.
pub fn azure_rhui_tables() -> PartitionTemplates {
    let lv = |name: &str, size: u64, mountpoint: &str, label: &str| LvmLogicalVolume {
        name: name.to_string(),
        size,
        filesystem: Filesystem::new(FsKind::Xfs, mountpoint).with_label(label),
    };
    let vg = LvmVolumeGroup {
        name: ROOT_VG_NAME.to_string(),
        description: "built with lvm2 and osbuild".to_string(),
        logical_volumes: vec![
            lv("homelv", GIB, "/home", "home"),
            lv("rootlv", 2 * GIB, "/", "root"),
            lv("tmplv", 2 * GIB, "/tmp", "tmp"),
            lv("usrlv", 10 * GIB, "/usr", "usr"),
            lv("varlv", 10 * GIB, "/var", "var"),
        ],
    };
    let mut table = gpt(vec![
        filesystem(500 * MIB, EFI_SYSTEM_PARTITION_GUID, esp(ESP_FSTAB_OPTIONS)),
        filesystem(
            500 * MIB,
            FILESYSTEM_DATA_GUID,
            Filesystem::new(FsKind::Xfs, "/boot").with_label("boot"),
        ),
        bios_boot(2 * MIB),
        partition(0, LVM_PARTITION_GUID, Some(Payload::Lvm(vg))),
    ]);
    table.size = 64 * GIB;
    PartitionTemplates::new([(Arch::X86_64, table)])
}

/// Edge disks: ext4 everywhere, DOS on aarch64.
pub fn edge_tables() -> PartitionTemplates {
    let boot = || Filesystem::new(FsKind::Ext4, "/boot").with_label("boot").with_fstab("defaults", 1, 2);
    let root = || Filesystem::new(FsKind::Ext4, "/").with_label("root").with_fstab("defaults", 1, 1);

    let x86_64 = gpt(vec![
        filesystem(501 * MIB, EFI_SYSTEM_PARTITION_GUID, esp(EDGE_ESP_FSTAB_OPTIONS)),
        filesystem(GIB, FILESYSTEM_DATA_GUID, boot()),
        filesystem(2569 * MIB, FILESYSTEM_DATA_GUID, root()),
    ]);

    let aarch64 = PartitionTable {
        uuid: Some(DOS_DISK_ID.to_string()),
        kind: TableKind::Dos,
        size: 0,
        partitions: vec![
            Partition {
                bootable: true,
                ..filesystem(501 * MIB, DOS_FAT16_ID, esp(EDGE_ESP_FSTAB_OPTIONS))
            },
            filesystem(GIB, DOS_LINUX_ID, boot()),
            filesystem(2569 * MIB, DOS_LINUX_ID, root()),
        ],
    };

    PartitionTemplates::new([(Arch::X86_64, x86_64), (Arch::Aarch64, aarch64)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::{MountpointRequest, PlanOptions};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn options(image_type: &str, target_size: u64, lvmify: bool) -> PlanOptions<'_> {
        PlanOptions {
            image_type,
            target_size,
            lvmify,
            allow_mountpoints: true,
        }
    }

    #[test]
    fn test_default_x86_64_table_sums_template() {
        let table = default_tables()
            .plan("x86_64", &[], &options("qcow2", 0, true), &mut StdRng::seed_from_u64(1))
            .unwrap();
        assert_eq!(table.kind, TableKind::Gpt);
        assert_eq!(table.size, MIB + 200 * MIB + 500 * MIB + 2 * GIB);
        assert_eq!(table.partitions.len(), 4);
        assert!(table.partitions[0].bootable);
        assert_eq!(table.uuid.as_deref(), Some(GPT_DISK_UUID));
    }

    #[test]
    fn test_azure_surplus_goes_to_rootlv() {
        let table = azure_rhui_tables()
            .plan("x86_64", &[], &options("azure-rhui", 64 * GIB, true), &mut StdRng::seed_from_u64(1))
            .unwrap();
        assert_eq!(table.size, 64 * GIB);
        let vg = table.partitions[3].volume_group().unwrap();
        let size_of = |name: &str| vg.logical_volumes.iter().find(|lv| lv.name == name).unwrap().size;
        assert_eq!(size_of("homelv"), GIB);
        assert_eq!(size_of("varlv"), 10 * GIB);
        assert_eq!(size_of("usrlv"), 10 * GIB);
        assert!(size_of("rootlv") > 30 * GIB);
    }

    #[test]
    fn test_azure_raises_existing_logical_volume() {
        let requests = [MountpointRequest::new("/var", 20 * GIB)];
        let table = azure_rhui_tables()
            .plan("x86_64", &requests, &options("azure-rhui", 0, true), &mut StdRng::seed_from_u64(1))
            .unwrap();
        let vg = table.partitions[3].volume_group().unwrap();
        assert_eq!(vg.logical_volumes.len(), 5);
        let var = vg.logical_volumes.iter().find(|lv| lv.name == "varlv").unwrap();
        assert_eq!(var.size, 20 * GIB);
    }

    #[test]
    fn test_edge_aarch64_table_is_dos() {
        let table = edge_tables()
            .plan("aarch64", &[], &options("edge-raw-image", 0, false), &mut StdRng::seed_from_u64(1))
            .unwrap();
        assert_eq!(table.kind, TableKind::Dos);
        assert_eq!(table.uuid.as_deref(), Some(DOS_DISK_ID));
        assert!(table.partitions.iter().all(|p| p.uuid.is_none()));
        assert!(table.partitions.iter().all(|p| p.type_code.len() == 2));
        let esp = table.partitions[0].filesystem().unwrap();
        assert_eq!(esp.uuid.as_deref().map(str::len), Some(9));
    }

    #[test]
    fn test_azure_has_no_aarch64_template() {
        let err = azure_rhui_tables()
            .plan("aarch64", &[], &options("azure-rhui", 0, true), &mut StdRng::seed_from_u64(1))
            .unwrap_err();
        assert!(matches!(err, crate::PlanError::UnsupportedArchitecture { .. }));
    }
}
