//! Partition type codes for GPT and DOS tables.

use super::TableKind;

pub const BIOS_BOOT_PARTITION_GUID: &str = "21686148-6449-6E6F-744E-656564454649";
pub const EFI_SYSTEM_PARTITION_GUID: &str = "C12A7328-F81F-11D2-BA4B-00A0C93EC93B";
pub const FILESYSTEM_DATA_GUID: &str = "0FC63DAF-8483-4772-8E79-3D69D8477DE4";
pub const LVM_PARTITION_GUID: &str = "E6D6D379-F507-44C2-A23C-238F2A3DF928";

pub const DOS_FAT16_ID: &str = "06";
pub const DOS_EFI_ID: &str = "ef";
pub const DOS_LINUX_ID: &str = "83";
pub const DOS_LVM_ID: &str = "8e";

/// What a partition is used for, independent of the table format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionRole {
    BiosBoot,
    EfiSystem,
    Filesystem,
    Lvm,
}

impl TableKind {
    /// Type code for `role` in this table's vocabulary.
    ///
    /// DOS tables have no BIOS boot partition type; asking for one is a
    /// caller bug.
    pub fn type_code(&self, role: PartitionRole) -> &'static str {
        match (self, role) {
            (TableKind::Gpt, PartitionRole::BiosBoot) => BIOS_BOOT_PARTITION_GUID,
            (TableKind::Gpt, PartitionRole::EfiSystem) => EFI_SYSTEM_PARTITION_GUID,
            (TableKind::Gpt, PartitionRole::Filesystem) => FILESYSTEM_DATA_GUID,
            (TableKind::Gpt, PartitionRole::Lvm) => LVM_PARTITION_GUID,
            (TableKind::Dos, PartitionRole::BiosBoot) => {
                panic!("dos partition tables have no BIOS boot partition type")
            }
            (TableKind::Dos, PartitionRole::EfiSystem) => DOS_FAT16_ID,
            (TableKind::Dos, PartitionRole::Filesystem) => DOS_LINUX_ID,
            (TableKind::Dos, PartitionRole::Lvm) => DOS_LVM_ID,
        }
    }

    /// Whether `code` belongs to this table kind's vocabulary.
    pub fn accepts(&self, code: &str) -> bool {
        match self {
            TableKind::Gpt => is_guid(code),
            TableKind::Dos => code.len() == 2 && code.chars().all(|c| c.is_ascii_hexdigit()),
        }
    }
}

fn is_guid(code: &str) -> bool {
    let groups: Vec<&str> = code.split('-').collect();
    groups.len() == 5
        && groups
            .iter()
            .zip([8, 4, 4, 4, 12])
            .all(|(group, len)| group.len() == len && group.chars().all(|c| c.is_ascii_hexdigit()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vocabularies_are_disjoint() {
        for role in [PartitionRole::EfiSystem, PartitionRole::Filesystem, PartitionRole::Lvm] {
            let gpt = TableKind::Gpt.type_code(role);
            let dos = TableKind::Dos.type_code(role);
            assert!(TableKind::Gpt.accepts(gpt));
            assert!(!TableKind::Dos.accepts(gpt));
            assert!(TableKind::Dos.accepts(dos));
            assert!(!TableKind::Gpt.accepts(dos));
        }
    }

    #[test]
    #[should_panic(expected = "no BIOS boot partition type")]
    fn test_dos_bios_boot_panics() {
        TableKind::Dos.type_code(PartitionRole::BiosBoot);
    }
}
