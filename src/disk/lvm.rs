//! LVM volume group sizing and logical volume naming.

use super::{Filesystem, LvmLogicalVolume, LvmVolumeGroup};
use crate::common::{align_down, align_up, checked_align_up, MIB};

/// Physical extent size; logical volume sizes are multiples of it.
pub const LVM_EXTENT_SIZE: u64 = 4 * MIB;

/// Space reserved at the start of a physical volume for LVM metadata.
pub const LVM_METADATA_SIZE: u64 = MIB;

pub const ROOT_VG_NAME: &str = "rootvg";
pub const ROOT_VG_DESCRIPTION: &str = "built with lvm2 by image-planner";

/// Base logical volume name for a mountpoint: `/` → `rootlv`,
/// `/var/log` → `var_loglv`.
pub fn lv_base_name(mountpoint: &str) -> String {
    let trimmed = mountpoint.trim_matches('/');
    if trimmed.is_empty() {
        "rootlv".to_string()
    } else {
        format!("{}lv", trimmed.replace('/', "_"))
    }
}

impl LvmVolumeGroup {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            logical_volumes: Vec::new(),
        }
    }

    /// Add a logical volume for `filesystem`, sized to at least `size`
    /// rounded up to whole extents. Names are unique within the group.
    ///
    /// Returns `None`, leaving the group unchanged, when `size` cannot be
    /// rounded to whole extents.
    pub fn create_logical_volume(
        &mut self,
        filesystem: Filesystem,
        size: u64,
    ) -> Option<&LvmLogicalVolume> {
        let size = checked_align_up(size, LVM_EXTENT_SIZE)?;
        let base = lv_base_name(&filesystem.mountpoint);
        let mut name = base.clone();
        let mut suffix = 0;
        while self.logical_volumes.iter().any(|lv| lv.name == name) {
            name = format!("{}{:02}", base, suffix);
            suffix += 1;
        }

        let index = self.logical_volumes.len();
        self.logical_volumes.push(LvmLogicalVolume {
            name,
            size,
            filesystem,
        });
        Some(&self.logical_volumes[index])
    }

    pub fn align_volumes(&mut self) {
        for lv in &mut self.logical_volumes {
            lv.size = align_up(lv.size, LVM_EXTENT_SIZE);
        }
    }

    /// Bytes the physical volume needs: metadata plus every logical volume.
    /// `None` when the total does not fit in a `u64`.
    pub fn required_size(&self) -> Option<u64> {
        self.logical_volumes
            .iter()
            .try_fold(LVM_METADATA_SIZE, |total, lv| total.checked_add(lv.size))
    }

    /// Give the unused part of a `pv_size` physical volume to the logical
    /// volume holding `/`, or to the last one when none does.
    pub fn absorb_surplus(&mut self, pv_size: u64) {
        let Some(required) = self.required_size() else {
            return;
        };
        let surplus = align_down(pv_size.saturating_sub(required), LVM_EXTENT_SIZE);
        if surplus == 0 {
            return;
        }
        let target = self
            .logical_volumes
            .iter()
            .position(|lv| lv.filesystem.mountpoint == "/")
            .or_else(|| self.logical_volumes.len().checked_sub(1));
        if let Some(index) = target {
            self.logical_volumes[index].size += surplus;
        }
    }
}
