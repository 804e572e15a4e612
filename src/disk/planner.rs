//! Partition table planning.
//!
//! [`plan`] deep-copies a template, fits the requested mountpoints into it
//! (raising existing filesystems, adding partitions or logical volumes),
//! lays partitions out sequentially and fills in every missing identifier
//! from the caller's random source. The template itself is never touched.

use std::collections::{BTreeMap, BTreeSet};

use rand::RngCore;
use tracing::{debug, info};

use super::lvm::{LVM_EXTENT_SIZE, ROOT_VG_DESCRIPTION, ROOT_VG_NAME};
use super::{
    ids, Filesystem, FsKind, LvmLogicalVolume, LvmVolumeGroup, Partition, PartitionRole,
    PartitionTable, Payload, TableKind, DEFAULT_GRAIN,
};
use crate::common::{align_up, checked_align_up, GIB, MIB};
use crate::error::PlanError;
use crate::pathpolicy::{clean_mountpoint, MOUNTPOINT_POLICIES};
use crate::platform::Arch;

/// Smallest filesystem a customization can ask for.
const MIN_FILESYSTEM_SIZE: u64 = GIB;
const MIN_USR_SIZE: u64 = 2 * GIB;

/// Size of the `/boot` partition added when the root moves into LVM.
const BOOT_PARTITION_SIZE: u64 = 512 * MIB;

/// A filesystem the user wants at `mountpoint`, at least `min_size` bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountpointRequest {
    pub mountpoint: String,
    pub min_size: u64,
}

impl MountpointRequest {
    pub fn new(mountpoint: &str, min_size: u64) -> Self {
        Self {
            mountpoint: mountpoint.to_string(),
            min_size,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PlanOptions<'a> {
    /// Image type name, used in error messages.
    pub image_type: &'a str,
    /// Requested disk size; 0 lets the layout decide.
    pub target_size: u64,
    /// Move `/` into LVM when new mountpoints are requested.
    pub lvmify: bool,
    /// Whether the image type accepts mountpoint customizations at all.
    pub allow_mountpoints: bool,
}

/// Base partition tables of one image type, keyed by architecture.
#[derive(Debug, Clone, Default)]
pub struct PartitionTemplates {
    tables: BTreeMap<Arch, PartitionTable>,
}

impl PartitionTemplates {
    pub fn new(tables: impl IntoIterator<Item = (Arch, PartitionTable)>) -> Self {
        Self {
            tables: tables.into_iter().collect(),
        }
    }

    pub fn get(&self, arch: Arch) -> Option<&PartitionTable> {
        self.tables.get(&arch)
    }

    pub fn arches(&self) -> impl Iterator<Item = Arch> + '_ {
        self.tables.keys().copied()
    }

    /// Plan a table from the template for `arch`.
    pub fn plan<R: RngCore + ?Sized>(
        &self,
        arch: &str,
        requests: &[MountpointRequest],
        options: &PlanOptions<'_>,
        rng: &mut R,
    ) -> Result<PartitionTable, PlanError> {
        let template = arch
            .parse::<Arch>()
            .ok()
            .and_then(|arch| self.get(arch))
            .ok_or_else(|| PlanError::UnsupportedArchitecture {
                arch: arch.to_string(),
                image_type: options.image_type.to_string(),
            })?;
        plan(template, requests, options, rng)
    }
}

/// Produce a concrete partition table from `template`.
///
/// The result depends only on the inputs and the state of `rng`: the same
/// template, requests, options and seed give the same table.
pub fn plan<R: RngCore + ?Sized>(
    template: &PartitionTable,
    requests: &[MountpointRequest],
    options: &PlanOptions<'_>,
    rng: &mut R,
) -> Result<PartitionTable, PlanError> {
    let image_type = options.image_type;
    if !requests.is_empty() && !options.allow_mountpoints {
        return Err(PlanError::policy(
            image_type,
            "custom mountpoints are not supported for this image type",
        ));
    }
    let requests = validate_requests(image_type, requests)?;

    let mut table = template.clone();
    table.assert_type_vocabulary();

    let mut root_floor = 0;
    let mut pending = Vec::new();
    for request in &requests {
        if raise_existing(&mut table, request) {
            if request.mountpoint == "/" {
                root_floor = align_up(request.min_size, DEFAULT_GRAIN);
            }
        } else {
            pending.push(request);
        }
    }

    let root_count = table.filesystems().iter().filter(|fs| fs.mountpoint == "/").count();
    if root_count != 1 {
        return Err(PlanError::policy(
            image_type,
            format!("partition table must contain exactly one '/' filesystem, found {}", root_count),
        ));
    }

    if !pending.is_empty() && options.lvmify && !table.contains_lvm() {
        convert_root_to_lvm(&mut table);
        ensure_boot_partition(&mut table, image_type)?;
    }
    for request in pending {
        create_filesystem(&mut table, request, image_type)?;
    }

    relayout(&mut table, options.target_size, root_floor)
        .ok_or_else(|| too_large(image_type))?;
    assign_identifiers(&mut table, rng);

    table.assert_type_vocabulary();
    if let Err(err) = table.check_layout() {
        panic!("planned partition table is inconsistent: {}", err);
    }

    info!(
        image_type,
        kind = %table.kind,
        size = table.size,
        partitions = table.partitions.len(),
        lvm = table.contains_lvm(),
        "planned partition table"
    );
    Ok(table)
}

fn too_large(image_type: &str) -> PlanError {
    PlanError::policy(image_type, "requested sizes exceed the addressable disk size")
}

fn validate_requests(
    image_type: &str,
    requests: &[MountpointRequest],
) -> Result<Vec<MountpointRequest>, PlanError> {
    let mut seen = BTreeSet::new();
    let mut cleaned = Vec::with_capacity(requests.len());

    for request in requests {
        let path =
            clean_mountpoint(&request.mountpoint).map_err(|e| PlanError::policy(image_type, e))?;
        MOUNTPOINT_POLICIES
            .check(&path)
            .map_err(|e| PlanError::policy(image_type, e))?;

        if !seen.insert(path.clone()) {
            let reason = if path == "/" {
                "more than one mountpoint resolves to '/'".to_string()
            } else {
                format!("duplicate mountpoint '{}'", path)
            };
            return Err(PlanError::policy(image_type, reason));
        }

        let minimum = if path == "/usr" { MIN_USR_SIZE } else { MIN_FILESYSTEM_SIZE };
        let min_size = request.min_size.max(minimum);
        // Extents are a multiple of the partition grain.
        if checked_align_up(min_size, LVM_EXTENT_SIZE).is_none() {
            return Err(too_large(image_type));
        }
        cleaned.push(MountpointRequest {
            min_size,
            mountpoint: path,
        });
    }

    Ok(cleaned)
}

/// Grow the container of an existing filesystem. Returns false when no
/// filesystem has the requested mountpoint.
fn raise_existing(table: &mut PartitionTable, request: &MountpointRequest) -> bool {
    for partition in &mut table.partitions {
        match &mut partition.payload {
            Some(Payload::Filesystem(fs)) if fs.mountpoint == request.mountpoint => {
                partition.size = partition.size.max(align_up(request.min_size, DEFAULT_GRAIN));
                return true;
            }
            Some(Payload::Lvm(vg)) => {
                if let Some(lv) = vg
                    .logical_volumes
                    .iter_mut()
                    .find(|lv| lv.filesystem.mountpoint == request.mountpoint)
                {
                    lv.size = lv.size.max(align_up(request.min_size, LVM_EXTENT_SIZE));
                    return true;
                }
            }
            _ => {}
        }
    }
    false
}

/// Turn the plain partition holding `/` into an LVM physical volume whose
/// only logical volume holds the former root filesystem.
fn convert_root_to_lvm(table: &mut PartitionTable) {
    let kind = table.kind;
    let Some(index) = table.root_partition_index() else {
        return;
    };
    let partition = &mut table.partitions[index];
    if partition.filesystem().is_none() {
        return;
    }
    let Some(Payload::Filesystem(root)) = partition.payload.take() else {
        return;
    };

    let mut vg = LvmVolumeGroup::new(ROOT_VG_NAME, ROOT_VG_DESCRIPTION);
    vg.logical_volumes.push(LvmLogicalVolume {
        name: super::lvm::lv_base_name("/"),
        size: align_up(partition.size.max(DEFAULT_GRAIN), LVM_EXTENT_SIZE),
        filesystem: root,
    });

    partition.type_code = kind.type_code(PartitionRole::Lvm).to_string();
    partition.payload = Some(Payload::Lvm(vg));
    debug!(partition = index, "converted root partition to LVM");
}

/// `/boot` cannot live inside LVM; add a partition for it in front of the
/// root partition when the template has none.
fn ensure_boot_partition(table: &mut PartitionTable, image_type: &str) -> Result<(), PlanError> {
    if table.find_filesystem("/boot").is_some() {
        return Ok(());
    }
    check_partition_capacity(table, image_type)?;

    let fs_kind = root_fs_kind(table);
    let index = table.root_partition_index().unwrap_or(table.partitions.len());
    let kind = table.kind;
    table.partitions.insert(
        index,
        Partition {
            start: 0,
            size: BOOT_PARTITION_SIZE,
            bootable: false,
            type_code: kind.type_code(PartitionRole::Filesystem).to_string(),
            uuid: None,
            payload: Some(Payload::Filesystem(
                Filesystem::new(fs_kind, "/boot").with_label("boot"),
            )),
        },
    );
    debug!("added /boot partition");
    Ok(())
}

fn create_filesystem(
    table: &mut PartitionTable,
    request: &MountpointRequest,
    image_type: &str,
) -> Result<(), PlanError> {
    let filesystem =
        Filesystem::new(root_fs_kind(table), &request.mountpoint).with_label(&label_for(&request.mountpoint));

    if let Some(vg) = table.volume_group_mut() {
        let lv = vg
            .create_logical_volume(filesystem, request.min_size)
            .ok_or_else(|| too_large(image_type))?;
        debug!(mountpoint = %request.mountpoint, name = %lv.name, size = lv.size, "created logical volume");
        return Ok(());
    }

    check_partition_capacity(table, image_type)?;
    let kind = table.kind;
    table.partitions.push(Partition {
        start: 0,
        size: align_up(request.min_size, DEFAULT_GRAIN),
        bootable: false,
        type_code: kind.type_code(PartitionRole::Filesystem).to_string(),
        uuid: None,
        payload: Some(Payload::Filesystem(filesystem)),
    });
    debug!(mountpoint = %request.mountpoint, size = request.min_size, "created partition");
    Ok(())
}

fn check_partition_capacity(table: &PartitionTable, image_type: &str) -> Result<(), PlanError> {
    let max = table.kind.max_partitions();
    if table.partitions.len() >= max {
        return Err(PlanError::policy(
            image_type,
            format!("a {} partition table cannot hold more than {} partitions", table.kind, max),
        ));
    }
    Ok(())
}

fn root_fs_kind(table: &PartitionTable) -> FsKind {
    table.root_filesystem().map(|fs| fs.kind).unwrap_or(FsKind::Xfs)
}

/// Filesystem label for a new mountpoint: `/var/log` → `var_log`,
/// at most 12 characters (the xfs limit).
fn label_for(mountpoint: &str) -> String {
    mountpoint
        .trim_matches('/')
        .replace('/', "_")
        .chars()
        .take(12)
        .collect()
}

/// Align sizes, size the root-bearing partition and assign offsets.
///
/// The root-bearing partition absorbs whatever the other partitions and the
/// reserved regions leave of the table, but never drops below its floor.
/// When the floor does not fit, the table grows. Returns `None` when the
/// sizes do not fit in a `u64`.
fn relayout(table: &mut PartitionTable, target_size: u64, root_floor: u64) -> Option<()> {
    let reserved = table.kind.header_reserve() + table.kind.footer_reserve();
    let header = table.kind.header_reserve();
    let Some(growable) = table.root_partition_index() else {
        return Some(());
    };

    for partition in &mut table.partitions {
        partition.size = match &mut partition.payload {
            Some(Payload::Lvm(vg)) => {
                vg.align_volumes();
                checked_align_up(vg.required_size()?, DEFAULT_GRAIN)?
            }
            _ => checked_align_up(partition.size, DEFAULT_GRAIN)?,
        };
    }

    let root_size = table.partitions[growable].size;
    let floor = match table.partitions[growable].payload {
        Some(Payload::Lvm(_)) => root_size,
        _ => checked_align_up(
            root_size
                .saturating_sub(reserved)
                .max(root_floor)
                .max(DEFAULT_GRAIN),
            DEFAULT_GRAIN,
        )?,
    };

    let fixed = table
        .partitions
        .iter()
        .enumerate()
        .filter(|(index, _)| *index != growable)
        .try_fold(0u64, |total, (_, partition)| total.checked_add(partition.size))?;

    let used = fixed.checked_add(root_size)?;
    let mut size = checked_align_up(target_size.max(table.size).max(used), DEFAULT_GRAIN)?;
    let overhead = reserved.checked_add(fixed)?;
    let mut grown = size.saturating_sub(overhead);
    if grown < floor {
        grown = floor;
        size = overhead.checked_add(floor)?;
    }

    let partition = &mut table.partitions[growable];
    partition.size = grown;
    if let Some(Payload::Lvm(vg)) = &mut partition.payload {
        vg.absorb_surplus(grown);
    }

    let mut start = header;
    for partition in &mut table.partitions {
        partition.start = start;
        start += partition.size;
    }
    table.size = size;
    Some(())
}

/// Fill empty identifier slots in table order.
fn assign_identifiers<R: RngCore + ?Sized>(table: &mut PartitionTable, rng: &mut R) {
    let kind = table.kind;
    if table.uuid.is_none() {
        table.uuid = Some(match kind {
            TableKind::Gpt => ids::new_uuid(rng),
            TableKind::Dos => ids::new_dos_disk_id(rng),
        });
    }

    for partition in &mut table.partitions {
        if kind == TableKind::Gpt && partition.uuid.is_none() {
            partition.uuid = Some(ids::new_uuid(rng));
        }
        match &mut partition.payload {
            Some(Payload::Filesystem(fs)) => assign_filesystem_uuid(fs, rng),
            Some(Payload::Lvm(vg)) => {
                for lv in &mut vg.logical_volumes {
                    assign_filesystem_uuid(&mut lv.filesystem, rng);
                }
            }
            None => {}
        }
    }
}

fn assign_filesystem_uuid<R: RngCore + ?Sized>(fs: &mut Filesystem, rng: &mut R) {
    if fs.uuid.is_none() {
        fs.uuid = Some(match fs.kind {
            FsKind::Vfat => ids::new_vfat_serial(rng),
            FsKind::Ext4 | FsKind::Xfs => ids::new_uuid(rng),
        });
    }
}
