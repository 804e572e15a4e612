//! Image kinds: how each kind of image wires pipelines into a manifest.
//!
//! An image kind knows which pipelines make up the image and in what order;
//! the distro layer decides the contents (packages, partition table, kernel
//! options) and hands a configured kind to [`ImageKind::instantiate`].

pub mod installer;
pub mod live;
pub mod ostree;

use rand::RngCore;

use crate::manifest::build::BuildRoot;
use crate::manifest::{Manifest, PipelineRef};
use crate::rpmmd::RepoConfig;

pub use installer::{OstreeInstaller, OstreeSimplifiedInstaller};
pub use live::{LiveFinish, LiveImage};
pub use ostree::{OstreeArchive, OstreeContainer, OstreeRawImage};

/// Name of the build root pipeline every image kind starts with.
pub const BUILD_PIPELINE: &str = "build";

#[derive(Debug, Clone)]
pub enum ImageKind {
    Live(LiveImage),
    OstreeArchive(OstreeArchive),
    OstreeContainer(OstreeContainer),
    OstreeRawImage(OstreeRawImage),
    OstreeInstaller(OstreeInstaller),
    OstreeSimplifiedInstaller(OstreeSimplifiedInstaller),
}

impl ImageKind {
    /// Add this image's pipelines to `manifest` and return the pipeline
    /// producing the final artifact.
    ///
    /// `rng` supplies identifiers that are not part of the partition table,
    /// such as the FAT volume id of an ISO's EFI boot image.
    pub fn instantiate(
        &self,
        manifest: &mut Manifest,
        runner: &str,
        repos: &[RepoConfig],
        rng: &mut dyn RngCore,
    ) -> PipelineRef {
        let build = manifest.add(BUILD_PIPELINE, None, BuildRoot::new(runner, repos.to_vec()));
        manifest.set_checkpoint(build);
        match self {
            ImageKind::Live(image) => image.instantiate(manifest, build),
            ImageKind::OstreeArchive(image) => image.instantiate(manifest, build),
            ImageKind::OstreeContainer(image) => image.instantiate(manifest, build),
            ImageKind::OstreeRawImage(image) => image.instantiate(manifest, build),
            ImageKind::OstreeInstaller(image) => image.instantiate(manifest, build, rng),
            ImageKind::OstreeSimplifiedInstaller(image) => image.instantiate(manifest, build, rng),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::common::{GIB, MIB};
    use crate::disk::types::{EFI_SYSTEM_PARTITION_GUID, FILESYSTEM_DATA_GUID};
    use crate::disk::{Filesystem, FsKind, Partition, PartitionTable, Payload, TableKind};
    use crate::manifest::os::{OsCustomizations, OsTree};
    use crate::platform::Platform;
    use crate::rpmmd::PackageSet;

    /// A planned two-partition GPT table.
    pub fn table() -> PartitionTable {
        PartitionTable {
            uuid: Some("D209C89E-EA5E-4FBD-B161-B461CCE297E0".into()),
            kind: TableKind::Gpt,
            size: 4 * GIB,
            partitions: vec![
                Partition {
                    start: MIB,
                    size: 200 * MIB,
                    bootable: false,
                    type_code: EFI_SYSTEM_PARTITION_GUID.into(),
                    uuid: Some("68b2905b-df3e-4fb3-80fa-49d1e773aa33".into()),
                    payload: Some(Payload::Filesystem(
                        Filesystem::new(FsKind::Vfat, "/boot/efi").with_uuid("7B77-95E7"),
                    )),
                },
                Partition {
                    start: 201 * MIB,
                    size: 3 * GIB,
                    bootable: false,
                    type_code: FILESYSTEM_DATA_GUID.into(),
                    uuid: Some("6264d520-3fb9-423f-8ab8-7a0a8e3d3562".into()),
                    payload: Some(Payload::Filesystem(
                        Filesystem::new(FsKind::Xfs, "/").with_uuid("a7d2c7a8-6c9b-4f0d-9a0e-1b3c5d7e9f11"),
                    )),
                },
            ],
        }
    }

    pub fn os(ostree_ref: Option<&str>) -> OsTree {
        OsTree {
            platform: Platform::x86_64_hybrid("redhat"),
            repos: Vec::new(),
            packages: PackageSet::new("os", &["@core"]),
            blueprint_packages: Vec::new(),
            containers: Vec::new(),
            customizations: OsCustomizations::default(),
            partition_table: None,
            ostree_ref: ostree_ref.map(str::to_string),
            bootable: true,
        }
    }
}
