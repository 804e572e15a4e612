//! Package-based disk images: `build → os → image`, optionally repackaged.

use crate::disk::PartitionTable;
use crate::manifest::archive::{ImageConversion, ImageFormat, TarArchive, XzCompression};
use crate::manifest::os::OsTree;
use crate::manifest::raw_image::RawImage;
use crate::manifest::{Manifest, PipelineRef};
use crate::platform::Platform;

/// Name of the uncompressed disk inside archives and conversions.
const RAW_DISK: &str = "disk.raw";

/// What happens to the raw disk after it is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveFinish {
    /// Ship the raw disk as is.
    Raw,
    /// xz-compress the raw disk.
    Xz,
    /// Wrap the raw disk in a tar archive.
    Archive,
    /// Convert to a fixed-size VHD.
    Vpc,
    /// Convert to VHD, then xz-compress.
    VpcXz,
    Qcow2,
}

#[derive(Debug, Clone)]
pub struct LiveImage {
    pub platform: Platform,
    pub os: OsTree,
    pub partition_table: PartitionTable,
    /// Name of the final artifact.
    pub filename: String,
    pub finish: LiveFinish,
}

impl LiveImage {
    fn image_filename(&self) -> String {
        match self.finish {
            LiveFinish::Raw => self.filename.clone(),
            LiveFinish::Xz => strip_xz(&self.filename),
            LiveFinish::Archive | LiveFinish::Vpc | LiveFinish::VpcXz | LiveFinish::Qcow2 => {
                RAW_DISK.to_string()
            }
        }
    }

    pub(super) fn instantiate(&self, manifest: &mut Manifest, build: PipelineRef) -> PipelineRef {
        let mut os = self.os.clone();
        os.partition_table = Some(self.partition_table.clone());
        let os = manifest.add("os", Some(build), os);
        manifest.set_checkpoint(os);

        let image_filename = self.image_filename();
        let image = manifest.add(
            "image",
            Some(build),
            RawImage {
                tree: os,
                partition_table: self.partition_table.clone(),
                platform: self.platform.clone(),
                filename: image_filename.clone(),
            },
        );

        match self.finish {
            LiveFinish::Raw => image,
            LiveFinish::Xz => manifest.add(
                "xz",
                Some(build),
                XzCompression {
                    input: image,
                    filename: self.filename.clone(),
                },
            ),
            LiveFinish::Archive => {
                let mut archive = TarArchive::new(image, &self.filename);
                archive.format = Some("oldgnu".to_string());
                archive.paths = vec![image_filename];
                manifest.add("archive", Some(build), archive)
            }
            LiveFinish::Vpc => manifest.add(
                "vpc",
                Some(build),
                ImageConversion {
                    input: image,
                    filename: self.filename.clone(),
                    format: ImageFormat::Vpc { force_size: true },
                },
            ),
            LiveFinish::VpcXz => {
                let vpc = manifest.add(
                    "vpc",
                    Some(build),
                    ImageConversion {
                        input: image,
                        filename: strip_xz(&self.filename),
                        format: ImageFormat::Vpc { force_size: true },
                    },
                );
                manifest.add(
                    "xz",
                    Some(build),
                    XzCompression {
                        input: vpc,
                        filename: self.filename.clone(),
                    },
                )
            }
            LiveFinish::Qcow2 => manifest.add(
                "qcow2",
                Some(build),
                ImageConversion {
                    input: image,
                    filename: self.filename.clone(),
                    format: ImageFormat::Qcow2 {
                        compat: "1.1".to_string(),
                    },
                },
            ),
        }
    }
}

fn strip_xz(filename: &str) -> String {
    filename.strip_suffix(".xz").unwrap_or(filename).to_string()
}
