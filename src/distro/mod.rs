//! Distributions, their architectures and image types, and manifest
//! assembly from an [`ImageRequest`].

pub mod imagetypes;
pub mod partition_tables;
pub mod policy;

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info};

use crate::blueprint::Customizations;
use crate::config::ImageRequest;
use crate::disk::{PartitionTable, PlanOptions};
use crate::error::PlanError;
use crate::image::installer::IsoSettings;
use crate::image::ostree::nginx_container_defaults;
use crate::image::{
    ImageKind, LiveImage, OstreeArchive, OstreeContainer, OstreeInstaller, OstreeRawImage,
    OstreeSimplifiedInstaller,
};
use crate::manifest::os::{OsCustomizations, OsTree};
use crate::manifest::{Manifest, PipelineRef};
use crate::ostree::{default_ref, verify_ref, CommitSource, Remote};
use crate::platform::{Arch, Platform};

pub use imagetypes::{ImageFamily, ImageType};

const OSTREE_REMOTE: &str = "rhel-edge";
const OSTREE_OS_NAME: &str = "redhat";

/// A manifest ready for content resolution.
#[derive(Debug)]
pub struct AssembledManifest {
    pub manifest: Manifest,
    /// Pipeline producing the image file.
    pub artifact: PipelineRef,
    /// Planned disk layout, for image types that produce a disk.
    pub partition_table: Option<PartitionTable>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Distro {
    pub name: &'static str,
    pub product: &'static str,
    pub os_version: &'static str,
    /// Runner used by every build root.
    pub runner: &'static str,
    /// Ref template with `{arch}` standing for the architecture.
    pub ostree_ref_template: &'static str,
    pub iso_label_template: &'static str,
    /// Image types by name, per architecture.
    arches: BTreeMap<Arch, BTreeMap<&'static str, ImageType>>,
}

impl Distro {
    pub fn rhel9() -> Self {
        let mut distro = Self {
            name: "rhel-9",
            product: "Red Hat Enterprise Linux",
            os_version: "9.4",
            runner: "org.osbuild.rhel90",
            ostree_ref_template: "rhel/9/{arch}/edge",
            iso_label_template: "RHEL-9-4-0-BaseOS-{arch}",
            arches: BTreeMap::new(),
        };
        distro.add_arch(Platform::x86_64_hybrid("redhat"));
        distro.add_arch(Platform::aarch64_uefi("redhat"));
        distro
    }

    fn add_arch(&mut self, platform: Platform) {
        let image_types = imagetypes::image_types(&platform)
            .into_iter()
            .map(|image_type| (image_type.name, image_type))
            .collect();
        self.arches.insert(platform.arch, image_types);
    }

    pub fn arches(&self) -> Vec<Arch> {
        self.arches.keys().copied().collect()
    }

    /// Image types offered on `arch`, sorted by name.
    pub fn image_types(&self, arch: Arch) -> Vec<&ImageType> {
        self.arches
            .get(&arch)
            .map(|types| types.values().collect())
            .unwrap_or_default()
    }

    fn arch(
        &self,
        arch: &str,
        image_type: &str,
    ) -> Result<&BTreeMap<&'static str, ImageType>, PlanError> {
        arch.parse::<Arch>()
            .ok()
            .and_then(|arch| self.arches.get(&arch))
            .ok_or_else(|| PlanError::UnsupportedArchitecture {
                arch: arch.to_string(),
                image_type: image_type.to_string(),
            })
    }

    pub fn image_type(&self, arch: &str, name: &str) -> Result<&ImageType, PlanError> {
        self.arch(arch, name)?
            .get(name)
            .ok_or_else(|| PlanError::UnknownImageType {
                name: name.to_string(),
                arch: arch.to_string(),
            })
    }

    /// Check, plan and wire the pipelines of `request`, then collect the
    /// content the manifest needs resolved.
    pub fn assemble(&self, request: &ImageRequest) -> Result<AssembledManifest, PlanError> {
        let image_type = self.image_type(&request.arch, &request.image_type)?;
        let warnings = policy::check_options(image_type, request)?;
        let customizations = request.blueprint.customizations();
        let mut rng = StdRng::seed_from_u64(request.seed);

        let partition_table = if image_type.has_disk() {
            let options = PlanOptions {
                image_type: image_type.name,
                target_size: image_type.size(request.size),
                lvmify: !image_type.rpm_ostree,
                allow_mountpoints: !image_type.rpm_ostree,
            };
            Some(image_type.partition_tables.plan(
                &request.arch,
                &customizations.mountpoint_requests(),
                &options,
                &mut rng,
            )?)
        } else {
            None
        };

        let kind = self.image_kind(image_type, request, &customizations, partition_table.clone())?;
        debug!(image_type = image_type.name, arch = %image_type.platform.arch, "instantiating image");

        let mut manifest = Manifest::new();
        let artifact = kind.instantiate(&mut manifest, self.runner, &request.repositories, &mut rng);
        let artifact_name = manifest.pipeline(artifact).name();
        assert!(
            image_type.exports.iter().any(|export| *export == artifact_name),
            "image type '{}' does not export its final pipeline '{}'",
            image_type.name,
            artifact_name
        );
        for export in &image_type.exports {
            let Some(handle) = manifest.find(export) else {
                panic!(
                    "image type '{}' exports pipeline '{}', which its image kind does not create",
                    image_type.name, export
                );
            };
            manifest.set_export(handle);
        }
        manifest.collect_content();

        info!(
            distro = self.name,
            image_type = image_type.name,
            arch = %image_type.platform.arch,
            pipelines = manifest.pipelines().len(),
            warnings = warnings.len(),
            "assembled manifest"
        );
        Ok(AssembledManifest {
            manifest,
            artifact,
            partition_table,
            warnings,
        })
    }

    fn ostree_ref(&self, image_type: &ImageType, request: &ImageRequest) -> Result<String, PlanError> {
        let reference = request
            .ostree
            .as_ref()
            .and_then(|o| o.reference.clone())
            .unwrap_or_else(|| default_ref(self.ostree_ref_template, image_type.platform.arch.as_str()));
        if !verify_ref(&reference) {
            return Err(PlanError::policy(
                image_type.name,
                format!("invalid ostree ref '{}'", reference),
            ));
        }
        Ok(reference)
    }

    fn ostree_url<'a>(&self, image_type: &ImageType, request: &'a ImageRequest) -> Result<&'a str, PlanError> {
        request
            .ostree
            .as_ref()
            .and_then(|o| o.url.as_deref())
            .ok_or_else(|| PlanError::policy(image_type.name, "an ostree URL is required"))
    }

    fn os_tree(&self, image_type: &ImageType, request: &ImageRequest, c: &Customizations) -> OsTree {
        let defaults = OsCustomizations::default();
        let mut kernel_options = image_type.kernel_options.clone();
        kernel_options.extend(c.kernel_append().map(str::to_string));
        let mut enabled_services = image_type.enabled_services.clone();
        let mut disabled_services = Vec::new();
        if let Some(services) = &c.services {
            enabled_services.extend(services.enabled.iter().cloned());
            disabled_services.extend(services.disabled.iter().cloned());
        }
        let locale = c.locale.as_ref();

        OsTree {
            platform: image_type.platform.clone(),
            repos: request.repositories.clone(),
            packages: image_type.packages.clone(),
            blueprint_packages: request.blueprint.packages.clone(),
            containers: request.blueprint.containers.clone(),
            customizations: OsCustomizations {
                hostname: c.hostname.clone(),
                language: locale
                    .and_then(|l| l.languages.first().cloned())
                    .unwrap_or(defaults.language),
                keyboard: locale.and_then(|l| l.keyboard.clone()),
                timezone: c.timezone.clone().unwrap_or(defaults.timezone),
                kernel_name: c.kernel_name().map(str::to_string).unwrap_or(defaults.kernel_name),
                kernel_options,
                users: c.users.clone(),
                groups: c.groups.clone(),
                enabled_services,
                disabled_services,
            },
            partition_table: None,
            ostree_ref: None,
            bootable: image_type.bootable,
        }
    }

    fn raw_image(
        &self,
        image_type: &ImageType,
        request: &ImageRequest,
        c: &Customizations,
        partition_table: PartitionTable,
        filename: &str,
    ) -> Result<OstreeRawImage, PlanError> {
        let url = self.ostree_url(image_type, request)?;
        let mut kernel_options = image_type.kernel_options.clone();
        kernel_options.extend(c.kernel_append().map(str::to_string));
        Ok(OstreeRawImage {
            platform: image_type.platform.clone(),
            commit: CommitSource {
                reference: self.ostree_ref(image_type, request)?,
                url: url.to_string(),
            },
            remote: Remote {
                name: OSTREE_REMOTE.to_string(),
                url: url.to_string(),
                content_url: request.ostree.as_ref().and_then(|o| o.content_url.clone()),
                gpg_key_paths: Vec::new(),
            },
            os_name: OSTREE_OS_NAME.to_string(),
            partition_table,
            kernel_options,
            users: c.users.clone(),
            groups: c.groups.clone(),
            ignition: c.ignition.is_some(),
            filename: filename.to_string(),
        })
    }

    fn iso_settings(&self, image_type: &ImageType, request: &ImageRequest) -> IsoSettings {
        IsoSettings {
            platform: image_type.platform.clone(),
            repos: request.repositories.clone(),
            extra_packages: Vec::new(),
            product: self.product.to_string(),
            os_version: self.os_version.to_string(),
            variant: "edge".to_string(),
            iso_label_template: self.iso_label_template.to_string(),
            filename: image_type.filename.to_string(),
        }
    }

    fn image_kind(
        &self,
        image_type: &ImageType,
        request: &ImageRequest,
        c: &Customizations,
        partition_table: Option<PartitionTable>,
    ) -> Result<ImageKind, PlanError> {
        let table = || {
            partition_table.clone().ok_or_else(|| PlanError::UnsupportedArchitecture {
                arch: request.arch.clone(),
                image_type: image_type.name.to_string(),
            })
        };
        let parent = || -> Result<Option<CommitSource>, PlanError> {
            let Some(url) = request.ostree.as_ref().and_then(|o| o.url.clone()) else {
                return Ok(None);
            };
            let reference = match request.ostree.as_ref().and_then(|o| o.parent.clone()) {
                Some(parent) => parent,
                None => self.ostree_ref(image_type, request)?,
            };
            Ok(Some(CommitSource { reference, url }))
        };

        let kind = match image_type.family {
            ImageFamily::Live(finish) => ImageKind::Live(LiveImage {
                platform: image_type.platform.clone(),
                os: self.os_tree(image_type, request, c),
                partition_table: table()?,
                filename: image_type.filename.to_string(),
                finish,
            }),
            ImageFamily::EdgeCommit => ImageKind::OstreeArchive(OstreeArchive {
                os: self.os_tree(image_type, request, c),
                reference: self.ostree_ref(image_type, request)?,
                os_version: self.os_version.to_string(),
                parent: parent()?,
                filename: image_type.filename.to_string(),
            }),
            ImageFamily::EdgeContainer => {
                let (container_packages, cmd, exposed_ports) = nginx_container_defaults();
                ImageKind::OstreeContainer(OstreeContainer {
                    os: self.os_tree(image_type, request, c),
                    reference: self.ostree_ref(image_type, request)?,
                    os_version: self.os_version.to_string(),
                    parent: parent()?,
                    container_packages,
                    cmd,
                    exposed_ports,
                    filename: image_type.filename.to_string(),
                })
            }
            ImageFamily::EdgeRawImage => ImageKind::OstreeRawImage(self.raw_image(
                image_type,
                request,
                c,
                table()?,
                image_type.filename,
            )?),
            ImageFamily::EdgeInstaller => ImageKind::OstreeInstaller(OstreeInstaller {
                iso: self.iso_settings(image_type, request),
                commit: CommitSource {
                    reference: self.ostree_ref(image_type, request)?,
                    url: self.ostree_url(image_type, request)?.to_string(),
                },
                os_name: OSTREE_OS_NAME.to_string(),
                remote: OSTREE_REMOTE.to_string(),
                users: c.users.clone(),
                groups: c.groups.clone(),
            }),
            ImageFamily::EdgeSimplifiedInstaller => {
                let installation_device = c.installation_device.clone().ok_or_else(|| {
                    PlanError::policy(image_type.name, "an installation device is required")
                })?;
                ImageKind::OstreeSimplifiedInstaller(OstreeSimplifiedInstaller {
                    iso: self.iso_settings(image_type, request),
                    raw_image: self.raw_image(image_type, request, c, table()?, "image.raw.xz")?,
                    installation_device,
                    fdo: c.fdo.clone(),
                })
            }
        };
        Ok(kind)
    }
}
