//! Image type definitions: artifact names, package sets, pipelines and
//! partition templates per architecture.

use super::partition_tables::{azure_rhui_tables, default_tables, edge_tables};
use crate::common::{GIB, MIB};
use crate::disk::PartitionTemplates;
use crate::image::LiveFinish;
use crate::platform::{strings, Arch, BootMode, Platform};
use crate::rpmmd::PackageSet;

/// Which image kind an image type instantiates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFamily {
    Live(LiveFinish),
    EdgeCommit,
    EdgeContainer,
    EdgeRawImage,
    EdgeInstaller,
    EdgeSimplifiedInstaller,
}

#[derive(Debug, Clone)]
pub struct ImageType {
    pub name: &'static str,
    pub filename: &'static str,
    pub mime_type: &'static str,
    pub default_size: u64,
    pub platform: Platform,
    pub family: ImageFamily,
    pub kernel_options: Vec<String>,
    /// Base package set of the OS tree.
    pub packages: PackageSet,
    pub enabled_services: Vec<String>,
    /// The payload is an ostree commit or built from one.
    pub rpm_ostree: bool,
    /// The artifact is a bootable installer ISO.
    pub boot_iso: bool,
    /// The OS tree carries a kernel and bootloader.
    pub bootable: bool,
    pub build_pipelines: Vec<&'static str>,
    pub payload_pipelines: Vec<&'static str>,
    pub exports: Vec<&'static str>,
    /// Empty for image types that produce no disk.
    pub partition_tables: PartitionTemplates,
}

impl ImageType {
    /// Disk size for a request: 0 selects the default, and `vhd` sizes are
    /// rounded up to a whole MiB.
    pub fn size(&self, requested: u64) -> u64 {
        let mut size = requested;
        if self.name == "vhd" && size % MIB != 0 {
            size = size.div_ceil(MIB).saturating_mul(MIB);
        }
        if size == 0 {
            size = self.default_size;
        }
        size
    }

    pub fn boot_mode(&self) -> BootMode {
        self.platform.boot_mode()
    }

    /// Whether this image type produces a partitioned disk.
    pub fn has_disk(&self) -> bool {
        self.partition_tables.get(self.platform.arch).is_some()
    }

    pub fn partition_type(&self) -> Option<&'static str> {
        self.partition_tables
            .get(self.platform.arch)
            .map(|table| table.kind.as_str())
    }
}

fn words(options: &str) -> Vec<String> {
    options.split_whitespace().map(str::to_string).collect()
}

fn cloud_packages(extra: &[&str]) -> PackageSet {
    let mut set = PackageSet::new(
        "os",
        &[
            "@core",
            "chrony",
            "cloud-init",
            "cloud-utils-growpart",
            "dracut-config-generic",
            "gdisk",
            "redhat-release",
            "rsync",
            "tar",
            "yum-utils",
        ],
    )
    .with_exclude(&[
        "aic94xx-firmware",
        "alsa-firmware",
        "biosdevname",
        "iprutils",
        "plymouth",
    ]);
    set.include.extend(strings(extra));
    set
}

fn edge_commit_packages() -> PackageSet {
    PackageSet::new(
        "os",
        &[
            "@core",
            "redhat-release",
            "rpm-ostree",
            "NetworkManager",
            "clevis",
            "fdo-client",
            "greenboot",
            "ignition",
            "podman",
        ],
    )
}

fn live(
    platform: &Platform,
    name: &'static str,
    filename: &'static str,
    mime_type: &'static str,
    default_size: u64,
    finish: LiveFinish,
    payload_pipelines: &[&'static str],
) -> ImageType {
    ImageType {
        name,
        filename,
        mime_type,
        default_size,
        platform: platform.clone(),
        family: ImageFamily::Live(finish),
        kernel_options: Vec::new(),
        packages: cloud_packages(&[]),
        enabled_services: strings(&["sshd"]),
        rpm_ostree: false,
        boot_iso: false,
        bootable: true,
        build_pipelines: vec!["build"],
        payload_pipelines: payload_pipelines.to_vec(),
        exports: payload_pipelines.last().copied().into_iter().collect(),
        partition_tables: default_tables(),
    }
}

fn edge(
    platform: &Platform,
    name: &'static str,
    filename: &'static str,
    mime_type: &'static str,
    family: ImageFamily,
    payload_pipelines: &[&'static str],
) -> ImageType {
    let has_disk = matches!(
        family,
        ImageFamily::EdgeRawImage | ImageFamily::EdgeSimplifiedInstaller
    );
    ImageType {
        name,
        filename,
        mime_type,
        default_size: if has_disk { 10 * GIB } else { 0 },
        platform: platform.clone(),
        family,
        kernel_options: Vec::new(),
        packages: edge_commit_packages(),
        enabled_services: strings(&["NetworkManager.service", "greenboot-healthcheck.service"]),
        rpm_ostree: true,
        boot_iso: matches!(
            family,
            ImageFamily::EdgeInstaller | ImageFamily::EdgeSimplifiedInstaller
        ),
        bootable: true,
        build_pipelines: vec!["build"],
        payload_pipelines: payload_pipelines.to_vec(),
        exports: payload_pipelines.last().copied().into_iter().collect(),
        partition_tables: if has_disk {
            edge_tables()
        } else {
            PartitionTemplates::default()
        },
    }
}

/// Image types offered on `platform`'s architecture.
pub fn image_types(platform: &Platform) -> Vec<ImageType> {
    let arch = platform.arch;
    let mut types = Vec::new();

    let mut ami_options =
        "console=ttyS0,115200n8 console=tty0 net.ifnames=0 rd.blacklist=nouveau nvme_core.io_timeout=4294967295"
            .to_string();
    if arch == Arch::Aarch64 {
        ami_options.push_str(" iommu.strict=0");
    }
    let ec2_packages = cloud_packages(&["rh-amazon-rhui-client"]);
    let ec2_services = strings(&[
        "sshd",
        "cloud-init",
        "cloud-init-local",
        "cloud-config",
        "cloud-final",
        "tuned",
    ]);

    let mut ami = live(
        platform,
        "ami",
        "image.raw",
        "application/octet-stream",
        10 * GIB,
        LiveFinish::Raw,
        &["os", "image"],
    );
    ami.kernel_options = words(&ami_options);
    ami.enabled_services = ec2_services.clone();
    types.push(ami);

    let mut ec2 = live(
        platform,
        "ec2",
        "image.raw.xz",
        "application/xz",
        10 * GIB,
        LiveFinish::Xz,
        &["os", "image", "xz"],
    );
    ec2.kernel_options = words(&ami_options);
    ec2.packages = ec2_packages;
    ec2.enabled_services = ec2_services;
    types.push(ec2);

    let mut qcow2 = live(
        platform,
        "qcow2",
        "disk.qcow2",
        "application/x-qemu-disk",
        10 * GIB,
        LiveFinish::Qcow2,
        &["os", "image", "qcow2"],
    );
    qcow2.kernel_options = words("console=tty0 console=ttyS0,115200n8 no_timer_check net.ifnames=0");
    qcow2.packages = cloud_packages(&["qemu-guest-agent"]);
    types.push(qcow2);

    if arch == Arch::X86_64 {
        let mut gce = live(
            platform,
            "gce",
            "image.tar.gz",
            "application/gzip",
            20 * GIB,
            LiveFinish::Archive,
            &["os", "image", "archive"],
        );
        gce.kernel_options = words("net.ifnames=0 biosdevname=0 scsi_mod.use_blk_mq=Y console=ttyS0,38400n8d");
        gce.packages = cloud_packages(&["google-compute-engine", "google-osconfig-agent", "rng-tools"]);
        gce.enabled_services = strings(&["sshd", "rngd", "google-guest-agent"]);
        types.push(gce);

        let azure_options = "ro console=tty1 console=ttyS0 earlyprintk=ttyS0 rootdelay=300";
        let azure_packages = cloud_packages(&["WALinuxAgent", "hyperv-daemons", "lvm2"]);

        let mut vhd = live(
            platform,
            "vhd",
            "disk.vhd",
            "application/x-vhd",
            4 * GIB,
            LiveFinish::Vpc,
            &["os", "image", "vpc"],
        );
        vhd.kernel_options = words(azure_options);
        vhd.packages = azure_packages.clone();
        vhd.enabled_services = strings(&["sshd", "waagent"]);
        types.push(vhd);

        let mut azure = live(
            platform,
            "azure-rhui",
            "disk.vhd.xz",
            "application/xz",
            64 * GIB,
            LiveFinish::VpcXz,
            &["os", "image", "vpc", "xz"],
        );
        azure.kernel_options = words(azure_options);
        azure.packages = azure_packages;
        azure.packages.include.push("rhui-azure-rhel9".to_string());
        azure.enabled_services = strings(&["sshd", "waagent"]);
        azure.partition_tables = azure_rhui_tables();
        types.push(azure);
    }

    types.push(edge(
        platform,
        "edge-commit",
        "commit.tar",
        "application/x-tar",
        ImageFamily::EdgeCommit,
        &["os", "ostree-commit", "commit-archive"],
    ));
    types.push(edge(
        platform,
        "edge-container",
        "container.tar",
        "application/x-tar",
        ImageFamily::EdgeContainer,
        &["os", "ostree-commit", "container-tree", "container"],
    ));
    types.push(edge(
        platform,
        "edge-raw-image",
        "image.raw.xz",
        "application/xz",
        ImageFamily::EdgeRawImage,
        &["ostree-deployment", "image", "xz"],
    ));
    types.push(edge(
        platform,
        "edge-installer",
        "installer.iso",
        "application/x-iso9660-image",
        ImageFamily::EdgeInstaller,
        &["anaconda-tree", "rootfs-image", "efiboot-tree", "bootiso-tree", "bootiso"],
    ));
    let mut simplified = edge(
        platform,
        "edge-simplified-installer",
        "simplified-installer.iso",
        "application/x-iso9660-image",
        ImageFamily::EdgeSimplifiedInstaller,
        &[
            "ostree-deployment",
            "image",
            "xz",
            "coi-tree",
            "efiboot-tree",
            "bootiso-tree",
            "bootiso",
        ],
    );
    simplified.kernel_options = words("modprobe.blacklist=vc4");
    types.push(simplified);

    types
}

#[cfg(test)]
mod tests {
    use super::*;

    fn find(platform: &Platform, name: &str) -> ImageType {
        image_types(platform)
            .into_iter()
            .find(|t| t.name == name)
            .unwrap()
    }

    #[test]
    fn test_vhd_size_rounds_up_to_mib() {
        let vhd = find(&Platform::x86_64_hybrid("redhat"), "vhd");
        assert_eq!(vhd.size(0), 4 * GIB);
        assert_eq!(vhd.size(GIB + 1), GIB + MIB);
        assert_eq!(vhd.size(2 * GIB), 2 * GIB);

        let ami = find(&Platform::x86_64_hybrid("redhat"), "ami");
        assert_eq!(ami.size(GIB + 1), GIB + 1);
    }

    #[test]
    fn test_boot_mode_follows_platform() {
        assert_eq!(find(&Platform::x86_64_hybrid("redhat"), "qcow2").boot_mode(), BootMode::Hybrid);
        assert_eq!(find(&Platform::aarch64_uefi("redhat"), "qcow2").boot_mode(), BootMode::Uefi);
    }

    #[test]
    fn test_cloud_types_are_x86_64_only() {
        let aarch64: Vec<&str> = image_types(&Platform::aarch64_uefi("redhat"))
            .iter()
            .map(|t| t.name)
            .collect();
        assert!(!aarch64.contains(&"azure-rhui"));
        assert!(!aarch64.contains(&"gce"));
        assert!(aarch64.contains(&"edge-simplified-installer"));
    }

    #[test]
    fn test_ami_kernel_options_per_arch() {
        let x86 = find(&Platform::x86_64_hybrid("redhat"), "ami");
        let arm = find(&Platform::aarch64_uefi("redhat"), "ami");
        assert!(!x86.kernel_options.contains(&"iommu.strict=0".to_string()));
        assert!(arm.kernel_options.contains(&"iommu.strict=0".to_string()));
    }

    #[test]
    fn test_partition_types() {
        assert_eq!(find(&Platform::aarch64_uefi("redhat"), "edge-raw-image").partition_type(), Some("dos"));
        assert_eq!(find(&Platform::x86_64_hybrid("redhat"), "edge-raw-image").partition_type(), Some("gpt"));
        assert_eq!(find(&Platform::x86_64_hybrid("redhat"), "edge-commit").partition_type(), None);
    }
}
