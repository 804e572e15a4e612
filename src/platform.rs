//! Target architectures and their boot platforms.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Arch {
    X86_64,
    Aarch64,
    Ppc64le,
    S390x,
}

impl Arch {
    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::X86_64 => "x86_64",
            Arch::Aarch64 => "aarch64",
            Arch::Ppc64le => "ppc64le",
            Arch::S390x => "s390x",
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Arch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "x86_64" => Ok(Arch::X86_64),
            "aarch64" => Ok(Arch::Aarch64),
            "ppc64le" => Ok(Arch::Ppc64le),
            "s390x" => Ok(Arch::S390x),
            other => Err(format!("unknown architecture '{}'", other)),
        }
    }
}

/// How an image boots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootMode {
    None,
    Legacy,
    Uefi,
    Hybrid,
}

/// Bootloader facts for an architecture: firmware flavours, packages that
/// must be installed into the OS tree and tools the build root needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub arch: Arch,
    /// EFI vendor directory (`EFI/<vendor>`), when UEFI boot is supported.
    pub uefi_vendor: Option<String>,
    /// GRUB BIOS platform (`i386-pc`), when legacy boot is supported.
    pub bios_platform: Option<String>,
    pub packages: Vec<String>,
    pub build_packages: Vec<String>,
}

impl Platform {
    pub fn x86_64_hybrid(vendor: &str) -> Self {
        Self {
            arch: Arch::X86_64,
            uefi_vendor: Some(vendor.to_string()),
            bios_platform: Some("i386-pc".to_string()),
            packages: strings(&[
                "dracut-config-generic",
                "efibootmgr",
                "grub2-efi-x64",
                "grub2-pc",
                "shim-x64",
            ]),
            build_packages: strings(&["grub2-pc"]),
        }
    }

    pub fn aarch64_uefi(vendor: &str) -> Self {
        Self {
            arch: Arch::Aarch64,
            uefi_vendor: Some(vendor.to_string()),
            bios_platform: None,
            packages: strings(&[
                "dracut-config-generic",
                "efibootmgr",
                "grub2-efi-aa64",
                "grub2-tools",
                "shim-aa64",
            ]),
            build_packages: Vec::new(),
        }
    }

    pub fn boot_mode(&self) -> BootMode {
        match (self.uefi_vendor.is_some(), self.bios_platform.is_some()) {
            (true, true) => BootMode::Hybrid,
            (true, false) => BootMode::Uefi,
            (false, true) => BootMode::Legacy,
            (false, false) => BootMode::None,
        }
    }

    /// EFI architecture names used by the ISO boot tree.
    pub fn efi_arch(&self) -> &'static str {
        match self.arch {
            Arch::X86_64 => "X64",
            Arch::Aarch64 => "AA64",
            Arch::Ppc64le | Arch::S390x => "",
        }
    }
}

pub(crate) fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
