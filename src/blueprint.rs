//! User-facing image customizations.
//!
//! A blueprint names extra packages, containers to embed and a set of
//! customizations. Image types accept only a subset of customizations;
//! [`Customizations::check_allowed`] enforces that.

use serde::{Deserialize, Deserializer, Serialize};

use crate::common::parse_size;
use crate::container::ContainerSource;
use crate::disk::MountpointRequest;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Blueprint {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub packages: Vec<String>,
    #[serde(default)]
    pub containers: Vec<ContainerSource>,
    #[serde(default)]
    pub customizations: Option<Customizations>,
}

impl Blueprint {
    /// Customizations, or an empty set when the blueprint has none.
    pub fn customizations(&self) -> Customizations {
        self.customizations.clone().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Customizations {
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub kernel: Option<KernelCustomization>,
    #[serde(default, rename = "user")]
    pub users: Vec<UserCustomization>,
    #[serde(default, rename = "group")]
    pub groups: Vec<GroupCustomization>,
    #[serde(default)]
    pub services: Option<ServicesCustomization>,
    #[serde(default, rename = "filesystem")]
    pub filesystems: Vec<FilesystemCustomization>,
    #[serde(default)]
    pub installation_device: Option<String>,
    #[serde(default)]
    pub fdo: Option<FdoCustomization>,
    #[serde(default)]
    pub ignition: Option<IgnitionCustomization>,
    #[serde(default)]
    pub locale: Option<LocaleCustomization>,
    #[serde(default)]
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KernelCustomization {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub append: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserCustomization {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gid: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupCustomization {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gid: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServicesCustomization {
    #[serde(default)]
    pub enabled: Vec<String>,
    #[serde(default)]
    pub disabled: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilesystemCustomization {
    pub mountpoint: String,
    #[serde(deserialize_with = "deserialize_size")]
    pub minsize: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FdoCustomization {
    #[serde(default)]
    pub manufacturing_server_url: Option<String>,
    #[serde(default)]
    pub diun_pub_key_insecure: Option<String>,
    #[serde(default)]
    pub diun_pub_key_hash: Option<String>,
    #[serde(default)]
    pub diun_pub_key_root_certs: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IgnitionCustomization {
    #[serde(default)]
    pub embedded: Option<EmbeddedIgnition>,
    #[serde(default)]
    pub firstboot: Option<FirstbootIgnition>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmbeddedIgnition {
    pub config: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FirstbootIgnition {
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocaleCustomization {
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub keyboard: Option<String>,
}

pub(crate) fn deserialize_size<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum SizeValue {
        Bytes(u64),
        Text(String),
    }

    match SizeValue::deserialize(deserializer)? {
        SizeValue::Bytes(bytes) => Ok(bytes),
        SizeValue::Text(text) => parse_size(&text).map_err(serde::de::Error::custom),
    }
}

impl Customizations {
    /// Names of the customization sections that are set.
    pub fn set_names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.hostname.is_some() {
            names.push("Hostname");
        }
        if self.kernel.is_some() {
            names.push("Kernel");
        }
        if !self.users.is_empty() {
            names.push("User");
        }
        if !self.groups.is_empty() {
            names.push("Group");
        }
        if self.services.is_some() {
            names.push("Services");
        }
        if !self.filesystems.is_empty() {
            names.push("Filesystem");
        }
        if self.installation_device.is_some() {
            names.push("InstallationDevice");
        }
        if self.fdo.is_some() {
            names.push("FDO");
        }
        if self.ignition.is_some() {
            names.push("Ignition");
        }
        if self.locale.is_some() {
            names.push("Locale");
        }
        if self.timezone.is_some() {
            names.push("Timezone");
        }
        names
    }

    /// Fail when a customization outside `allowed` is set.
    pub fn check_allowed(&self, allowed: &[&str]) -> Result<(), String> {
        let rejected: Vec<&str> = self
            .set_names()
            .into_iter()
            .filter(|name| !allowed.contains(name))
            .collect();
        if rejected.is_empty() {
            Ok(())
        } else {
            Err(format!(
                "customizations not supported: {} (supported: {})",
                rejected.join(", "),
                allowed.join(", ")
            ))
        }
    }

    pub fn kernel_append(&self) -> Option<&str> {
        self.kernel
            .as_ref()
            .map(|kernel| kernel.append.trim())
            .filter(|append| !append.is_empty())
    }

    pub fn kernel_name(&self) -> Option<&str> {
        self.kernel.as_ref().and_then(|kernel| kernel.name.as_deref())
    }

    pub fn mountpoint_requests(&self) -> Vec<MountpointRequest> {
        self.filesystems
            .iter()
            .map(|fs| MountpointRequest::new(&fs.mountpoint, fs.minsize))
            .collect()
    }
}
