//! Request checks that depend on the image type.

use tracing::warn;

use super::imagetypes::ImageType;
use crate::config::ImageRequest;
use crate::error::PlanError;
use crate::pathpolicy::{clean_mountpoint, MOUNTPOINT_POLICIES};

const SIMPLIFIED_INSTALLER_CUSTOMIZATIONS: &[&str] =
    &["InstallationDevice", "FDO", "Ignition", "Kernel", "User", "Group"];
const INSTALLER_CUSTOMIZATIONS: &[&str] = &["User", "Group"];
const RAW_IMAGE_CUSTOMIZATIONS: &[&str] = &["Ignition", "Kernel", "User", "Group"];

/// Validate `request` against `image_type`.
///
/// Returns deprecation warnings on success. Every warning is also logged.
pub fn check_options(image_type: &ImageType, request: &ImageRequest) -> Result<Vec<String>, PlanError> {
    let name = image_type.name;
    let violation = |reason: String| PlanError::policy(name, reason);
    let blueprint = &request.blueprint;
    let customizations = blueprint.customizations();
    let ostree_url = request.ostree.as_ref().and_then(|o| o.url.as_deref());
    let mut warnings = Vec::new();

    if !blueprint.containers.is_empty()
        && image_type.rpm_ostree
        && name != "edge-commit"
        && name != "edge-container"
    {
        return Err(violation("embedding containers is not supported for this image type".into()));
    }

    if image_type.boot_iso && image_type.rpm_ostree {
        if ostree_url.is_none() {
            return Err(violation(
                "boot ISO image types require a URL from which to retrieve the ostree commit".into(),
            ));
        }

        if name == "edge-simplified-installer" {
            customizations
                .check_allowed(SIMPLIFIED_INSTALLER_CUSTOMIZATIONS)
                .map_err(&violation)?;
            if customizations
                .installation_device
                .as_deref()
                .is_none_or(str::is_empty)
            {
                return Err(violation("an installation device is required".into()));
            }

            if let Some(fdo) = &customizations.fdo {
                let set = |value: &Option<String>| value.as_deref().is_some_and(|v| !v.is_empty());
                if !set(&fdo.manufacturing_server_url) {
                    return Err(violation("FDO requires a manufacturing server URL".into()));
                }
                let diun = [
                    &fdo.diun_pub_key_hash,
                    &fdo.diun_pub_key_insecure,
                    &fdo.diun_pub_key_root_certs,
                ]
                .into_iter()
                .filter(|value| set(*value))
                .count();
                if diun != 1 {
                    return Err(violation(
                        "FDO requires exactly one of diun_pub_key_hash, diun_pub_key_insecure, diun_pub_key_root_certs"
                            .into(),
                    ));
                }
            }

            if let Some(ignition) = &customizations.ignition {
                if ignition.embedded.is_some() && ignition.firstboot.is_some() {
                    return Err(violation(
                        "ignition cannot be both embedded and fetched at first boot".into(),
                    ));
                }
                if ignition.firstboot.as_ref().is_some_and(|f| f.url.is_empty()) {
                    return Err(violation("ignition firstboot requires a provisioning URL".into()));
                }
            }
        } else if name == "edge-installer" {
            customizations
                .check_allowed(INSTALLER_CUSTOMIZATIONS)
                .map_err(&violation)?;
        }
    }

    if name == "edge-raw-image" {
        if ostree_url.is_none() {
            return Err(violation(
                "raw ostree images require a URL from which to retrieve the ostree commit".into(),
            ));
        }
        customizations
            .check_allowed(RAW_IMAGE_CUSTOMIZATIONS)
            .map_err(&violation)?;
    }

    if name == "edge-commit" || name == "edge-container" {
        let deprecated = [
            ("user", !customizations.users.is_empty()),
            ("group", !customizations.groups.is_empty()),
        ];
        for (kind, set) in deprecated {
            if set {
                let message = format!(
                    "{} customizations on image type '{}' are deprecated and will be removed",
                    kind, name
                );
                warn!(image_type = name, "{}", message);
                warnings.push(message);
            }
        }
    }

    if customizations.kernel_append().is_some()
        && image_type.rpm_ostree
        && name != "edge-raw-image"
        && name != "edge-simplified-installer"
    {
        return Err(violation(
            "kernel boot parameter customizations are not supported for ostree types".into(),
        ));
    }

    if !customizations.filesystems.is_empty() && image_type.rpm_ostree {
        return Err(violation("custom mountpoints are not supported for ostree types".into()));
    }

    for filesystem in &customizations.filesystems {
        let path = clean_mountpoint(&filesystem.mountpoint).map_err(&violation)?;
        MOUNTPOINT_POLICIES.check(&path).map_err(&violation)?;
    }

    Ok(warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blueprint::{
        Blueprint, Customizations, EmbeddedIgnition, FdoCustomization, FilesystemCustomization,
        FirstbootIgnition, IgnitionCustomization, KernelCustomization, UserCustomization,
    };
    use crate::config::OstreeOptions;
    use crate::container::ContainerSource;
    use crate::distro::imagetypes::image_types;
    use crate::platform::Platform;

    fn image_type(name: &str) -> ImageType {
        image_types(&Platform::x86_64_hybrid("redhat"))
            .into_iter()
            .find(|t| t.name == name)
            .unwrap()
    }

    fn request(customizations: Customizations, url: Option<&str>) -> ImageRequest {
        ImageRequest {
            arch: "x86_64".into(),
            image_type: String::new(),
            seed: 0,
            size: 0,
            ostree: url.map(|url| OstreeOptions {
                url: Some(url.to_string()),
                ..OstreeOptions::default()
            }),
            repositories: Vec::new(),
            blueprint: Blueprint {
                customizations: Some(customizations),
                ..Blueprint::default()
            },
        }
    }

    fn check(name: &str, customizations: Customizations, url: Option<&str>) -> Result<Vec<String>, PlanError> {
        check_options(&image_type(name), &request(customizations, url))
    }

    fn reason(result: Result<Vec<String>, PlanError>) -> String {
        match result {
            Err(PlanError::PolicyViolation { reason, .. }) => reason,
            other => panic!("expected a policy violation, got {:?}", other),
        }
    }

    fn user() -> UserCustomization {
        UserCustomization {
            name: "admin".into(),
            ..UserCustomization::default()
        }
    }

    const URL: Option<&str> = Some("https://ostree.example.com/repo");

    #[test]
    fn test_containers_only_on_commits() {
        let mut req = request(Customizations::default(), URL);
        req.blueprint.containers = vec![ContainerSource {
            source: "registry.example.com/app:latest".into(),
            name: None,
            tls_verify: None,
        }];
        assert!(check_options(&image_type("edge-commit"), &req).is_ok());
        assert!(check_options(&image_type("qcow2"), &req).is_ok());
        assert!(check_options(&image_type("edge-raw-image"), &req).is_err());
    }

    #[test]
    fn test_boot_iso_requires_url() {
        let c = Customizations {
            installation_device: Some("/dev/vda".into()),
            ..Customizations::default()
        };
        assert!(reason(check("edge-simplified-installer", c.clone(), None)).contains("URL"));
        assert!(check("edge-simplified-installer", c, URL).is_ok());
        assert!(reason(check("edge-installer", Customizations::default(), None)).contains("URL"));
    }

    #[test]
    fn test_simplified_installer_requires_device() {
        let err = reason(check("edge-simplified-installer", Customizations::default(), URL));
        assert!(err.contains("installation device"));
    }

    #[test]
    fn test_simplified_installer_rejects_hostname() {
        let c = Customizations {
            installation_device: Some("/dev/vda".into()),
            hostname: Some("edge".into()),
            ..Customizations::default()
        };
        assert!(reason(check("edge-simplified-installer", c, URL)).contains("Hostname"));
    }

    #[test]
    fn test_fdo_needs_exactly_one_diun_option() {
        let with_fdo = |fdo: FdoCustomization| Customizations {
            installation_device: Some("/dev/vda".into()),
            fdo: Some(fdo),
            ..Customizations::default()
        };
        let server = Some("http://fdo.example.com:8080".to_string());

        let none = FdoCustomization {
            manufacturing_server_url: server.clone(),
            ..FdoCustomization::default()
        };
        assert!(reason(check("edge-simplified-installer", with_fdo(none), URL)).contains("exactly one"));

        let two = FdoCustomization {
            manufacturing_server_url: server.clone(),
            diun_pub_key_insecure: Some("true".into()),
            diun_pub_key_hash: Some("sha256:abc".into()),
            ..FdoCustomization::default()
        };
        assert!(check("edge-simplified-installer", with_fdo(two), URL).is_err());

        let one = FdoCustomization {
            manufacturing_server_url: server,
            diun_pub_key_insecure: Some("true".into()),
            ..FdoCustomization::default()
        };
        assert!(check("edge-simplified-installer", with_fdo(one), URL).is_ok());

        let no_server = FdoCustomization {
            diun_pub_key_insecure: Some("true".into()),
            ..FdoCustomization::default()
        };
        assert!(reason(check("edge-simplified-installer", with_fdo(no_server), URL)).contains("manufacturing server"));
    }

    #[test]
    fn test_ignition_embedded_and_firstboot_conflict() {
        let with_ignition = |ignition: IgnitionCustomization| Customizations {
            installation_device: Some("/dev/vda".into()),
            ignition: Some(ignition),
            ..Customizations::default()
        };
        let both = IgnitionCustomization {
            embedded: Some(EmbeddedIgnition { config: "e30=".into() }),
            firstboot: Some(FirstbootIgnition { url: "http://ign.example.com".into() }),
        };
        assert!(check("edge-simplified-installer", with_ignition(both), URL).is_err());

        let empty_url = IgnitionCustomization {
            embedded: None,
            firstboot: Some(FirstbootIgnition { url: String::new() }),
        };
        assert!(reason(check("edge-simplified-installer", with_ignition(empty_url), URL)).contains("provisioning URL"));
    }

    #[test]
    fn test_installer_allows_only_users_and_groups() {
        let users = Customizations {
            users: vec![user()],
            ..Customizations::default()
        };
        assert!(check("edge-installer", users, URL).is_ok());
        let kernel = Customizations {
            kernel: Some(KernelCustomization {
                name: Some("kernel-rt".into()),
                append: String::new(),
            }),
            ..Customizations::default()
        };
        assert!(check("edge-installer", kernel, URL).is_err());
    }

    #[test]
    fn test_raw_image_requires_url_and_limits_customizations() {
        assert!(reason(check("edge-raw-image", Customizations::default(), None)).contains("URL"));
        let hostname = Customizations {
            hostname: Some("edge".into()),
            ..Customizations::default()
        };
        assert!(check("edge-raw-image", hostname, URL).is_err());
    }

    #[test]
    fn test_commit_users_are_deprecated() {
        let c = Customizations {
            users: vec![user()],
            groups: vec![Default::default()],
            ..Customizations::default()
        };
        let warnings = check("edge-commit", c, None).unwrap();
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("deprecated"));
        assert!(check("qcow2", Customizations::default(), None).unwrap().is_empty());
    }

    #[test]
    fn test_kernel_append_on_ostree_types() {
        let c = Customizations {
            kernel: Some(KernelCustomization {
                name: None,
                append: "quiet".into(),
            }),
            ..Customizations::default()
        };
        assert!(check("edge-commit", c.clone(), None).is_err());
        assert!(check("edge-raw-image", c.clone(), URL).is_ok());
        assert!(check("qcow2", c, None).is_ok());
    }

    #[test]
    fn test_mountpoints() {
        let fs = |mountpoint: &str| Customizations {
            filesystems: vec![FilesystemCustomization {
                mountpoint: mountpoint.into(),
                minsize: 0,
            }],
            ..Customizations::default()
        };
        assert!(reason(check("edge-commit", fs("/var"), None)).contains("ostree"));
        assert!(check("qcow2", fs("/var"), None).is_ok());
        assert!(check("qcow2", fs("/var/run"), None).is_err());
        assert!(check("qcow2", fs("/etc"), None).is_err());
        assert!(check("qcow2", fs("var"), None).is_err());
    }
}
