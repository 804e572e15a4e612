//! Ostree image kinds: commits, commit containers and deployed disks.

use crate::blueprint::{GroupCustomization, UserCustomization};
use crate::disk::PartitionTable;
use crate::manifest::archive::{TarArchive, XzCompression};
use crate::manifest::oci_container::OciContainer;
use crate::manifest::os::{OsCustomizations, OsTree};
use crate::manifest::ostree_commit::OstreeCommit;
use crate::manifest::ostree_deployment::OstreeDeployment;
use crate::manifest::raw_image::RawImage;
use crate::manifest::{Manifest, PipelineRef};
use crate::ostree::{CommitSource, Remote};
use crate::platform::{strings, Platform};
use crate::rpmmd::PackageSet;

/// OS tree committed to a repository: `os → ostree-commit`.
fn commit_pipelines(
    manifest: &mut Manifest,
    build: PipelineRef,
    os: &OsTree,
    reference: &str,
    os_version: &str,
    parent: Option<&CommitSource>,
) -> PipelineRef {
    let mut os = os.clone();
    os.ostree_ref = Some(reference.to_string());
    let os = manifest.add("os", Some(build), os);
    manifest.set_checkpoint(os);
    manifest.add(
        "ostree-commit",
        Some(build),
        OstreeCommit {
            tree: os,
            reference: reference.to_string(),
            os_version: os_version.to_string(),
            parent: parent.cloned(),
        },
    )
}

/// An ostree repository with one commit, shipped as a tarball.
#[derive(Debug, Clone)]
pub struct OstreeArchive {
    pub os: OsTree,
    pub reference: String,
    pub os_version: String,
    pub parent: Option<CommitSource>,
    pub filename: String,
}

impl OstreeArchive {
    pub(super) fn instantiate(&self, manifest: &mut Manifest, build: PipelineRef) -> PipelineRef {
        let commit = commit_pipelines(
            manifest,
            build,
            &self.os,
            &self.reference,
            &self.os_version,
            self.parent.as_ref(),
        );
        manifest.add("commit-archive", Some(build), TarArchive::new(commit, &self.filename))
    }
}

/// An ostree commit served over HTTP from an OCI container.
#[derive(Debug, Clone)]
pub struct OstreeContainer {
    pub os: OsTree,
    pub reference: String,
    pub os_version: String,
    pub parent: Option<CommitSource>,
    /// Packages of the serving container, e.g. a web server.
    pub container_packages: Vec<String>,
    pub cmd: Vec<String>,
    pub exposed_ports: Vec<String>,
    pub filename: String,
}

impl OstreeContainer {
    pub(super) fn instantiate(&self, manifest: &mut Manifest, build: PipelineRef) -> PipelineRef {
        let commit = commit_pipelines(
            manifest,
            build,
            &self.os,
            &self.reference,
            &self.os_version,
            self.parent.as_ref(),
        );
        let serving_tree = OsTree {
            platform: self.os.platform.clone(),
            repos: self.os.repos.clone(),
            packages: PackageSet {
                name: "container".to_string(),
                include: self.container_packages.clone(),
                exclude: Vec::new(),
                repositories: Vec::new(),
            },
            blueprint_packages: Vec::new(),
            containers: Vec::new(),
            customizations: OsCustomizations::default(),
            partition_table: None,
            ostree_ref: None,
            bootable: false,
        };
        let tree = manifest.add("container-tree", Some(build), serving_tree);
        manifest.add(
            "container",
            Some(build),
            OciContainer {
                tree,
                layer: Some(commit),
                filename: self.filename.clone(),
                arch: self.os.platform.arch,
                cmd: self.cmd.clone(),
                exposed_ports: self.exposed_ports.clone(),
            },
        )
    }
}

/// A disk with an ostree commit deployed on it, xz-compressed.
#[derive(Debug, Clone)]
pub struct OstreeRawImage {
    pub platform: Platform,
    pub commit: CommitSource,
    pub remote: Remote,
    pub os_name: String,
    pub partition_table: PartitionTable,
    pub kernel_options: Vec<String>,
    pub users: Vec<UserCustomization>,
    pub groups: Vec<GroupCustomization>,
    pub ignition: bool,
    /// Name of the compressed artifact; the raw disk drops the `.xz`.
    pub filename: String,
}

impl OstreeRawImage {
    pub(super) fn instantiate(&self, manifest: &mut Manifest, build: PipelineRef) -> PipelineRef {
        let mut deployment = OstreeDeployment::new(
            self.platform.clone(),
            self.commit.clone(),
            self.remote.clone(),
            self.partition_table.clone(),
        );
        deployment.os_name = self.os_name.clone();
        deployment.kernel_options = self.kernel_options.clone();
        deployment.users = self.users.clone();
        deployment.groups = self.groups.clone();
        deployment.ignition = self.ignition;
        let deployment = manifest.add("ostree-deployment", Some(build), deployment);

        let raw_filename = self
            .filename
            .strip_suffix(".xz")
            .unwrap_or(&self.filename)
            .to_string();
        let image = manifest.add(
            "image",
            Some(build),
            RawImage {
                tree: deployment,
                partition_table: self.partition_table.clone(),
                platform: self.platform.clone(),
                filename: raw_filename,
            },
        );
        manifest.add(
            "xz",
            Some(build),
            XzCompression {
                input: image,
                filename: self.filename.clone(),
            },
        )
    }
}

/// Serving container defaults: nginx publishing the repository on 8080.
pub fn nginx_container_defaults() -> (Vec<String>, Vec<String>, Vec<String>) {
    (
        strings(&["nginx"]),
        strings(&["nginx", "-c", "/etc/nginx.conf"]),
        strings(&["8080/tcp"]),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{testing, ImageKind};
    use crate::resolve::fakes;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn edge_ref() -> String {
        "rhel/9/x86_64/edge".to_string()
    }

    #[test]
    fn test_container_layers_commit_on_serving_tree() {
        let (packages, cmd, ports) = nginx_container_defaults();
        let kind = ImageKind::OstreeContainer(OstreeContainer {
            os: testing::os(None),
            reference: edge_ref(),
            os_version: "9.4".into(),
            parent: None,
            container_packages: packages,
            cmd,
            exposed_ports: ports,
            filename: "container.tar".into(),
        });
        let mut m = Manifest::new();
        let last = kind.instantiate(&mut m, "org.osbuild.rhel90", &[], &mut StdRng::seed_from_u64(0));
        assert_eq!(m.name_of(last), "container");
        let names: Vec<&str> = m.pipelines().iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["build", "os", "ostree-commit", "container-tree", "container"]);

        let content = m.collect_content().clone();
        assert!(content.package_sets["container-tree"][0].include.contains(&"nginx".to_string()));
        let resolved = fakes::resolve(&content, "x86_64").unwrap();
        let doc = m.serialize(&resolved).unwrap();
        let os = &doc.pipeline("os").unwrap().stages;
        assert_eq!(os.last().unwrap().kind, "org.osbuild.ostree.preptree");
    }

    #[test]
    fn test_archive_with_parent_requires_commit() {
        let parent = CommitSource {
            reference: edge_ref(),
            url: "https://ostree.example.com/repo".into(),
        };
        let kind = ImageKind::OstreeArchive(OstreeArchive {
            os: testing::os(None),
            reference: edge_ref(),
            os_version: "9.4".into(),
            parent: Some(parent.clone()),
            filename: "commit.tar".into(),
        });
        let mut m = Manifest::new();
        kind.instantiate(&mut m, "org.osbuild.rhel90", &[], &mut StdRng::seed_from_u64(0));
        let content = m.collect_content();
        assert_eq!(content.ostree_commits["ostree-commit"], vec![parent]);
    }

    #[test]
    fn test_raw_image_deploys_commit() {
        let kind = ImageKind::OstreeRawImage(OstreeRawImage {
            platform: Platform::x86_64_hybrid("redhat"),
            commit: CommitSource {
                reference: edge_ref(),
                url: "https://ostree.example.com/repo".into(),
            },
            remote: Remote {
                name: "rhel-edge".into(),
                url: "https://ostree.example.com/repo".into(),
                content_url: None,
                gpg_key_paths: Vec::new(),
            },
            os_name: "redhat".into(),
            partition_table: testing::table(),
            kernel_options: Vec::new(),
            users: Vec::new(),
            groups: Vec::new(),
            ignition: false,
            filename: "image.raw.xz".into(),
        });
        let mut m = Manifest::new();
        let last = kind.instantiate(&mut m, "org.osbuild.rhel90", &[], &mut StdRng::seed_from_u64(0));
        assert_eq!(m.output_file(last), "image.raw.xz");
        let image = m.find("image").unwrap();
        assert_eq!(m.output_file(image), "image.raw");
        assert!(m.find("os").is_none());
    }
}
