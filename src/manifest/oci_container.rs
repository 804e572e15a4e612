//! OCI archive wrapping a tree, optionally with a payload layer.

use serde_json::{json, Map, Value};

use super::pipeline::{PipelineBehaviour, ResolvedInputs};
use super::stages::{tree_input, Stage};
use super::{Manifest, PipelineRef};
use crate::platform::Arch;

#[derive(Debug, Clone)]
pub struct OciContainer {
    /// Base tree of the image.
    pub tree: PipelineRef,
    /// Tree added as a separate layer on top of the base.
    pub layer: Option<PipelineRef>,
    pub filename: String,
    pub arch: Arch,
    pub cmd: Vec<String>,
    pub exposed_ports: Vec<String>,
}

impl PipelineBehaviour for OciContainer {
    fn inputs(&self) -> Vec<PipelineRef> {
        self.layer.iter().copied().chain([self.tree]).collect()
    }

    fn build_packages(&self, _manifest: &Manifest) -> Vec<String> {
        vec!["tar".to_string()]
    }

    fn stages(&self, manifest: &Manifest, _resolved: &ResolvedInputs) -> Vec<Stage> {
        let mut config = Map::new();
        if !self.cmd.is_empty() {
            config.insert("Cmd".into(), json!(self.cmd));
        }
        if !self.exposed_ports.is_empty() {
            config.insert("ExposedPorts".into(), json!(self.exposed_ports));
        }

        let mut inputs = Map::new();
        inputs.insert("base".into(), tree_input(manifest.name_of(self.tree)));
        if let Some(layer) = self.layer {
            inputs.insert("layer.1".into(), tree_input(manifest.name_of(layer)));
        }

        vec![Stage::new(
            "org.osbuild.oci-archive",
            json!({
                "architecture": oci_arch(self.arch),
                "filename": self.filename,
                "config": Value::Object(config),
            }),
        )
        .with_inputs(Value::Object(inputs))]
    }

    fn filename(&self) -> Option<&str> {
        Some(&self.filename)
    }
}

/// GOARCH-style name used in OCI image configs.
fn oci_arch(arch: Arch) -> &'static str {
    match arch {
        Arch::X86_64 => "amd64",
        Arch::Aarch64 => "arm64",
        Arch::Ppc64le => "ppc64le",
        Arch::S390x => "s390x",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::build::BuildRoot;
    use crate::manifest::os::{OsCustomizations, OsTree};
    use crate::platform::Platform;
    use crate::resolve::fakes;
    use crate::rpmmd::PackageSet;

    #[test]
    fn test_layered_archive() {
        let mut m = Manifest::new();
        let build = m.add("build", None, BuildRoot::new("org.osbuild.rhel90", Vec::new()));
        let tree = |packages: &[&str]| OsTree {
            platform: Platform::aarch64_uefi("redhat"),
            repos: Vec::new(),
            packages: PackageSet::new("os", packages),
            blueprint_packages: Vec::new(),
            containers: Vec::new(),
            customizations: OsCustomizations::default(),
            partition_table: None,
            ostree_ref: None,
            bootable: false,
        };
        let base = m.add("container-tree", Some(build), tree(&["nginx"]));
        let layer = m.add("os", Some(build), tree(&["@core"]));
        m.add(
            "container",
            Some(build),
            OciContainer {
                tree: base,
                layer: Some(layer),
                filename: "container.tar".into(),
                arch: Arch::Aarch64,
                cmd: vec!["nginx".into(), "-c".into(), "/etc/nginx.conf".into()],
                exposed_ports: vec!["8080".into()],
            },
        );
        let content = m.collect_content().clone();
        let resolved = fakes::resolve(&content, "aarch64").unwrap();
        let doc = m.serialize(&resolved).unwrap();
        let stage = &doc.pipeline("container").unwrap().stages[0];
        assert_eq!(stage.option("architecture").unwrap(), "arm64");
        assert_eq!(stage.option("config").unwrap()["ExposedPorts"][0], "8080");
        let inputs = stage.inputs.as_ref().unwrap();
        assert_eq!(inputs["base"]["references"][0], "name:container-tree");
        assert_eq!(inputs["layer.1"]["references"][0], "name:os");
    }
}
