//! Pipelines that repackage another pipeline's output: compression, tar
//! archives and disk format conversion.

use serde_json::{json, Map, Value};

use super::pipeline::{PipelineBehaviour, ResolvedInputs};
use super::stages::{file_input, tree_input, Stage};
use super::{Manifest, PipelineRef};

#[derive(Debug, Clone)]
pub struct XzCompression {
    /// Pipeline producing the file to compress.
    pub input: PipelineRef,
    pub filename: String,
}

impl PipelineBehaviour for XzCompression {
    fn inputs(&self) -> Vec<PipelineRef> {
        vec![self.input]
    }

    fn build_packages(&self, _manifest: &Manifest) -> Vec<String> {
        vec!["xz".to_string()]
    }

    fn stages(&self, manifest: &Manifest, _resolved: &ResolvedInputs) -> Vec<Stage> {
        let input = file_input(manifest.name_of(self.input), manifest.output_file(self.input));
        vec![Stage::new("org.osbuild.xz", json!({ "filename": self.filename }))
            .with_inputs(json!({ "file": input }))]
    }

    fn filename(&self) -> Option<&str> {
        Some(&self.filename)
    }
}

#[derive(Debug, Clone)]
pub struct TarArchive {
    /// Pipeline whose tree is archived.
    pub input: PipelineRef,
    pub filename: String,
    /// Archive format, e.g. `oldgnu`; the tool default when unset.
    pub format: Option<String>,
    /// Paths to include; the whole tree when empty.
    pub paths: Vec<String>,
}

impl TarArchive {
    pub fn new(input: PipelineRef, filename: &str) -> Self {
        Self {
            input,
            filename: filename.to_string(),
            format: None,
            paths: Vec::new(),
        }
    }
}

impl PipelineBehaviour for TarArchive {
    fn inputs(&self) -> Vec<PipelineRef> {
        vec![self.input]
    }

    fn build_packages(&self, _manifest: &Manifest) -> Vec<String> {
        vec!["tar".to_string()]
    }

    fn stages(&self, manifest: &Manifest, _resolved: &ResolvedInputs) -> Vec<Stage> {
        let mut options = Map::new();
        options.insert("filename".into(), json!(self.filename));
        if let Some(format) = &self.format {
            options.insert("format".into(), json!(format));
        }
        if !self.paths.is_empty() {
            options.insert("paths".into(), json!(self.paths));
        }
        vec![Stage::new("org.osbuild.tar", Value::Object(options))
            .with_inputs(json!({ "tree": tree_input(manifest.name_of(self.input)) }))]
    }

    fn filename(&self) -> Option<&str> {
        Some(&self.filename)
    }
}

/// Target format of a `qemu-img convert`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageFormat {
    Vpc { force_size: bool },
    Qcow2 { compat: String },
    Vmdk,
}

impl ImageFormat {
    fn options(&self) -> Value {
        match self {
            ImageFormat::Vpc { force_size } => json!({ "type": "vpc", "force_size": force_size }),
            ImageFormat::Qcow2 { compat } => json!({ "type": "qcow2", "compat": compat }),
            ImageFormat::Vmdk => json!({ "type": "vmdk", "subformat": "streamOptimized" }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImageConversion {
    /// Pipeline producing the raw disk image.
    pub input: PipelineRef,
    pub filename: String,
    pub format: ImageFormat,
}

impl PipelineBehaviour for ImageConversion {
    fn inputs(&self) -> Vec<PipelineRef> {
        vec![self.input]
    }

    fn build_packages(&self, _manifest: &Manifest) -> Vec<String> {
        vec!["qemu-img".to_string()]
    }

    fn stages(&self, manifest: &Manifest, _resolved: &ResolvedInputs) -> Vec<Stage> {
        let input = file_input(manifest.name_of(self.input), manifest.output_file(self.input));
        vec![Stage::new(
            "org.osbuild.qemu",
            json!({ "filename": self.filename, "format": self.format.options() }),
        )
        .with_inputs(json!({ "image": input }))]
    }

    fn filename(&self) -> Option<&str> {
        Some(&self.filename)
    }
}
