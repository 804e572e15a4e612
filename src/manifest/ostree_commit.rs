//! Commit an OS tree into a fresh ostree repository.

use serde_json::{json, Map, Value};

use super::pipeline::{PipelineBehaviour, ResolvedInputs};
use super::stages::{tree_input, Stage};
use super::{Manifest, PipelineRef};
use crate::error::PlanError;
use crate::ostree::CommitSource;

pub const REPO_PATH: &str = "/repo";

#[derive(Debug, Clone)]
pub struct OstreeCommit {
    /// OS tree prepared with `ostree.preptree`.
    pub tree: PipelineRef,
    pub reference: String,
    pub os_version: String,
    /// Existing commit the new one is stacked on.
    pub parent: Option<CommitSource>,
}

impl PipelineBehaviour for OstreeCommit {
    fn inputs(&self) -> Vec<PipelineRef> {
        vec![self.tree]
    }

    fn build_packages(&self, _manifest: &Manifest) -> Vec<String> {
        vec!["rpm-ostree".to_string()]
    }

    fn commit_sources(&self) -> Vec<CommitSource> {
        self.parent.iter().cloned().collect()
    }

    fn resolve(&self, pipeline: &str, inputs: &mut ResolvedInputs) -> Result<(), PlanError> {
        if let Some(parent) = &self.parent {
            if inputs.commits.is_empty() {
                return Err(PlanError::missing(
                    pipeline,
                    format!("parent commit '{}'", parent.reference),
                ));
            }
        }
        Ok(())
    }

    fn stages(&self, manifest: &Manifest, resolved: &ResolvedInputs) -> Vec<Stage> {
        let mut options = Map::new();
        options.insert("ref".into(), json!(self.reference));
        options.insert("os_version".into(), json!(self.os_version));
        if let Some(parent) = resolved.commits.first() {
            options.insert("parent".into(), json!(parent.checksum));
        }
        vec![
            Stage::new("org.osbuild.ostree.init", json!({ "path": REPO_PATH })),
            Stage::new("org.osbuild.ostree.commit", Value::Object(options))
                .with_inputs(json!({ "tree": tree_input(manifest.name_of(self.tree)) })),
        ]
    }
}
