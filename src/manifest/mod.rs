//! Pipeline graph and manifest assembly.
//!
//! A [`Manifest`] exclusively owns its [`Pipeline`] nodes. Nodes reference
//! each other through [`PipelineRef`] handles, which carry the id of the
//! manifest they belong to, so wiring a node from one manifest into another
//! is caught the moment it happens.
//!
//! Assembly runs in two phases:
//!
//! 1. Structural: pipelines are attached, then [`Manifest::collect_content`]
//!    gathers what has to be resolved externally and freezes the graph.
//! 2. Resolution: [`Manifest::serialize`] injects the resolved content into
//!    every node in dependency order, emits the document and resets the
//!    nodes so the manifest can be serialized again.

pub mod archive;
pub mod build;
pub mod document;
pub mod installer;
pub mod iso;
pub mod oci_container;
pub mod os;
pub mod ostree_commit;
pub mod ostree_deployment;
pub mod pipeline;
pub mod raw_image;
pub mod stages;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::container::ContainerSource;
use crate::error::PlanError;
use crate::ostree::CommitSource;
use crate::resolve::ResolvedContent;
use crate::rpmmd::PackageSet;

pub use document::{ManifestDocument, PipelineDocument, Sources};
pub use pipeline::{NodeState, Pipeline, PipelineBehaviour, PipelineKind, ResolvedInputs};
pub use stages::Stage;

static NEXT_MANIFEST_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ManifestId(u64);

impl fmt::Display for ManifestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "manifest#{}", self.0)
    }
}

/// Non-owning handle to a pipeline inside a manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineRef {
    manifest: ManifestId,
    index: usize,
}

impl PipelineRef {
    pub fn manifest(&self) -> ManifestId {
        self.manifest
    }
}

/// Requirements still to be resolved, keyed by pipeline name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManifestContent {
    #[serde(default)]
    pub package_sets: BTreeMap<String, Vec<PackageSet>>,
    #[serde(default)]
    pub containers: BTreeMap<String, Vec<ContainerSource>>,
    #[serde(default)]
    pub ostree_commits: BTreeMap<String, Vec<CommitSource>>,
}

#[derive(Debug)]
pub struct Manifest {
    id: ManifestId,
    pipelines: Vec<Pipeline>,
    content: Option<ManifestContent>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self::new()
    }
}

impl Manifest {
    pub fn new() -> Self {
        Self {
            id: ManifestId(NEXT_MANIFEST_ID.fetch_add(1, Ordering::Relaxed)),
            pipelines: Vec::new(),
            content: None,
        }
    }

    pub fn id(&self) -> ManifestId {
        self.id
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Structure
    // ─────────────────────────────────────────────────────────────────────────

    /// Take ownership of `pipeline` and wire it into the graph.
    ///
    /// Panics if the node was constructed against another manifest, if it
    /// references pipelines of another manifest, if its name is taken, or
    /// if content has already been collected.
    pub fn attach(&mut self, mut pipeline: Pipeline) -> PipelineRef {
        assert!(
            self.content.is_none(),
            "{}: pipeline '{}' attached after content collection",
            self.id,
            pipeline.name()
        );
        assert_eq!(
            pipeline.manifest(),
            self.id,
            "pipeline '{}' belongs to {} and cannot be attached to {}",
            pipeline.name(),
            pipeline.manifest(),
            self.id
        );
        assert_eq!(
            pipeline.state(),
            NodeState::Unattached,
            "pipeline '{}' is already attached",
            pipeline.name()
        );
        assert!(
            self.find(pipeline.name()).is_none(),
            "{}: duplicate pipeline name '{}'",
            self.id,
            pipeline.name()
        );
        for upstream in pipeline.upstream() {
            assert_eq!(
                upstream.manifest, self.id,
                "pipeline '{}' references a pipeline of {}",
                pipeline.name(),
                upstream.manifest
            );
            assert!(
                upstream.index < self.pipelines.len(),
                "pipeline '{}' references an unknown pipeline",
                pipeline.name()
            );
        }
        match pipeline.build_dependency() {
            None => assert!(
                pipeline.kind().is_build_root(),
                "pipeline '{}' has no build dependency",
                pipeline.name()
            ),
            Some(build) => assert!(
                self.pipelines[build.index].kind().is_build_root(),
                "build dependency of '{}' is not a build root",
                pipeline.name()
            ),
        }

        let handle = PipelineRef {
            manifest: self.id,
            index: self.pipelines.len(),
        };
        if let Some(build) = pipeline.build_dependency() {
            self.pipelines[build.index].dependents.push(handle);
        }
        pipeline.state = NodeState::Structural;
        debug!(manifest = %self.id, pipeline = pipeline.name(), "attached pipeline");
        self.pipelines.push(pipeline);
        handle
    }

    /// Construct a pipeline bound to this manifest and attach it.
    pub fn add(
        &mut self,
        name: &str,
        build: Option<PipelineRef>,
        kind: impl Into<PipelineKind>,
    ) -> PipelineRef {
        let pipeline = Pipeline::new(self, name, build, kind);
        self.attach(pipeline)
    }

    pub fn pipeline(&self, handle: PipelineRef) -> &Pipeline {
        assert_eq!(
            handle.manifest, self.id,
            "pipeline handle of {} used with {}",
            handle.manifest, self.id
        );
        &self.pipelines[handle.index]
    }

    fn pipeline_mut(&mut self, handle: PipelineRef) -> &mut Pipeline {
        assert_eq!(
            handle.manifest, self.id,
            "pipeline handle of {} used with {}",
            handle.manifest, self.id
        );
        &mut self.pipelines[handle.index]
    }

    pub fn pipelines(&self) -> &[Pipeline] {
        &self.pipelines
    }

    pub fn find(&self, name: &str) -> Option<PipelineRef> {
        self.pipelines
            .iter()
            .position(|p| p.name() == name)
            .map(|index| PipelineRef {
                manifest: self.id,
                index,
            })
    }

    pub fn name_of(&self, handle: PipelineRef) -> &str {
        self.pipeline(handle).name()
    }

    /// The single file `handle` produces. Panics for pipelines producing a tree.
    pub fn output_file(&self, handle: PipelineRef) -> &str {
        let pipeline = self.pipeline(handle);
        match pipeline.kind().behaviour().filename() {
            Some(filename) => filename,
            None => panic!("pipeline '{}' does not produce a single file", pipeline.name()),
        }
    }

    /// Kernel version resolved by `handle` in the current resolution cycle.
    pub fn resolved_kernel_version(&self, handle: PipelineRef) -> Option<&str> {
        self.pipeline(handle)
            .resolved()
            .and_then(|inputs| inputs.kernel_version.as_deref())
    }

    pub fn set_checkpoint(&mut self, handle: PipelineRef) {
        self.pipeline_mut(handle).checkpoint = true;
    }

    pub fn set_export(&mut self, handle: PipelineRef) {
        self.pipeline_mut(handle).export = true;
    }

    pub fn checkpoints(&self) -> Vec<&str> {
        self.pipelines
            .iter()
            .filter(|p| p.is_checkpoint())
            .map(Pipeline::name)
            .collect()
    }

    pub fn exports(&self) -> Vec<&str> {
        self.pipelines
            .iter()
            .filter(|p| p.is_export())
            .map(Pipeline::name)
            .collect()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Content
    // ─────────────────────────────────────────────────────────────────────────

    /// Gather every node's unresolved requirements and freeze the graph.
    pub fn collect_content(&mut self) -> &ManifestContent {
        let mut content = ManifestContent::default();
        for pipeline in &self.pipelines {
            let sets = pipeline.package_set_requirements(self);
            if !sets.is_empty() {
                content.package_sets.insert(pipeline.name().to_string(), sets);
            }
            let containers = pipeline.container_source_requirements();
            if !containers.is_empty() {
                content.containers.insert(pipeline.name().to_string(), containers);
            }
            let commits = pipeline.ostree_commit_requirements();
            if !commits.is_empty() {
                content.ostree_commits.insert(pipeline.name().to_string(), commits);
            }
        }
        info!(
            manifest = %self.id,
            package_sets = content.package_sets.len(),
            containers = content.containers.len(),
            commits = content.ostree_commits.len(),
            "collected manifest content"
        );
        self.content.insert(content)
    }

    pub fn content(&self) -> Option<&ManifestContent> {
        self.content.as_ref()
    }

    /// Pipelines in attachment order.
    ///
    /// `attach` only accepts references to pipelines that are already
    /// attached, so every build dependency and input precedes the pipelines
    /// that use it. The graph is still checked for cycles.
    pub fn serialization_order(&self) -> Vec<PipelineRef> {
        let mut graph = DiGraph::<usize, ()>::new();
        let nodes: Vec<_> = (0..self.pipelines.len()).map(|i| graph.add_node(i)).collect();
        for (index, pipeline) in self.pipelines.iter().enumerate() {
            for upstream in pipeline.upstream() {
                graph.add_edge(nodes[upstream.index], nodes[index], ());
            }
        }
        if let Err(cycle) = toposort(&graph, None) {
            panic!(
                "{}: pipeline graph has a cycle through '{}'",
                self.id,
                self.pipelines[graph[cycle.node_id()]].name()
            );
        }
        (0..self.pipelines.len())
            .map(|index| PipelineRef {
                manifest: self.id,
                index,
            })
            .collect()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Resolution
    // ─────────────────────────────────────────────────────────────────────────

    /// Inject the part of `resolved` that belongs to `handle`.
    ///
    /// Fails with [`PlanError::MissingRequirement`] when a declared
    /// requirement has no resolved counterpart.
    pub fn begin_resolution(
        &mut self,
        handle: PipelineRef,
        resolved: &ResolvedContent,
    ) -> Result<(), PlanError> {
        let pipeline = self.pipeline(handle);
        let name = pipeline.name().to_string();

        let packages = match resolved.packages.get(&name) {
            Some(specs) => specs.clone(),
            None if !pipeline.package_set_requirements(self).is_empty() => {
                return Err(PlanError::missing(&name, "resolved package set"));
            }
            None => Vec::new(),
        };

        let available_commits = resolved.commits.get(&name).map(Vec::as_slice).unwrap_or(&[]);
        let mut commits = Vec::new();
        for source in pipeline.ostree_commit_requirements() {
            let spec = available_commits
                .iter()
                .find(|spec| spec.reference == source.reference && spec.url == source.url)
                .ok_or_else(|| {
                    PlanError::missing(&name, format!("ostree commit '{}'", source.reference))
                })?;
            commits.push(spec.clone());
        }

        let available_containers = resolved
            .containers
            .get(&name)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        let mut containers = Vec::new();
        for source in pipeline.container_source_requirements() {
            let spec = available_containers
                .iter()
                .find(|spec| spec.source == source.source)
                .ok_or_else(|| PlanError::missing(&name, format!("container '{}'", source.source)))?;
            containers.push(spec.clone());
        }

        let inputs = ResolvedInputs {
            packages,
            containers,
            commits,
            kernel_version: None,
        };
        self.pipeline_mut(handle).begin_resolution(inputs)
    }

    /// Emit the document of one pipeline. Content must have been collected.
    pub fn serialize_pipeline(&mut self, handle: PipelineRef) -> PipelineDocument {
        assert!(
            self.content.is_some(),
            "{}: serialization requires collected content",
            self.id
        );
        let pipeline = self.pipeline(handle);
        let stages = pipeline.stages(self);
        let document = PipelineDocument {
            name: pipeline.name().to_string(),
            build: pipeline
                .build_dependency()
                .map(|build| format!("name:{}", self.name_of(build))),
            runner: pipeline.kind().behaviour().runner().map(str::to_string),
            stages,
        };
        self.pipeline_mut(handle).mark_serialized();
        document
    }

    pub fn end_resolution(&mut self, handle: PipelineRef) {
        self.pipeline_mut(handle).end_resolution();
    }

    /// Serialize every pipeline against `resolved`.
    ///
    /// Nodes are reset afterwards whether or not serialization succeeded, so
    /// the manifest can be serialized again.
    pub fn serialize(&mut self, resolved: &ResolvedContent) -> Result<ManifestDocument, PlanError> {
        assert!(
            self.content.is_some(),
            "{}: serialization requires collected content",
            self.id
        );
        let order = self.serialization_order();
        let mut begun = Vec::with_capacity(order.len());
        let result = self.serialize_in_order(&order, resolved, &mut begun);
        for handle in begun {
            self.end_resolution(handle);
        }
        let pipelines = result?;

        let mut sources = Sources::default();
        for document in &pipelines {
            if let Some(specs) = resolved.packages.get(&document.name) {
                sources.add_packages(specs);
            }
            if let Some(specs) = resolved.commits.get(&document.name) {
                sources.add_commits(specs);
            }
            if let Some(specs) = resolved.containers.get(&document.name) {
                sources.add_containers(specs);
            }
        }

        info!(manifest = %self.id, pipelines = pipelines.len(), "serialized manifest");
        Ok(ManifestDocument::new(pipelines, sources))
    }

    fn serialize_in_order(
        &mut self,
        order: &[PipelineRef],
        resolved: &ResolvedContent,
        begun: &mut Vec<PipelineRef>,
    ) -> Result<Vec<PipelineDocument>, PlanError> {
        let mut documents = Vec::with_capacity(order.len());
        for &handle in order {
            self.begin_resolution(handle, resolved)?;
            begun.push(handle);
            documents.push(self.serialize_pipeline(handle));
        }
        Ok(documents)
    }
}
