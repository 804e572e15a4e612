//! Pipeline nodes and their resolution state machine.

use tracing::debug;

use super::archive::{ImageConversion, TarArchive, XzCompression};
use super::build::BuildRoot;
use super::installer::Installer;
use super::iso::{EfiBootTree, Iso, IsoRootfsImage, IsoTree};
use super::oci_container::OciContainer;
use super::os::OsTree;
use super::ostree_commit::OstreeCommit;
use super::ostree_deployment::OstreeDeployment;
use super::raw_image::RawImage;
use super::stages::Stage;
use super::{Manifest, ManifestId, PipelineRef};
use crate::container::{ContainerSource, ContainerSpec};
use crate::error::PlanError;
use crate::ostree::{CommitSource, CommitSpec};
use crate::rpmmd::{PackageSet, PackageSpec};

/// Where a node is in its lifecycle.
///
/// `Unattached → Structural → Resolved → Serialized`, and back to
/// `Structural` through `end_resolution`. A node without requirements may
/// go from `Structural` to `Serialized` directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Unattached,
    Structural,
    Resolved,
    Serialized,
}

/// External data injected into a node for one resolution cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedInputs {
    pub packages: Vec<PackageSpec>,
    pub containers: Vec<ContainerSpec>,
    pub commits: Vec<CommitSpec>,
    /// `version-release.arch` of the kernel, for kinds that boot one.
    pub kernel_version: Option<String>,
}

/// Behaviour every pipeline kind provides.
///
/// Defaults describe a kind with no requirements and no inputs.
pub trait PipelineBehaviour {
    /// Sibling pipelines whose output this one consumes.
    fn inputs(&self) -> Vec<PipelineRef> {
        Vec::new()
    }

    /// Packages the build root must contain for this pipeline's stages.
    fn build_packages(&self, _manifest: &Manifest) -> Vec<String> {
        Vec::new()
    }

    /// Package set chain to depsolve for this pipeline.
    fn package_sets(&self, _manifest: &Manifest, _dependents: &[PipelineRef]) -> Vec<PackageSet> {
        Vec::new()
    }

    fn commit_sources(&self) -> Vec<CommitSource> {
        Vec::new()
    }

    fn container_sources(&self) -> Vec<ContainerSource> {
        Vec::new()
    }

    /// Validate injected data and derive what the stages need from it.
    fn resolve(&self, _pipeline: &str, _inputs: &mut ResolvedInputs) -> Result<(), PlanError> {
        Ok(())
    }

    fn stages(&self, manifest: &Manifest, resolved: &ResolvedInputs) -> Vec<Stage>;

    /// File this pipeline produces, for kinds that produce a single file.
    fn filename(&self) -> Option<&str> {
        None
    }

    /// Stage runner, only meaningful for build roots.
    fn runner(&self) -> Option<&str> {
        None
    }
}

/// The closed set of pipeline kinds.
#[derive(Debug, Clone)]
pub enum PipelineKind {
    Build(BuildRoot),
    Os(OsTree),
    OstreeDeployment(OstreeDeployment),
    RawImage(RawImage),
    Xz(XzCompression),
    Tar(TarArchive),
    Convert(ImageConversion),
    OstreeCommit(OstreeCommit),
    OciContainer(OciContainer),
    Installer(Installer),
    EfiBootTree(EfiBootTree),
    IsoRootfsImage(IsoRootfsImage),
    IsoTree(IsoTree),
    Iso(Iso),
}

impl PipelineKind {
    pub fn behaviour(&self) -> &dyn PipelineBehaviour {
        match self {
            PipelineKind::Build(kind) => kind,
            PipelineKind::Os(kind) => kind,
            PipelineKind::OstreeDeployment(kind) => kind,
            PipelineKind::RawImage(kind) => kind,
            PipelineKind::Xz(kind) => kind,
            PipelineKind::Tar(kind) => kind,
            PipelineKind::Convert(kind) => kind,
            PipelineKind::OstreeCommit(kind) => kind,
            PipelineKind::OciContainer(kind) => kind,
            PipelineKind::Installer(kind) => kind,
            PipelineKind::EfiBootTree(kind) => kind,
            PipelineKind::IsoRootfsImage(kind) => kind,
            PipelineKind::IsoTree(kind) => kind,
            PipelineKind::Iso(kind) => kind,
        }
    }

    pub fn is_build_root(&self) -> bool {
        matches!(self, PipelineKind::Build(_))
    }
}

macro_rules! impl_from_kind {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for PipelineKind {
                fn from(kind: $ty) -> Self {
                    PipelineKind::$variant(kind)
                }
            }
        )*
    };
}

impl_from_kind! {
    Build => BuildRoot,
    Os => OsTree,
    OstreeDeployment => OstreeDeployment,
    RawImage => RawImage,
    Xz => XzCompression,
    Tar => TarArchive,
    Convert => ImageConversion,
    OstreeCommit => OstreeCommit,
    OciContainer => OciContainer,
    Installer => Installer,
    EfiBootTree => EfiBootTree,
    IsoRootfsImage => IsoRootfsImage,
    IsoTree => IsoTree,
    Iso => Iso,
}

/// A node of the pipeline graph.
///
/// A node is bound to one manifest when it is constructed and can only be
/// attached to that manifest.
#[derive(Debug, Clone)]
pub struct Pipeline {
    name: String,
    manifest: ManifestId,
    build: Option<PipelineRef>,
    pub(super) dependents: Vec<PipelineRef>,
    pub(super) checkpoint: bool,
    pub(super) export: bool,
    pub(super) state: NodeState,
    kind: PipelineKind,
    resolved: Option<ResolvedInputs>,
    completed_resolution: bool,
}

impl Pipeline {
    pub fn new(
        manifest: &Manifest,
        name: &str,
        build: Option<PipelineRef>,
        kind: impl Into<PipelineKind>,
    ) -> Self {
        Self {
            name: name.to_string(),
            manifest: manifest.id(),
            build,
            dependents: Vec::new(),
            checkpoint: false,
            export: false,
            state: NodeState::Unattached,
            kind: kind.into(),
            resolved: None,
            completed_resolution: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn manifest(&self) -> ManifestId {
        self.manifest
    }

    pub fn build_dependency(&self) -> Option<PipelineRef> {
        self.build
    }

    pub fn dependents(&self) -> &[PipelineRef] {
        &self.dependents
    }

    pub fn is_checkpoint(&self) -> bool {
        self.checkpoint
    }

    pub fn is_export(&self) -> bool {
        self.export
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn kind(&self) -> &PipelineKind {
        &self.kind
    }

    pub fn resolved(&self) -> Option<&ResolvedInputs> {
        self.resolved.as_ref()
    }

    /// Build dependency plus every input, in that order.
    pub fn upstream(&self) -> Vec<PipelineRef> {
        self.build
            .into_iter()
            .chain(self.kind.behaviour().inputs())
            .collect()
    }

    pub fn required_build_packages(&self, manifest: &Manifest) -> Vec<String> {
        let mut packages = self.kind.behaviour().build_packages(manifest);
        packages.sort();
        packages.dedup();
        packages
    }

    pub fn package_set_requirements(&self, manifest: &Manifest) -> Vec<PackageSet> {
        self.kind.behaviour().package_sets(manifest, &self.dependents)
    }

    pub fn ostree_commit_requirements(&self) -> Vec<CommitSource> {
        self.kind.behaviour().commit_sources()
    }

    pub fn container_source_requirements(&self) -> Vec<ContainerSource> {
        self.kind.behaviour().container_sources()
    }

    pub fn declares_requirements(&self, manifest: &Manifest) -> bool {
        !self.package_set_requirements(manifest).is_empty()
            || !self.ostree_commit_requirements().is_empty()
            || !self.container_source_requirements().is_empty()
    }

    /// Inject resolved data. Panics on a second call without an
    /// intervening [`end_resolution`](Self::end_resolution).
    pub fn begin_resolution(&mut self, mut inputs: ResolvedInputs) -> Result<(), PlanError> {
        match self.state {
            NodeState::Structural => {}
            NodeState::Unattached => {
                panic!("pipeline '{}' resolved before being attached to a manifest", self.name)
            }
            NodeState::Resolved | NodeState::Serialized => panic!(
                "pipeline '{}': begin_resolution called twice without end_resolution",
                self.name
            ),
        }

        self.kind.behaviour().resolve(&self.name, &mut inputs)?;
        debug!(
            pipeline = %self.name,
            packages = inputs.packages.len(),
            commits = inputs.commits.len(),
            containers = inputs.containers.len(),
            "began resolution"
        );
        self.resolved = Some(inputs);
        self.state = NodeState::Resolved;
        Ok(())
    }

    /// Emit this node's stages. `manifest` is the owning manifest, used for
    /// reads of sibling nodes.
    pub(super) fn stages(&self, manifest: &Manifest) -> Vec<Stage> {
        assert_eq!(
            self.manifest,
            manifest.id(),
            "pipeline '{}' serialized against a foreign manifest",
            self.name
        );
        match self.state {
            NodeState::Resolved => {}
            NodeState::Structural if !self.declares_requirements(manifest) => {}
            NodeState::Structural => panic!(
                "pipeline '{}' serialized before begin_resolution but declares requirements",
                self.name
            ),
            NodeState::Serialized => panic!(
                "pipeline '{}' serialized twice in one resolution cycle",
                self.name
            ),
            NodeState::Unattached => panic!("pipeline '{}' serialized while unattached", self.name),
        }

        let empty = ResolvedInputs::default();
        let resolved = self.resolved.as_ref().unwrap_or(&empty);
        self.kind.behaviour().stages(manifest, resolved)
    }

    pub(super) fn mark_serialized(&mut self) {
        assert!(
            matches!(self.state, NodeState::Resolved | NodeState::Structural),
            "pipeline '{}' marked serialized from {:?}",
            self.name,
            self.state
        );
        self.state = NodeState::Serialized;
    }

    /// Drop injected data so the node can be resolved again. Repeating the
    /// call is harmless once a resolution has completed; calling it on a
    /// node that was never resolved panics.
    pub fn end_resolution(&mut self) {
        match self.state {
            NodeState::Resolved | NodeState::Serialized => {
                self.resolved = None;
                self.state = NodeState::Structural;
                self.completed_resolution = true;
            }
            NodeState::Structural if self.completed_resolution => {}
            NodeState::Structural | NodeState::Unattached => panic!(
                "pipeline '{}': end_resolution called without a completed resolution",
                self.name
            ),
        }
    }
}
