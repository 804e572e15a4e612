//! Content resolution: the boundary with the depsolver and fetchers.
//!
//! A frozen manifest exposes its unresolved requirements as
//! [`ManifestContent`]. The collaborators below turn them into concrete
//! specs, and the resulting [`ResolvedContent`] is what
//! [`Manifest::serialize`](crate::manifest::Manifest::serialize) consumes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::container::{ContainerSource, ContainerSpec};
use crate::error::{PlanError, ResolveError};
use crate::manifest::ManifestContent;
use crate::ostree::{CommitSource, CommitSpec};
use crate::rpmmd::{PackageSet, PackageSpec};

/// Turns a chain of package sets into the packages to install.
///
/// Sets in a chain are resolved on top of each other: later sets may only
/// add packages.
pub trait PackageResolver {
    fn depsolve(&self, chain: &[PackageSet]) -> Result<Vec<PackageSpec>, ResolveError>;
}

/// Turns an ostree ref on a remote into a commit checksum.
pub trait CommitResolver {
    fn resolve(&self, source: &CommitSource) -> Result<CommitSpec, ResolveError>;
}

/// Turns a container reference into a pinned image.
pub trait ContainerResolver {
    fn resolve(&self, source: &ContainerSource) -> Result<ContainerSpec, ResolveError>;
}

/// Resolved specs keyed by pipeline name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolvedContent {
    #[serde(default)]
    pub packages: BTreeMap<String, Vec<PackageSpec>>,
    #[serde(default)]
    pub containers: BTreeMap<String, Vec<ContainerSpec>>,
    #[serde(default)]
    pub commits: BTreeMap<String, Vec<CommitSpec>>,
}

/// Drive the collaborators over every requirement in `content`.
pub fn resolve_content(
    content: &ManifestContent,
    packages: &dyn PackageResolver,
    commits: &dyn CommitResolver,
    containers: &dyn ContainerResolver,
) -> Result<ResolvedContent, PlanError> {
    let mut resolved = ResolvedContent::default();

    for (pipeline, chain) in &content.package_sets {
        let specs = packages.depsolve(chain).map_err(|e| depsolve_error(pipeline, e))?;
        debug!(pipeline = %pipeline, packages = specs.len(), "depsolved package sets");
        resolved.packages.insert(pipeline.clone(), specs);
    }

    for (pipeline, sources) in &content.ostree_commits {
        let specs = sources
            .iter()
            .map(|source| commits.resolve(source))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| depsolve_error(pipeline, e))?;
        resolved.commits.insert(pipeline.clone(), specs);
    }

    for (pipeline, sources) in &content.containers {
        let specs = sources
            .iter()
            .map(|source| containers.resolve(source))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| depsolve_error(pipeline, e))?;
        resolved.containers.insert(pipeline.clone(), specs);
    }

    Ok(resolved)
}

fn depsolve_error(pipeline: &str, err: ResolveError) -> PlanError {
    PlanError::Depsolve {
        pipeline: pipeline.to_string(),
        reason: err.to_string(),
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    //! Deterministic collaborators for tests.

    use super::*;
    use sha2::{Digest, Sha256};

    fn fake_checksum(input: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(input.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Returns one spec per included package name, in include order.
    pub struct FakePackages {
        pub arch: String,
    }

    impl PackageResolver for FakePackages {
        fn depsolve(&self, chain: &[PackageSet]) -> Result<Vec<PackageSpec>, ResolveError> {
            let mut specs = Vec::new();
            for set in chain {
                for name in &set.include {
                    if name == "does-not-exist" {
                        return Err(ResolveError::Depsolve(format!("no package matches '{}'", name)));
                    }
                    if specs.iter().any(|spec: &PackageSpec| &spec.name == name) {
                        continue;
                    }
                    specs.push(PackageSpec {
                        name: name.clone(),
                        epoch: 0,
                        version: "1.0".into(),
                        release: "1.el9".into(),
                        arch: self.arch.clone(),
                        remote_location: format!("https://repo.example.com/{}.rpm", name),
                        checksum: format!("sha256:{}", fake_checksum(name)),
                        check_gpg: true,
                    });
                }
            }
            Ok(specs)
        }
    }

    pub struct FakeCommits;

    impl CommitResolver for FakeCommits {
        fn resolve(&self, source: &CommitSource) -> Result<CommitSpec, ResolveError> {
            Ok(CommitSpec {
                reference: source.reference.clone(),
                url: source.url.clone(),
                checksum: fake_checksum(&format!("{}@{}", source.reference, source.url)),
            })
        }
    }

    pub struct FakeContainers;

    impl ContainerResolver for FakeContainers {
        fn resolve(&self, source: &ContainerSource) -> Result<ContainerSpec, ResolveError> {
            Ok(ContainerSpec {
                source: source.source.clone(),
                digest: format!("sha256:{}", fake_checksum(&source.source)),
                image_id: format!("sha256:{}", fake_checksum(&format!("id:{}", source.source))),
                local_name: source.local_name().to_string(),
                tls_verify: source.tls_verify,
            })
        }
    }

    pub fn resolve(content: &ManifestContent, arch: &str) -> Result<ResolvedContent, PlanError> {
        resolve_content(
            content,
            &FakePackages { arch: arch.to_string() },
            &FakeCommits,
            &FakeContainers,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_content_keys_by_pipeline() {
        let mut content = ManifestContent::default();
        content
            .package_sets
            .insert("os".into(), vec![PackageSet::new("os", &["kernel", "bash"])]);
        content.ostree_commits.insert(
            "ostree-deployment".into(),
            vec![CommitSource {
                reference: "rhel/9/x86_64/edge".into(),
                url: "https://ostree.example.com/repo".into(),
            }],
        );

        let resolved = fakes::resolve(&content, "x86_64").unwrap();
        assert_eq!(resolved.packages["os"].len(), 2);
        assert_eq!(resolved.commits["ostree-deployment"][0].checksum.len(), 64);
        assert!(resolved.containers.is_empty());
    }

    #[test]
    fn test_depsolve_failure_names_pipeline() {
        let mut content = ManifestContent::default();
        content
            .package_sets
            .insert("os".into(), vec![PackageSet::new("os", &["does-not-exist"])]);
        match fakes::resolve(&content, "x86_64").unwrap_err() {
            PlanError::Depsolve { pipeline, reason } => {
                assert_eq!(pipeline, "os");
                assert!(reason.contains("does-not-exist"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }
}
