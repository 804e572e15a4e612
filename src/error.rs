//! Error types returned to callers of the planner and assembler.
//!
//! Caller bugs (cross-manifest attachment, double resolution, serializing an
//! unresolved node, mixed type-code vocabularies) are not represented here:
//! they panic.

use thiserror::Error;

/// Recoverable planning and assembly failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("no partition table template for architecture '{arch}' (image type '{image_type}')")]
    UnsupportedArchitecture { arch: String, image_type: String },

    #[error("unknown image type '{name}' for architecture '{arch}'")]
    UnknownImageType { name: String, arch: String },

    #[error("image type '{image_type}': {reason}")]
    PolicyViolation { image_type: String, reason: String },

    #[error("pipeline '{pipeline}' requires {what}, which the resolved content does not provide")]
    MissingRequirement { pipeline: String, what: String },

    #[error("resolving content for pipeline '{pipeline}' failed: {reason}")]
    Depsolve { pipeline: String, reason: String },
}

impl PlanError {
    pub(crate) fn policy(image_type: &str, reason: impl Into<String>) -> Self {
        PlanError::PolicyViolation {
            image_type: image_type.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn missing(pipeline: &str, what: impl Into<String>) -> Self {
        PlanError::MissingRequirement {
            pipeline: pipeline.to_string(),
            what: what.into(),
        }
    }
}

/// Failure reported by a resolution collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("depsolve failed: {0}")]
    Depsolve(String),

    #[error("cannot resolve ostree ref '{reference}' at '{url}': {reason}")]
    Commit {
        reference: String,
        url: String,
        reason: String,
    },

    #[error("cannot resolve container '{image}': {reason}")]
    Container { image: String, reason: String },
}
