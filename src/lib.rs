//! Image build planning: partition layouts and pipeline manifests.
//!
//! This crate turns a declarative image request (architecture, image type,
//! blueprint customizations) into two artifacts an external executor can
//! replay:
//!
//! - a fully resolved [`disk::PartitionTable`] (offsets, sizes, identifiers,
//!   optional LVM), produced by [`disk::plan`];
//! - a [`manifest::ManifestDocument`], the ordered stage sequences of a
//!   pipeline graph, produced by [`manifest::Manifest::serialize`].
//!
//! # Architecture
//!
//! ```text
//! ImageRequest ──► distro (policy checks, image types, templates)
//!                     │
//!                     ├──► disk::plan ──► PartitionTable
//!                     │
//!                     └──► image kind ──► Manifest (pipelines)
//!                                           │ collect_content()
//!                                           ▼
//!                               ManifestContent ──► resolve (collaborators)
//!                                                       │
//!                                                       ▼
//!                               Manifest::serialize(ResolvedContent)
//!                                           │
//!                                           ▼
//!                                   ManifestDocument
//! ```
//!
//! Nothing here executes builds, depsolves or formats filesystems.

pub mod blueprint;
pub mod common;
pub mod config;
pub mod container;
pub mod disk;
pub mod distro;
pub mod error;
pub mod image;
pub mod manifest;
pub mod ostree;
pub mod pathpolicy;
pub mod platform;
pub mod resolve;
pub mod rpmmd;

pub use error::{PlanError, ResolveError};
