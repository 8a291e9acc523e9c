//! stagecraft-lib: the incremental image build engine of stagecraft
//!
//! This crate provides the pieces that make image builds reproducible and
//! incremental:
//! - `stage`: stage digests chained in pipeline order, and the pipeline that
//!   reuses or rebuilds each stage
//! - `git_mapping`: repository subtrees copied into images, applied as a full
//!   archive, an incremental patch or not at all
//! - `dockerfile`: the Dockerfile dependency resolver (ARG/ENV expansion,
//!   OnBuild triggers, cross-stage COPY)
//! - `dependency`: identities of other images projected into a build

pub mod config;
pub mod consts;
pub mod dependency;
pub mod dockerfile;
pub mod git;
pub mod git_mapping;
pub mod image;
pub mod path_matcher;
pub mod stage;
pub mod util;
