//! Dockerfile stages: parsing, variable expansion and digest dependencies.
//!
//! The flow for one Dockerfile image is:
//! 1. [`Dockerfile::parse`] splits the file into meta ARGs and stages.
//! 2. [`DockerStages::fetch_onbuild`] looks up the OnBuild triggers of every
//!    external base image.
//! 3. [`DockerStages::resolve`] expands every instruction against build args,
//!    dependency projections and stage variables, checksums the build context
//!    files read by ADD and COPY, and hashes the target stage's list.

mod context;
mod instruction;
mod onbuild;
mod parser;
mod resolver;
mod shlex;

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub use context::{BuildContext, DirContext, DockerIgnore, GitContext, normalize_sources};
pub use instruction::{
  AddInstruction, ArgInstruction, ArgPair, CopyInstruction, EnvInstruction, EnvPair, GenericInstruction, Instruction,
  OnBuildInstruction, RunInstruction, RunMount,
};
pub use onbuild::{
  ImageInspector, OfflineRegistry, OnBuildError, OnBuildFetcher, RegistryClient, RegistryError, StaticOnBuild,
};
pub use parser::{DockerStage, Dockerfile};
pub use resolver::{DockerStages, ResolvedStages};
pub use shlex::{DEFAULT_ESCAPE_TOKEN, Lexer, ShlexError, Variables};

use crate::dependency::DependencyError;

#[derive(Debug, Error)]
pub enum DockerfileError {
  #[error("dockerfile parse error at line {line}: {message}")]
  Parse { line: usize, message: String },

  #[error("{0} is not a valid target build stage")]
  UnknownTarget(String),

  /// The base image of a stage expands to an empty name.
  #[error("invalid base image '{expression}' of stage {stage}: base name resolved to an empty string")]
  InvalidBaseImage { stage: usize, expression: String },

  #[error("unable to expand '{word}': {source}")]
  Shlex {
    word: String,
    #[source]
    source: ShlexError,
  },

  #[error(transparent)]
  OnBuild(#[from] OnBuildError),

  #[error("build context: {0}")]
  Context(String),

  #[error(transparent)]
  Dependency(#[from] DependencyError),

  #[error("failed to read '{path}': {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

impl DockerfileError {
  pub fn is_invalid_base_image(&self) -> bool {
    matches!(self, Self::InvalidBaseImage { .. })
  }
}
