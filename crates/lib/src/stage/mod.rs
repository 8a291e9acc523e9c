//! Build stages and the per-image pipeline.
//!
//! An image build is an ordered list of stages. Every stage contributes a
//! dependency string; the stage digest chains it with the previous stage's
//! digest, so a change anywhere invalidates every later stage.
//!
//! Concrete stages hold their collaborators as fields (a shared
//! [`GitMappings`] set, a [`ShellBuilder`], a [`DockerStages`] resolver)
//! instead of layering behaviour through embedding.
//!
//! [`DockerStages`]: crate::dockerfile::DockerStages

mod builder;
mod dependencies;
mod docker_instructions;
mod dockerfile;
mod from;
mod git;
mod pipeline;
mod user;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{EngineConfig, ImageConfig, Placement};
use crate::dependency::{DependencyError, IdentityResolver};
use crate::dockerfile::DockerfileError;
use crate::git::GitDataManager;
use crate::git_mapping::{GitMapping, GitMappingError};
use crate::image::{BuiltImage, ImageError, WorkingImage};
use crate::util::hash::{Digest, sha256_args};

pub use builder::ShellBuilder;
pub use dependencies::{DependenciesStage, ImportChecksums, StaticImportChecksums, import_id};
pub use docker_instructions::DockerInstructionsStage;
pub use dockerfile::DockerfileStage;
pub use from::FromStage;
pub use git::{GitArchiveStage, GitCacheStage, GitLatestPatchStage, GitMappings};
pub use pipeline::{ImagePipeline, PipelineError, StageOutcome, StagePlan, StageStorage, StorageError};
pub use user::UserStage;

/// Stage names in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StageName {
  From,
  BeforeInstall,
  DependenciesBeforeInstall,
  GitArchive,
  Install,
  DependenciesAfterInstall,
  BeforeSetup,
  DependenciesBeforeSetup,
  Setup,
  DependenciesAfterSetup,
  GitCache,
  GitLatestPatch,
  DockerInstructions,
  Dockerfile,
}

impl StageName {
  /// Name folded into the stage digest. Changing it invalidates every cache.
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::From => "from",
      Self::BeforeInstall => "beforeInstall",
      Self::DependenciesBeforeInstall => "dependenciesBeforeInstall",
      Self::GitArchive => "gitArchive",
      Self::Install => "install",
      Self::DependenciesAfterInstall => "dependenciesAfterInstall",
      Self::BeforeSetup => "beforeSetup",
      Self::DependenciesBeforeSetup => "dependenciesBeforeSetup",
      Self::Setup => "setup",
      Self::DependenciesAfterSetup => "dependenciesAfterSetup",
      Self::GitCache => "gitCache",
      Self::GitLatestPatch => "gitLatestPatch",
      Self::DockerInstructions => "dockerInstructions",
      Self::Dockerfile => "dockerfile",
    }
  }

  /// The dependencies stage at `placement`.
  pub fn dependencies_at(placement: Placement) -> Self {
    match placement {
      Placement::BeforeInstall => Self::DependenciesBeforeInstall,
      Placement::AfterInstall => Self::DependenciesAfterInstall,
      Placement::BeforeSetup => Self::DependenciesBeforeSetup,
      Placement::AfterSetup => Self::DependenciesAfterSetup,
    }
  }
}

impl fmt::Display for StageName {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Whether an error comes from bad input or from infrastructure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  /// Invalid configuration or unresolvable input. Retrying does not help.
  Resolution,
  /// I/O, registry or runtime failure. The orchestrator may retry.
  Transient,
}

/// Errors raised while computing a stage digest or preparing its image.
#[derive(Debug, Error)]
pub enum StageError {
  #[error(transparent)]
  GitMapping(#[from] GitMappingError),

  #[error(transparent)]
  Dockerfile(#[from] DockerfileError),

  #[error(transparent)]
  Dependency(#[from] DependencyError),

  #[error(transparent)]
  Image(#[from] ImageError),

  #[error("unable to get import {index} source checksum: {message}")]
  ImportChecksum { index: usize, message: String },

  #[error("invalid stage configuration: {0}")]
  Invalid(String),
}

impl StageError {
  pub fn kind(&self) -> ErrorKind {
    match self {
      Self::GitMapping(GitMappingError::Git(_) | GitMappingError::Image(_)) => ErrorKind::Transient,
      Self::GitMapping(_) => ErrorKind::Resolution,
      Self::Dockerfile(DockerfileError::OnBuild(_) | DockerfileError::Io { .. }) => ErrorKind::Transient,
      Self::Dockerfile(_) => ErrorKind::Resolution,
      Self::Dependency(_) | Self::Invalid(_) => ErrorKind::Resolution,
      Self::Image(_) | Self::ImportChecksum { .. } => ErrorKind::Transient,
    }
  }

  /// Whether a stage base image expression resolved to nothing.
  pub fn is_invalid_base_image(&self) -> bool {
    matches!(self, Self::Dockerfile(e) if e.is_invalid_base_image())
  }
}

/// Collaborators shared by every stage of one pipeline.
pub struct StageContext<'a> {
  pub config: &'a EngineConfig,
  /// Scratch space for archives and patches, unique per pipeline.
  pub git_data: &'a GitDataManager,
  pub identities: &'a dyn IdentityResolver,
  pub imports: &'a dyn ImportChecksums,
}

/// One unit of the image pipeline.
///
/// `prev_built` is the image this stage is built on top of: the image of the
/// previous non-empty stage, found in storage or committed in this run.
pub trait Stage {
  fn name(&self) -> StageName;

  /// Digest-relevant dependencies of the stage.
  fn dependencies(&self, ctx: &StageContext<'_>, prev_built: Option<&BuiltImage>) -> Result<String, StageError>;

  /// Whether the stage has nothing to contribute on top of `prev_built`.
  fn is_empty(&self, _ctx: &StageContext<'_>, _prev_built: Option<&BuiltImage>) -> Result<bool, StageError> {
    Ok(false)
  }

  /// Whether a cached image of this stage references history that is gone.
  fn should_be_reset(&self, _built: &BuiltImage) -> Result<bool, StageError> {
    Ok(false)
  }

  fn prepare_image(
    &self,
    ctx: &StageContext<'_>,
    prev_built: Option<&BuiltImage>,
    image: &mut dyn WorkingImage,
  ) -> Result<(), StageError>;

  fn compute_digest(
    &self,
    ctx: &StageContext<'_>,
    prior: Option<&Digest>,
    prev_built: Option<&BuiltImage>,
  ) -> Result<Digest, StageError> {
    let dependencies = self.dependencies(ctx, prev_built)?;
    Ok(stage_digest(ctx.config, self.name(), &dependencies, prior))
  }
}

/// Digest of a stage: cache version, stage name, stage dependencies and the
/// previous stage's digest, when there is one.
pub fn stage_digest(config: &EngineConfig, name: StageName, dependencies: &str, prior: Option<&Digest>) -> Digest {
  let mut args = vec![config.build_cache_version.as_str(), name.as_str(), dependencies];
  if let Some(prior) = prior {
    args.push(prior.as_str());
  }
  sha256_args(args)
}

/// Assemble the stage list of a stapel-style image.
///
/// Git mappings that match nothing at their latest commit are dropped. Stages
/// with nothing configured are left out entirely.
pub fn stapel_stages(config: &ImageConfig, mappings: Vec<GitMapping>) -> Result<Vec<Box<dyn Stage>>, StageError> {
  let from = config
    .from
    .as_deref()
    .filter(|f| !f.is_empty())
    .ok_or_else(|| StageError::Invalid(format!("image '{}' has no base image", config.name)))?;

  let mappings = Arc::new(GitMappings::new(mappings)?);
  let builder = Arc::new(ShellBuilder::new(&config.shell));
  let mut stages: Vec<Box<dyn Stage>> = Vec::new();

  stages.push(Box::new(
    FromStage::new(from)
      .with_cache_version(config.from_cache_version.clone())
      .with_mounts(config.mounts.clone()),
  ));

  if !builder.is_empty(StageName::BeforeInstall) {
    stages.push(Box::new(UserStage::new(StageName::BeforeInstall, builder.clone(), None)));
  }
  push_dependencies(&mut stages, config, Placement::BeforeInstall)?;

  if !mappings.is_empty() {
    stages.push(Box::new(GitArchiveStage::new(mappings.clone())));
  }

  for (name, after) in [
    (StageName::Install, Placement::AfterInstall),
    (StageName::BeforeSetup, Placement::BeforeSetup),
    (StageName::Setup, Placement::AfterSetup),
  ] {
    if !builder.is_empty(name) {
      stages.push(Box::new(UserStage::new(name, builder.clone(), Some(mappings.clone()))));
    }
    push_dependencies(&mut stages, config, after)?;
  }

  if !mappings.is_empty() {
    stages.push(Box::new(GitCacheStage::new(mappings.clone())));
    stages.push(Box::new(GitLatestPatchStage::new(mappings)));
  }

  if let Some(docker) = &config.docker {
    stages.push(Box::new(DockerInstructionsStage::new(docker.clone())));
  }

  Ok(stages)
}

fn push_dependencies(
  stages: &mut Vec<Box<dyn Stage>>,
  config: &ImageConfig,
  placement: Placement,
) -> Result<(), StageError> {
  let stage = DependenciesStage::from_config(config, placement)?;
  if !stage.is_unconfigured() {
    stages.push(Box::new(stage));
  }
  Ok(())
}
