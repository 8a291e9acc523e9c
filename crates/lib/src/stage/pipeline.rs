//! Walks an image's stages: digests first, then a cache lookup per stage,
//! then prepare and commit on a miss.

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use super::{ErrorKind, Stage, StageContext, StageError, StageName};
use crate::image::{BuiltImage, ImageError, WorkingImage};
use crate::util::hash::Digest;

/// Where built stage images live.
pub trait StageStorage {
  /// The image stored for `name` at `digest`, if any.
  fn find(&self, name: StageName, digest: &Digest) -> Result<Option<BuiltImage>, StorageError>;

  /// A fresh working image on top of `parent` (the base image when `None`).
  fn start(&self, parent: Option<&BuiltImage>) -> Result<Box<dyn WorkingImage>, StorageError>;

  fn commit(&mut self, name: StageName, digest: &Digest, image: Box<dyn WorkingImage>)
  -> Result<BuiltImage, StorageError>;
}

#[derive(Debug, Error)]
pub enum StorageError {
  #[error("stage storage: {0}")]
  Backend(String),

  #[error(transparent)]
  Image(#[from] ImageError),
}

#[derive(Debug, Error)]
pub enum PipelineError {
  #[error("stage {stage}: {source}")]
  Stage {
    stage: StageName,
    #[source]
    source: StageError,
  },

  #[error(transparent)]
  Storage(#[from] StorageError),
}

impl PipelineError {
  pub fn kind(&self) -> ErrorKind {
    match self {
      Self::Stage { source, .. } => source.kind(),
      Self::Storage(_) => ErrorKind::Transient,
    }
  }

  fn stage(stage: StageName) -> impl FnOnce(StageError) -> Self {
    move |source| Self::Stage { stage, source }
  }
}

/// A stage digest computed without consulting storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StagePlan {
  pub name: StageName,
  pub digest: Digest,
  /// Empty stages take part in the digest chain but are never built.
  pub empty: bool,
}

/// What happened to one stage during [`ImagePipeline::run`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum StageOutcome {
  Skipped { name: StageName, digest: Digest },
  Reused { name: StageName, digest: Digest, image: BuiltImage },
  Committed { name: StageName, digest: Digest, image: BuiltImage },
}

impl StageOutcome {
  pub fn name(&self) -> StageName {
    match self {
      Self::Skipped { name, .. } | Self::Reused { name, .. } | Self::Committed { name, .. } => *name,
    }
  }

  pub fn digest(&self) -> &Digest {
    match self {
      Self::Skipped { digest, .. } | Self::Reused { digest, .. } | Self::Committed { digest, .. } => digest,
    }
  }
}

/// The ordered stages of one image.
pub struct ImagePipeline {
  stages: Vec<Box<dyn Stage>>,
  base_image: Option<BuiltImage>,
}

impl ImagePipeline {
  pub fn new(stages: Vec<Box<dyn Stage>>) -> Self {
    Self {
      stages,
      base_image: None,
    }
  }

  /// The image the first stage builds on, when already known.
  pub fn with_base_image(mut self, base_image: BuiltImage) -> Self {
    self.base_image = Some(base_image);
    self
  }

  pub fn stages(&self) -> &[Box<dyn Stage>] {
    &self.stages
  }

  /// Every stage digest, as for a build with an empty storage.
  pub fn digests(&self, ctx: &StageContext<'_>) -> Result<Vec<StagePlan>, PipelineError> {
    let mut plans: Vec<StagePlan> = Vec::with_capacity(self.stages.len());
    let prev_built = self.base_image.as_ref();

    for stage in &self.stages {
      let name = stage.name();
      let prior = plans.last().map(|p| &p.digest);
      let digest = stage
        .compute_digest(ctx, prior, prev_built)
        .map_err(PipelineError::stage(name))?;
      let empty = stage.is_empty(ctx, prev_built).map_err(PipelineError::stage(name))?;
      debug!(stage = %name, digest = %digest, empty, "stage digest computed");
      plans.push(StagePlan { name, digest, empty });
    }

    Ok(plans)
  }

  /// Reuse or build every stage in order.
  pub fn run(
    &self,
    ctx: &StageContext<'_>,
    storage: &mut dyn StageStorage,
  ) -> Result<Vec<StageOutcome>, PipelineError> {
    let mut outcomes: Vec<StageOutcome> = Vec::with_capacity(self.stages.len());
    let mut prev_built = self.base_image.clone();

    for stage in &self.stages {
      let name = stage.name();
      let prior = outcomes.last().map(StageOutcome::digest);
      let digest = stage
        .compute_digest(ctx, prior, prev_built.as_ref())
        .map_err(PipelineError::stage(name))?;

      if stage
        .is_empty(ctx, prev_built.as_ref())
        .map_err(PipelineError::stage(name))?
      {
        debug!(stage = %name, digest = %digest, "stage is empty");
        outcomes.push(StageOutcome::Skipped { name, digest });
        continue;
      }

      if let Some(found) = storage.find(name, &digest)? {
        if stage.should_be_reset(&found).map_err(PipelineError::stage(name))? {
          info!(stage = %name, image = %found.name, "cached stage references missing history, rebuilding");
        } else {
          debug!(stage = %name, image = %found.name, "using cached stage");
          prev_built = Some(found.clone());
          outcomes.push(StageOutcome::Reused {
            name,
            digest,
            image: found,
          });
          continue;
        }
      }

      info!(stage = %name, digest = %digest, "building stage");
      let mut image = storage.start(prev_built.as_ref())?;
      stage
        .prepare_image(ctx, prev_built.as_ref(), image.as_mut())
        .map_err(PipelineError::stage(name))?;
      let built = storage.commit(name, &digest, image)?;

      prev_built = Some(built.clone());
      outcomes.push(StageOutcome::Committed {
        name,
        digest,
        image: built,
      });
    }

    Ok(outcomes)
  }
}
