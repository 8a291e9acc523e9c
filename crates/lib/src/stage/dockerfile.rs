//! A whole Dockerfile target built as a single stage.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::{Stage, StageContext, StageError, StageName};
use crate::config::DockerfileConfig;
use crate::dependency::{Dependency, project, stage_ids};
use crate::dockerfile::{BuildContext, DirContext, DockerStages, Dockerfile, OnBuildFetcher, ResolvedStages};
use crate::image::labels::dependency_label_key;
use crate::image::{BuiltImage, DockerfileBuildRequest, WorkingImage};

pub struct DockerfileStage {
  stages: DockerStages,
  context: Box<dyn BuildContext>,
  dockerfile_path: PathBuf,
  context_dir: PathBuf,
  target: Option<String>,
  build_args: BTreeMap<String, String>,
  add_host: Vec<String>,
  dependencies: Vec<Dependency>,
}

impl DockerfileStage {
  pub fn new(stages: DockerStages, context: Box<dyn BuildContext>) -> Self {
    Self {
      stages,
      context,
      dockerfile_path: PathBuf::new(),
      context_dir: PathBuf::new(),
      target: None,
      build_args: BTreeMap::new(),
      add_host: Vec::new(),
      dependencies: Vec::new(),
    }
  }

  /// Load the Dockerfile and its context directory as configured.
  pub fn from_config(config: &DockerfileConfig) -> Result<Self, StageError> {
    let dockerfile_path = dockerfile_path(&config.context, &config.path);
    let dockerfile = Dockerfile::load(&dockerfile_path)?;
    let stages = DockerStages::new(dockerfile, config.target.as_deref())?
      .with_build_args(config.args.clone())
      .with_add_host(config.add_host.clone())
      .with_image_cache_version(config.image_cache_version.clone());

    let dependencies = config
      .dependencies
      .iter()
      .map(Dependency::from_config)
      .collect::<Result<Vec<_>, _>>()?;

    let mut stage = Self::new(stages, Box::new(DirContext::new(&config.context)?)).with_dependencies(dependencies);
    stage.dockerfile_path = dockerfile_path;
    stage.context_dir = config.context.clone();
    stage.target = config.target.clone().filter(|t| !t.is_empty());
    stage.build_args = config.args.clone();
    stage.add_host = config.add_host.clone();
    Ok(stage)
  }

  pub fn with_dependencies(mut self, dependencies: Vec<Dependency>) -> Self {
    self.dependencies = dependencies;
    self
  }

  pub fn stages(&self) -> &DockerStages {
    &self.stages
  }

  /// Fetch the OnBuild triggers of the external base images. Must run before
  /// the digest is computed when any base image may carry triggers.
  pub fn fetch_onbuild(
    &mut self,
    fetcher: &OnBuildFetcher<'_>,
    identities: &dyn crate::dependency::IdentityResolver,
  ) -> Result<(), StageError> {
    let dependency_args = project(&self.dependencies, identities)?;
    self.stages.fetch_onbuild(fetcher, &dependency_args)?;
    Ok(())
  }

  /// Every stage's dependency list and the target digest.
  pub fn resolve(&self, ctx: &StageContext<'_>) -> Result<ResolvedStages, StageError> {
    let dependency_args = project(&self.dependencies, ctx.identities)?;
    Ok(self.stages.resolve(ctx.config, &dependency_args, self.context.as_ref())?)
  }
}

fn dockerfile_path(context: &Path, path: &Path) -> PathBuf {
  if path.is_absolute() {
    path.to_path_buf()
  } else {
    context.join(path)
  }
}

impl Stage for DockerfileStage {
  fn name(&self) -> StageName {
    StageName::Dockerfile
  }

  fn dependencies(&self, ctx: &StageContext<'_>, _prev_built: Option<&BuiltImage>) -> Result<String, StageError> {
    Ok(self.resolve(ctx)?.digest.0)
  }

  fn prepare_image(
    &self,
    ctx: &StageContext<'_>,
    _prev_built: Option<&BuiltImage>,
    image: &mut dyn WorkingImage,
  ) -> Result<(), StageError> {
    let mut build_args = self.build_args.clone();
    build_args.extend(project(&self.dependencies, ctx.identities)?);

    debug!(dockerfile = %self.dockerfile_path.display(), target = ?self.target, "building dockerfile target");
    image.build_dockerfile(&DockerfileBuildRequest {
      dockerfile: self.dockerfile_path.clone(),
      context: self.context_dir.clone(),
      target: self.target.clone(),
      build_args,
      add_host: self.add_host.clone(),
    })?;

    let labels: BTreeMap<String, String> = stage_ids(&self.dependencies, ctx.identities)?
      .into_iter()
      .map(|id| (dependency_label_key(&id), id))
      .collect();
    if !labels.is_empty() {
      image.add_labels(&labels)?;
    }
    Ok(())
  }
}
