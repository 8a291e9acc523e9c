//! The first stage: the base image and the build mounts.

use tracing::debug;

use super::{Stage, StageContext, StageError, StageName};
use crate::config::{MountConfig, MountSource};
use crate::image::labels::MountPoints;
use crate::image::{BuiltImage, WorkingImage};
use crate::util::hash::sha256_args;

#[derive(Debug, Clone)]
pub struct FromStage {
  base_image: String,
  cache_version: Option<String>,
  mounts: Vec<MountConfig>,
}

impl FromStage {
  pub fn new(base_image: &str) -> Self {
    Self {
      base_image: base_image.to_string(),
      cache_version: None,
      mounts: Vec::new(),
    }
  }

  pub fn with_cache_version(mut self, cache_version: Option<String>) -> Self {
    self.cache_version = cache_version.filter(|v| !v.is_empty());
    self
  }

  pub fn with_mounts(mut self, mounts: Vec<MountConfig>) -> Self {
    self.mounts = mounts;
    self
  }

  pub fn base_image(&self) -> &str {
    &self.base_image
  }
}

fn mount_type(source: &MountSource) -> (&str, &str) {
  match source {
    MountSource::TmpDir => ("", "tmp_dir"),
    MountSource::BuildDir => ("", "build_dir"),
    MountSource::Custom(from) => (from.as_str(), "custom_dir"),
  }
}

impl Stage for FromStage {
  fn name(&self) -> StageName {
    StageName::From
  }

  /// `prev_built` is the base image itself when the orchestrator knows it;
  /// its id pins the digest to the exact base image content.
  fn dependencies(&self, _ctx: &StageContext<'_>, prev_built: Option<&BuiltImage>) -> Result<String, StageError> {
    let mut args: Vec<String> = Vec::new();
    if let Some(version) = &self.cache_version {
      args.push(version.clone());
    }
    for mount in &self.mounts {
      let (from, kind) = mount_type(&mount.from);
      args.push(from.to_string());
      args.push(mount.to.clone());
      args.push(kind.to_string());
    }
    args.push(self.base_image.clone());
    if let Some(base) = prev_built.filter(|b| !b.id.is_empty()) {
      args.push(base.id.clone());
    }
    Ok(sha256_args(&args).0)
  }

  fn prepare_image(
    &self,
    _ctx: &StageContext<'_>,
    prev_built: Option<&BuiltImage>,
    image: &mut dyn WorkingImage,
  ) -> Result<(), StageError> {
    let mut points = prev_built.map(|b| MountPoints::from_labels(&b.labels)).unwrap_or_default();
    points.merge(&MountPoints::from_configs(&self.mounts));
    if points.is_empty() {
      return Ok(());
    }

    debug!(base_image = %self.base_image, volumes = ?points.volumes(), "adding build mounts");
    image.add_volumes(&points.volumes())?;
    image.add_labels(&points.to_labels())?;
    Ok(())
  }
}
