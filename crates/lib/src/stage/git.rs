//! Git stages.
//!
//! `GitArchive` unpacks every mapping in full. The user stages after it
//! (Install, BeforeSetup, Setup) and the two trailing git stages bring the
//! mappings up to their latest commit with patches:
//! - `GitCache` absorbs large accumulated patches. Its digest is the patch
//!   size bucket, so small patches do not invalidate it.
//! - `GitLatestPatch` carries whatever is left. Its digest covers the patch
//!   content itself.

use std::sync::Arc;

use tracing::debug;

use super::{Stage, StageContext, StageError, StageName};
use crate::git_mapping::{GitApplier, GitMapping};
use crate::image::{BuiltImage, WorkingImage};
use crate::util::hash::sha256_args;

/// The git mappings of one image, sorted by identity hash.
#[derive(Debug, Default)]
pub struct GitMappings {
  mappings: Vec<GitMapping>,
}

impl GitMappings {
  /// Keep the mappings that match something at their latest commit.
  pub fn new(mappings: Vec<GitMapping>) -> Result<Self, StageError> {
    let mut kept = Vec::with_capacity(mappings.len());
    for mapping in mappings {
      if mapping.is_empty()? {
        debug!(mapping = %mapping.full_name(), "git mapping matches nothing, skipping");
        continue;
      }
      kept.push(mapping);
    }
    kept.sort_by_cached_key(|m| m.params_hash());
    Ok(Self { mappings: kept })
  }

  pub fn is_empty(&self) -> bool {
    self.mappings.is_empty()
  }

  pub fn len(&self) -> usize {
    self.mappings.len()
  }

  pub fn iter(&self) -> impl Iterator<Item = &GitMapping> {
    self.mappings.iter()
  }

  /// Whether any mapping recorded in `built` references a commit that is gone.
  pub fn should_be_reset(&self, built: &BuiltImage) -> Result<bool, StageError> {
    for mapping in &self.mappings {
      if mapping.should_be_reset(built)? {
        return Ok(true);
      }
    }
    Ok(false)
  }

  /// Commit each mapping was built from in `prev_built`, `None` for mappings
  /// it does not record or whose commit no longer exists.
  fn base_commits(&self, prev_built: &BuiltImage) -> Result<Vec<Option<String>>, StageError> {
    let mut commits = Vec::with_capacity(self.mappings.len());
    for mapping in &self.mappings {
      if mapping.image_commit_info(prev_built).is_none() || mapping.should_be_reset(prev_built)? {
        commits.push(None);
        continue;
      }
      commits.push(Some(mapping.base_commit_for_prev_built_image(prev_built)?));
    }
    Ok(commits)
  }

  /// Total size of the patches from `prev_built` to the latest commits.
  pub fn patch_size(&self, prev_built: &BuiltImage) -> Result<u64, StageError> {
    let mut size = 0;
    for (mapping, base) in self.mappings.iter().zip(self.base_commits(prev_built)?) {
      if let Some(base) = base {
        size += mapping.patch_size(&base)?;
      }
    }
    Ok(size)
  }

  /// Whether some mapping changed since `prev_built`.
  pub fn has_changes(&self, prev_built: &BuiltImage) -> Result<bool, StageError> {
    for (mapping, base) in self.mappings.iter().zip(self.base_commits(prev_built)?) {
      let Some(base) = base else {
        return Ok(true);
      };
      let latest = mapping.latest_commit()?;
      if base != latest && !mapping.create_patch(&base, &latest, false)?.is_empty() {
        return Ok(true);
      }
    }
    Ok(false)
  }

  /// Unified diffs from `prev_built` to the latest commits, one per mapping.
  pub fn patch_texts(&self, prev_built: &BuiltImage) -> Result<Vec<String>, StageError> {
    let mut texts = Vec::with_capacity(self.mappings.len());
    for (mapping, base) in self.mappings.iter().zip(self.base_commits(prev_built)?) {
      let text = match base {
        Some(base) => mapping.create_patch(&base, &mapping.latest_commit()?, true)?.text,
        None => String::new(),
      };
      texts.push(text);
    }
    Ok(texts)
  }

  /// Checksum of the stage dependency globs configured for `stage`.
  pub fn stage_dependencies_checksum(&self, stage: StageName) -> Result<String, StageError> {
    let mut checksums = Vec::new();
    for mapping in &self.mappings {
      let deps = mapping.stage_dependencies();
      let globs = match stage {
        StageName::Install => &deps.install,
        StageName::BeforeSetup => &deps.before_setup,
        StageName::Setup => &deps.setup,
        _ => continue,
      };
      if let Some(checksum) = mapping.stage_dependencies_checksum(globs)? {
        checksums.push(checksum.0);
      }
    }
    Ok(sha256_args(&checksums).0)
  }

  /// Bring every mapping up to date on top of `prev_built`.
  pub fn apply(
    &self,
    ctx: &StageContext<'_>,
    prev_built: Option<&BuiltImage>,
    image: &mut dyn WorkingImage,
  ) -> Result<(), StageError> {
    let applier = GitApplier::new(ctx.config, ctx.git_data);
    for mapping in &self.mappings {
      applier.apply(mapping, prev_built, image)?;
    }
    Ok(())
  }
}

/// Unpacks every mapping in full.
#[derive(Debug)]
pub struct GitArchiveStage {
  mappings: Arc<GitMappings>,
}

impl GitArchiveStage {
  pub fn new(mappings: Arc<GitMappings>) -> Self {
    Self { mappings }
  }
}

impl Stage for GitArchiveStage {
  fn name(&self) -> StageName {
    StageName::GitArchive
  }

  fn dependencies(&self, _ctx: &StageContext<'_>, _prev_built: Option<&BuiltImage>) -> Result<String, StageError> {
    let mut args = Vec::new();
    for mapping in self.mappings.iter() {
      args.push(mapping.params_hash());
      args.push(mapping.archive_type(&mapping.latest_commit()?)?.to_string());
    }
    Ok(sha256_args(&args).0)
  }

  fn is_empty(&self, _ctx: &StageContext<'_>, _prev_built: Option<&BuiltImage>) -> Result<bool, StageError> {
    Ok(self.mappings.is_empty())
  }

  fn should_be_reset(&self, built: &BuiltImage) -> Result<bool, StageError> {
    self.mappings.should_be_reset(built)
  }

  fn prepare_image(
    &self,
    ctx: &StageContext<'_>,
    _prev_built: Option<&BuiltImage>,
    image: &mut dyn WorkingImage,
  ) -> Result<(), StageError> {
    self.mappings.apply(ctx, None, image)
  }
}

/// Absorbs patches once they grow past one size step.
#[derive(Debug)]
pub struct GitCacheStage {
  mappings: Arc<GitMappings>,
}

impl GitCacheStage {
  pub fn new(mappings: Arc<GitMappings>) -> Self {
    Self { mappings }
  }

  fn bucket(&self, ctx: &StageContext<'_>, prev_built: Option<&BuiltImage>) -> Result<u64, StageError> {
    let Some(prev_built) = prev_built else {
      return Ok(0);
    };
    let size = self.mappings.patch_size(prev_built)?;
    let bucket = ctx.config.patch_size_bucket(size);
    debug!(size, bucket, "git cache patch size");
    Ok(bucket)
  }
}

impl Stage for GitCacheStage {
  fn name(&self) -> StageName {
    StageName::GitCache
  }

  fn dependencies(&self, ctx: &StageContext<'_>, prev_built: Option<&BuiltImage>) -> Result<String, StageError> {
    let bucket = self.bucket(ctx, prev_built)?;
    Ok(sha256_args([bucket.to_string()]).0)
  }

  fn is_empty(&self, ctx: &StageContext<'_>, prev_built: Option<&BuiltImage>) -> Result<bool, StageError> {
    if self.mappings.is_empty() {
      return Ok(true);
    }
    Ok(self.bucket(ctx, prev_built)? == 0)
  }

  fn should_be_reset(&self, built: &BuiltImage) -> Result<bool, StageError> {
    self.mappings.should_be_reset(built)
  }

  fn prepare_image(
    &self,
    ctx: &StageContext<'_>,
    prev_built: Option<&BuiltImage>,
    image: &mut dyn WorkingImage,
  ) -> Result<(), StageError> {
    self.mappings.apply(ctx, prev_built, image)
  }
}

/// Applies the remaining patch on top of everything else.
#[derive(Debug)]
pub struct GitLatestPatchStage {
  mappings: Arc<GitMappings>,
}

impl GitLatestPatchStage {
  pub fn new(mappings: Arc<GitMappings>) -> Self {
    Self { mappings }
  }
}

impl Stage for GitLatestPatchStage {
  fn name(&self) -> StageName {
    StageName::GitLatestPatch
  }

  fn dependencies(&self, _ctx: &StageContext<'_>, prev_built: Option<&BuiltImage>) -> Result<String, StageError> {
    let texts = match prev_built {
      Some(prev_built) => self.mappings.patch_texts(prev_built)?,
      None => Vec::new(),
    };
    Ok(sha256_args(&texts).0)
  }

  fn is_empty(&self, _ctx: &StageContext<'_>, prev_built: Option<&BuiltImage>) -> Result<bool, StageError> {
    match prev_built {
      _ if self.mappings.is_empty() => Ok(true),
      None => Ok(true),
      Some(prev_built) => Ok(!self.mappings.has_changes(prev_built)?),
    }
  }

  fn should_be_reset(&self, built: &BuiltImage) -> Result<bool, StageError> {
    self.mappings.should_be_reset(built)
  }

  fn prepare_image(
    &self,
    ctx: &StageContext<'_>,
    prev_built: Option<&BuiltImage>,
    image: &mut dyn WorkingImage,
  ) -> Result<(), StageError> {
    self.mappings.apply(ctx, prev_built, image)
  }
}
