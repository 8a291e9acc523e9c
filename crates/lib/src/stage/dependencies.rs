//! Dependencies stages: files imported from other images and projected
//! identities of other images.

use std::collections::BTreeMap;

use tracing::{info, warn};

use super::{Stage, StageContext, StageError, StageName};
use crate::config::{ImageConfig, ImportConfig, Placement};
use crate::consts::NOTHING_CHECKSUM;
use crate::dependency::{Dependency, digest_args, project, stage_ids};
use crate::image::labels::{dependency_label_key, import_label_key};
use crate::image::{BuiltImage, ImportRequest, WorkingImage};
use crate::util::hash::sha256_args;

/// Source content checksums of imports, computed by the orchestrator from
/// the source image.
pub trait ImportChecksums {
  fn checksum(&self, import: &ImportConfig) -> Result<String, String>;
}

/// Checksums known up front, keyed by [`import_id`].
#[derive(Debug, Clone, Default)]
pub struct StaticImportChecksums(pub BTreeMap<String, String>);

impl StaticImportChecksums {
  pub fn with(mut self, import: &ImportConfig, checksum: &str) -> Self {
    self.0.insert(import_id(import), checksum.to_string());
    self
  }
}

impl ImportChecksums for StaticImportChecksums {
  fn checksum(&self, import: &ImportConfig) -> Result<String, String> {
    self
      .0
      .get(&import_id(import))
      .cloned()
      .ok_or_else(|| format!("no checksum for import from '{}'", import.image))
  }
}

/// Stable identity of an import over every field that selects its content.
pub fn import_id(import: &ImportConfig) -> String {
  sha256_args([
    "ImageName",
    &import.image,
    "Stage",
    import.stage.as_deref().unwrap_or_default(),
    "After",
    import.after.as_deref().unwrap_or_default(),
    "Before",
    import.before.as_deref().unwrap_or_default(),
    "Add",
    &import.add,
    "To",
    &import.to,
    "Group",
    import.group.as_deref().unwrap_or_default(),
    "Owner",
    import.owner.as_deref().unwrap_or_default(),
    "IncludePaths",
    &import.include_paths.join("///"),
    "ExcludePaths",
    &import.exclude_paths.join("///"),
  ])
  .0
}

fn import_title(import: &ImportConfig) -> String {
  let mut title = format!("image={} add={} to={}", import.image, import.add, import.to);
  if !import.include_paths.is_empty() {
    title.push_str(&format!(" includePaths={:?}", import.include_paths));
  }
  if !import.exclude_paths.is_empty() {
    title.push_str(&format!(" excludePaths={:?}", import.exclude_paths));
  }
  format!("import[{}]", title)
}

#[derive(Debug, Clone)]
pub struct DependenciesStage {
  name: StageName,
  imports: Vec<ImportConfig>,
  dependencies: Vec<Dependency>,
}

impl DependenciesStage {
  pub fn new(name: StageName, imports: Vec<ImportConfig>, dependencies: Vec<Dependency>) -> Self {
    Self {
      name,
      imports,
      dependencies,
    }
  }

  /// The imports and dependencies `config` places at `placement`.
  pub fn from_config(config: &ImageConfig, placement: Placement) -> Result<Self, StageError> {
    let invalid = |e: crate::config::ConfigError| StageError::Invalid(e.to_string());

    let mut imports = Vec::new();
    for import in &config.imports {
      if import.placement().map_err(invalid)? == placement {
        imports.push(import.clone());
      }
    }

    let mut dependencies = Vec::new();
    for dependency in &config.dependencies {
      if dependency.placement().map_err(invalid)? == placement {
        dependencies.push(Dependency::from_config(dependency)?);
      }
    }

    Ok(Self::new(StageName::dependencies_at(placement), imports, dependencies))
  }

  /// Whether nothing is placed at this stage.
  pub fn is_unconfigured(&self) -> bool {
    self.imports.is_empty() && self.dependencies.is_empty()
  }

  fn import_checksum(&self, ctx: &StageContext<'_>, index: usize, import: &ImportConfig) -> Result<String, StageError> {
    ctx
      .imports
      .checksum(import)
      .map_err(|message| StageError::ImportChecksum { index, message })
  }
}

impl Stage for DependenciesStage {
  fn name(&self) -> StageName {
    self.name
  }

  fn dependencies(&self, ctx: &StageContext<'_>, _prev_built: Option<&BuiltImage>) -> Result<String, StageError> {
    let mut args = Vec::new();

    for (index, import) in self.imports.iter().enumerate() {
      let checksum = self.import_checksum(ctx, index, import)?;
      if checksum == NOTHING_CHECKSUM {
        warn!(import = %import_title(import), "this import config does nothing");
      }
      info!(checksum = %checksum, import = %import_title(import), "import source checksum");

      args.push(checksum);
      args.push(import.to.clone());
      args.push(import.group.clone().unwrap_or_default());
      args.push(import.owner.clone().unwrap_or_default());
    }

    args.extend(digest_args(&self.dependencies, ctx.identities)?);
    Ok(sha256_args(&args).0)
  }

  fn is_empty(&self, _ctx: &StageContext<'_>, _prev_built: Option<&BuiltImage>) -> Result<bool, StageError> {
    Ok(self.is_unconfigured())
  }

  fn prepare_image(
    &self,
    ctx: &StageContext<'_>,
    _prev_built: Option<&BuiltImage>,
    image: &mut dyn WorkingImage,
  ) -> Result<(), StageError> {
    let mut labels = BTreeMap::new();

    for (index, import) in self.imports.iter().enumerate() {
      image.import_files(&ImportRequest {
        image_name: import.image.clone(),
        add: import.add.clone(),
        to: import.to.clone(),
        include_paths: import.include_paths.clone(),
        exclude_paths: import.exclude_paths.clone(),
        owner: import.owner.clone(),
        group: import.group.clone(),
      })?;
      labels.insert(import_label_key(&import_id(import)), self.import_checksum(ctx, index, import)?);
    }

    let envs = project(&self.dependencies, ctx.identities)?;
    if !envs.is_empty() {
      image.add_envs(&envs)?;
    }
    for stage_id in stage_ids(&self.dependencies, ctx.identities)? {
      labels.insert(dependency_label_key(&stage_id), stage_id);
    }

    if !labels.is_empty() {
      image.add_labels(&labels)?;
    }
    Ok(())
  }
}
