//! Engine configuration and image definitions.
//!
//! `EngineConfig` is threaded explicitly into the resolver, the git applier and
//! the pipeline; nothing in the engine reads process-wide toggles.
//!
//! `ImageConfig` is the serde form of one image definition. Two flavours are
//! supported: a stapel-style image (base image, shell builder, git mappings,
//! dependencies, imports, docker instructions) and a Dockerfile image.
//!
//! # Image File Format
//!
//! ```json
//! {
//!   "name": "backend",
//!   "from": "alpine:3.20",
//!   "git": [{ "add": "/", "to": "/app", "includePaths": ["src"] }],
//!   "shell": { "install": { "commands": ["make -C /app"] } },
//!   "dependencies": [{
//!     "image": "assets",
//!     "before": "setup",
//!     "imports": [{ "type": "ImageName", "targetEnv": "ASSETS_IMAGE" }]
//!   }]
//! }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::{BUILD_CACHE_VERSION, DEFAULT_PATCH_SIZE_STEP};
use crate::dependency::ProjectionType;

/// How a patch size is turned into a bucket index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchSizeRounding {
  /// `size / step`: patches smaller than one step land in bucket 0.
  #[default]
  Truncate,
  /// `ceil(size / step)`: any non-empty patch lands in bucket 1 or above.
  Ceil,
}

/// How a non-empty git diff is transferred into a working image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchStrategy {
  /// Text-only diffs are applied as unified patches; diffs touching binary
  /// files fall back to remove + filtered archive.
  #[default]
  TextPatch,
  /// Every diff is applied as remove + filtered archive.
  FilteredArchive,
}

/// Engine-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
  /// Root for scratch files. Each pipeline creates its own unique directory
  /// beneath it. Defaults to the system temp directory.
  pub tmp_dir: Option<PathBuf>,

  /// Version folded into every stage digest.
  pub build_cache_version: String,

  /// Patch size bucket step in bytes.
  pub patch_size_step: u64,

  pub patch_size_rounding: PatchSizeRounding,

  pub patch_strategy: PatchStrategy,

  /// Log the resolved dependency list of Dockerfile targets.
  pub debug_dockerfile_dependencies: bool,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      tmp_dir: None,
      build_cache_version: BUILD_CACHE_VERSION.to_string(),
      patch_size_step: DEFAULT_PATCH_SIZE_STEP,
      patch_size_rounding: PatchSizeRounding::default(),
      patch_strategy: PatchStrategy::default(),
      debug_dockerfile_dependencies: false,
    }
  }
}

impl EngineConfig {
  /// Bucket index of a patch of `size` bytes.
  pub fn patch_size_bucket(&self, size: u64) -> u64 {
    let step = self.patch_size_step.max(1);
    match self.patch_size_rounding {
      PatchSizeRounding::Truncate => size / step,
      PatchSizeRounding::Ceil => size.div_ceil(step),
    }
  }

  /// Scratch root, falling back to the system temp directory.
  pub fn scratch_root(&self) -> PathBuf {
    self.tmp_dir.clone().unwrap_or_else(std::env::temp_dir)
  }
}

/// Errors that can occur when loading an image definition.
#[derive(Debug, Error)]
pub enum ConfigError {
  /// Failed to read the image file.
  #[error("failed to read image config '{path}': {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  /// Failed to parse the image file JSON.
  #[error("failed to parse image config '{path}': {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  /// The definition is structurally invalid.
  #[error("invalid image config: {0}")]
  Invalid(String),
}

/// One image definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ImageConfig {
  pub name: String,

  /// Base image reference.
  pub from: Option<String>,

  /// Extra value folded into the From stage digest.
  pub from_cache_version: Option<String>,

  pub mounts: Vec<MountConfig>,

  pub git: Vec<GitMappingConfig>,

  pub shell: ShellConfig,

  pub dependencies: Vec<DependencyConfig>,

  pub imports: Vec<ImportConfig>,

  pub docker: Option<DockerInstructionsConfig>,

  /// When set, the image is built from a Dockerfile and every stapel field
  /// above is ignored.
  pub dockerfile: Option<DockerfileConfig>,
}

impl ImageConfig {
  /// Load an image definition from a JSON file.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;

    let config: ImageConfig = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })?;

    config.validate()?;
    Ok(config)
  }

  /// Check cross-field constraints serde cannot express.
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.name.is_empty() {
      return Err(ConfigError::Invalid("image name must not be empty".to_string()));
    }

    if self.dockerfile.is_none() && self.from.as_deref().unwrap_or_default().is_empty() {
      return Err(ConfigError::Invalid(format!(
        "image '{}' needs either 'from' or 'dockerfile'",
        self.name
      )));
    }

    for git in &self.git {
      if !git.to.starts_with('/') {
        return Err(ConfigError::Invalid(format!(
          "git mapping 'to' must be an absolute path, got '{}'",
          git.to
        )));
      }
      let pins = [&git.branch, &git.tag, &git.commit].iter().filter(|p| p.is_some()).count();
      if pins > 1 {
        return Err(ConfigError::Invalid(format!(
          "git mapping '{}' may pin only one of branch, tag or commit",
          git.add
        )));
      }
    }

    for dep in &self.dependencies {
      dep.placement()?;
    }
    for import in &self.imports {
      import.placement()?;
    }

    Ok(())
  }
}

/// Source of a mount.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MountSource {
  /// A fresh per-build temporary directory.
  TmpDir,
  /// A directory shared between builds of the project.
  BuildDir,
  /// A host path.
  Custom(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountConfig {
  pub from: MountSource,
  pub to: String,
}

/// A git repository subtree bound into the image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GitMappingConfig {
  /// Optional name distinguishing several mappings of one repository.
  pub name: Option<String>,
  pub add: String,
  pub to: String,
  pub owner: Option<String>,
  pub group: Option<String>,
  pub include_paths: Vec<String>,
  pub exclude_paths: Vec<String>,
  pub branch: Option<String>,
  pub tag: Option<String>,
  pub commit: Option<String>,
  pub stage_dependencies: StageDependenciesConfig,
}

/// Globs whose content changes force a user stage rebuild.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StageDependenciesConfig {
  pub install: Vec<String>,
  pub before_setup: Vec<String>,
  pub setup: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ShellStageConfig {
  pub commands: Vec<String>,
  pub cache_version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ShellConfig {
  pub before_install: ShellStageConfig,
  pub install: ShellStageConfig,
  pub before_setup: ShellStageConfig,
  pub setup: ShellStageConfig,
  /// Folded into every user stage digest.
  pub cache_version: Option<String>,
}

/// Where a dependency or import is applied in the stapel stage list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Placement {
  BeforeInstall,
  AfterInstall,
  BeforeSetup,
  AfterSetup,
}

fn placement_from(before: Option<&str>, after: Option<&str>) -> Result<Placement, ConfigError> {
  match (before, after) {
    (Some("install"), None) => Ok(Placement::BeforeInstall),
    (Some("setup"), None) => Ok(Placement::BeforeSetup),
    (None, Some("install")) => Ok(Placement::AfterInstall),
    (None, Some("setup")) => Ok(Placement::AfterSetup),
    (None, None) => Err(ConfigError::Invalid("one of 'before' or 'after' is required".to_string())),
    (Some(_), Some(_)) => Err(ConfigError::Invalid(
      "'before' and 'after' are mutually exclusive".to_string(),
    )),
    (Some(stage), None) | (None, Some(stage)) => Err(ConfigError::Invalid(format!(
      "unsupported stage '{}', expected 'install' or 'setup'",
      stage
    ))),
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionConfig {
  #[serde(rename = "type")]
  pub type_: ProjectionType,
  pub target_env: String,
}

/// A cross-image dependency.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DependencyConfig {
  pub image: String,
  pub before: Option<String>,
  pub after: Option<String>,
  pub imports: Vec<ProjectionConfig>,
}

impl DependencyConfig {
  pub fn placement(&self) -> Result<Placement, ConfigError> {
    placement_from(self.before.as_deref(), self.after.as_deref())
  }
}

/// Files imported from another image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ImportConfig {
  pub image: String,
  pub stage: Option<String>,
  pub add: String,
  pub to: String,
  pub owner: Option<String>,
  pub group: Option<String>,
  pub include_paths: Vec<String>,
  pub exclude_paths: Vec<String>,
  pub before: Option<String>,
  pub after: Option<String>,
}

impl ImportConfig {
  pub fn placement(&self) -> Result<Placement, ConfigError> {
    placement_from(self.before.as_deref(), self.after.as_deref())
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DockerInstructionsConfig {
  pub volume: Vec<String>,
  pub expose: Vec<String>,
  pub env: BTreeMap<String, String>,
  pub label: BTreeMap<String, String>,
  pub cmd: Option<String>,
  pub entrypoint: Option<String>,
  pub workdir: Option<String>,
  pub user: Option<String>,
  pub health_check: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DockerfileConfig {
  /// Dockerfile path, relative to the context unless absolute.
  pub path: PathBuf,
  /// Build context directory.
  pub context: PathBuf,
  pub target: Option<String>,
  pub args: BTreeMap<String, String>,
  pub add_host: Vec<String>,
  pub image_cache_version: Option<String>,
  pub dependencies: Vec<DependencyConfig>,
}
