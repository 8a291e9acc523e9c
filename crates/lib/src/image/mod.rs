//! Working and built images.
//!
//! The engine never talks to a container runtime directly. Stages mutate a
//! `WorkingImage` through the primitives below, and read previously built
//! images as `BuiltImage` descriptions (id, parent, creation time, labels).
//!
//! `DirImage` implements `WorkingImage` over a plain directory, which is what
//! the applier tests and the CLI use.

pub mod dir_image;
pub mod labels;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::git::ArchiveType;
use crate::git::diff::DiffError;

pub use dir_image::DirImage;

/// Errors raised by working image operations.
#[derive(Debug, Error)]
pub enum ImageError {
  #[error("i/o error on '{path}': {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to unpack archive '{path}': {source}")]
  Unpack {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to apply patch: {0}")]
  Patch(#[from] DiffError),

  #[error("path '{0}' escapes the image root")]
  PathEscape(String),

  #[error("operation not supported by this image: {0}")]
  Unsupported(String),

  #[error("runtime error: {0}")]
  Runtime(String),
}

/// Description of an image stored by a previous build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BuiltImage {
  pub id: String,
  /// Full reference (`repo:tag`).
  pub name: String,
  pub parent_id: Option<String>,
  /// Creation time, seconds since the epoch.
  pub created_at: u64,
  pub labels: BTreeMap<String, String>,
}

impl BuiltImage {
  pub fn label(&self, key: &str) -> Option<&str> {
    self.labels.get(key).map(String::as_str)
  }
}

/// Unpack an archive into the image.
#[derive(Debug, Clone)]
pub struct ArchiveRequest<'a> {
  pub archive: &'a Path,
  pub archive_type: ArchiveType,
  /// Mapping destination. Directory archives unpack into it, file archives
  /// into its parent directory.
  pub to: &'a str,
  pub owner: Option<&'a str>,
  pub group: Option<&'a str>,
}

impl ArchiveRequest<'_> {
  /// Directory the archive entries are relative to.
  pub fn target_dir(&self) -> String {
    match self.archive_type {
      ArchiveType::Directory => self.to.to_string(),
      ArchiveType::File => parent_dir(self.to),
    }
  }
}

/// Apply a unified diff inside the image.
#[derive(Debug, Clone)]
pub struct PatchRequest<'a> {
  pub patch: &'a Path,
  /// Directory the patch paths are relative to.
  pub to: &'a str,
  pub owner: Option<&'a str>,
  pub group: Option<&'a str>,
}

/// Copy files out of another image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRequest {
  pub image_name: String,
  pub add: String,
  pub to: String,
  pub include_paths: Vec<String>,
  pub exclude_paths: Vec<String>,
  pub owner: Option<String>,
  pub group: Option<String>,
}

/// Build a Dockerfile target into the image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DockerfileBuildRequest {
  pub dockerfile: PathBuf,
  pub context: PathBuf,
  pub target: Option<String>,
  pub build_args: BTreeMap<String, String>,
  pub add_host: Vec<String>,
}

/// Image config instruction not covered by the other primitives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigChange {
  Cmd(String),
  Entrypoint(String),
  Workdir(String),
  User(String),
  Expose(Vec<String>),
  HealthCheck(String),
}

/// The image a stage mutates.
pub trait WorkingImage {
  fn add_volumes(&mut self, volumes: &[String]) -> Result<(), ImageError>;

  fn add_labels(&mut self, labels: &BTreeMap<String, String>) -> Result<(), ImageError>;

  fn add_envs(&mut self, envs: &BTreeMap<String, String>) -> Result<(), ImageError>;

  fn run_commands(&mut self, commands: &[String]) -> Result<(), ImageError>;

  /// Labels set on the image so far, inherited ones included.
  fn labels(&self) -> BTreeMap<String, String>;

  fn add_data_archive(&mut self, request: &ArchiveRequest<'_>) -> Result<(), ImageError>;

  /// Remove `paths` (relative to `base`). With `prune_empty_parents`,
  /// directories left empty are removed too, never `base` itself.
  fn remove_paths(&mut self, base: &str, paths: &[String], prune_empty_parents: bool) -> Result<(), ImageError>;

  fn apply_patch(&mut self, request: &PatchRequest<'_>) -> Result<(), ImageError>;

  fn apply_config(&mut self, change: &ConfigChange) -> Result<(), ImageError>;

  fn import_files(&mut self, request: &ImportRequest) -> Result<(), ImageError> {
    Err(ImageError::Unsupported(format!("import from '{}'", request.image_name)))
  }

  fn build_dockerfile(&mut self, request: &DockerfileBuildRequest) -> Result<(), ImageError> {
    Err(ImageError::Unsupported(format!(
      "dockerfile build of '{}'",
      request.dockerfile.display()
    )))
  }
}

/// Parent of an absolute image path, `/` for top-level entries.
pub fn parent_dir(path: &str) -> String {
  let trimmed = path.trim_end_matches('/');
  match trimmed.rfind('/') {
    Some(0) | None => "/".to_string(),
    Some(i) => trimmed[..i].to_string(),
  }
}

/// Join an absolute image directory and a relative path.
pub fn join_image_path(dir: &str, rel: &str) -> String {
  let dir = dir.trim_end_matches('/');
  if rel.is_empty() {
    return if dir.is_empty() { "/".to_string() } else { dir.to_string() };
  }
  format!("{}/{}", dir, rel.trim_start_matches('/'))
}
