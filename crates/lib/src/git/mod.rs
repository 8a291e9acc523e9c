//! Git repository access for the incremental applier.
//!
//! This module provides:
//! - `GitRepo`: the read-only repository surface every git operation builds on
//! - `GixRepo`: the gix-backed implementation for local and cloned repositories
//! - `CachedRepo`: a wrapper memoising tree listings with per-commit locking
//! - archive creation (`archive`), structured patches (`diff`) and scratch
//!   file management (`data`)
//!
//! All paths handed to and returned from this module are repository-relative,
//! `/`-separated and carry no leading `/`.

pub mod archive;
pub mod cache;
pub mod data;
pub mod diff;
pub mod gix_repo;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::BINARY_DETECTION_LEN;
use crate::path_matcher::{PathMatcher, is_subpath};
use crate::util::hash::{Digest, sha256_args};

pub use archive::{Archive, ArchiveOptions, create_archive};
pub use cache::{CachedRepo, KeyedCache};
pub use data::GitDataManager;
pub use diff::{Patch, PatchOptions, create_patch};
pub use gix_repo::GixRepo;

/// Errors raised by git operations.
#[derive(Debug, Error)]
pub enum GitError {
  #[error("failed to open repository at '{path}': {source}")]
  Open {
    path: String,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
  },

  #[error("failed to clone repository '{url}': {source}")]
  Clone {
    url: String,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
  },

  #[error("failed to resolve '{reference}': {message}")]
  Reference { reference: String, message: String },

  #[error("invalid object id '{0}'")]
  InvalidObjectId(String),

  #[error("object '{0}' not found")]
  ObjectNotFound(String),

  #[error("failed to read object '{id}': {source}")]
  Object {
    id: String,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
  },

  #[error("failed to walk tree of commit '{commit}': {source}")]
  Tree {
    commit: String,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
  },

  #[error("failed to write '{path}': {source}")]
  Write {
    path: String,
    #[source]
    source: std::io::Error,
  },
}

/// Kind of a non-tree entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntryMode {
  Blob,
  BlobExecutable,
  Link,
  /// A submodule commit pointer.
  Commit,
}

impl EntryMode {
  /// Octal mode string as printed by git.
  pub fn as_octal(&self) -> &'static str {
    match self {
      Self::Blob => "100644",
      Self::BlobExecutable => "100755",
      Self::Link => "120000",
      Self::Commit => "160000",
    }
  }

  pub fn is_blob(&self) -> bool {
    matches!(self, Self::Blob | Self::BlobExecutable)
  }
}

/// One non-tree entry of a commit's tree.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TreeEntry {
  pub path: String,
  pub mode: EntryMode,
  pub oid: String,
}

/// What a path names inside a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
  File,
  Directory,
  Submodule,
}

/// Structural type of an archive, recorded in image labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveType {
  File,
  Directory,
}

impl ArchiveType {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::File => "file",
      Self::Directory => "directory",
    }
  }

  pub fn parse(value: &str) -> Option<Self> {
    match value {
      "file" => Some(Self::File),
      "directory" => Some(Self::Directory),
      _ => None,
    }
  }
}

impl std::fmt::Display for ArchiveType {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Read-only access to a git repository.
///
/// Implementations must be safe to share between image pipelines.
pub trait GitRepo: Send + Sync {
  /// Name used in mapping identities (`own` for the project repository).
  fn name(&self) -> &str;

  /// Whether the repository is the local working tree rather than a clone.
  fn is_local(&self) -> bool;

  fn head_commit(&self) -> Result<String, GitError>;

  fn tag_commit(&self, tag: &str) -> Result<String, GitError>;

  fn branch_commit(&self, branch: &str) -> Result<String, GitError>;

  /// Whether `commit` names an existing commit object.
  fn commit_exists(&self, commit: &str) -> Result<bool, GitError>;

  /// Every non-tree entry of `commit`, sorted by path.
  fn ls_tree(&self, commit: &str) -> Result<Vec<TreeEntry>, GitError>;

  fn read_blob(&self, oid: &str) -> Result<Vec<u8>, GitError>;

  /// What `path` names at `commit`, `None` when nothing is there.
  fn path_kind(&self, commit: &str, path: &str) -> Result<Option<PathKind>, GitError> {
    if path.is_empty() {
      return Ok(Some(PathKind::Directory));
    }
    let entries = self.ls_tree(commit)?;
    for entry in &entries {
      if entry.path == path {
        return Ok(Some(if entry.mode == EntryMode::Commit {
          PathKind::Submodule
        } else {
          PathKind::File
        }));
      }
      if is_subpath(path, &entry.path) {
        return Ok(Some(PathKind::Directory));
      }
    }
    Ok(None)
  }
}

/// Entries of `commit` accepted by `matcher`.
pub fn list_entries(repo: &dyn GitRepo, commit: &str, matcher: &PathMatcher) -> Result<Vec<TreeEntry>, GitError> {
  Ok(
    repo
      .ls_tree(commit)?
      .into_iter()
      .filter(|e| matcher.is_path_matched(&e.path))
      .collect(),
  )
}

/// Checksum of a tree listing: order of `entries` does not matter.
pub fn ls_tree_checksum(entries: &[TreeEntry]) -> Digest {
  let mut sorted: Vec<&TreeEntry> = entries.iter().collect();
  sorted.sort();
  sha256_args(
    sorted
      .into_iter()
      .map(|e| format!("{} {} {}", e.mode.as_octal(), e.oid, e.path)),
  )
}

/// Result of checksumming several globs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checksum {
  pub value: Digest,
  /// Globs that matched nothing.
  pub no_match_paths: Vec<String>,
}

/// Checksum of the entries under `matcher` that match each glob in `globs`.
///
/// Globs are relative to the matcher's base path. Each glob contributes the
/// checksum of its own listing, in declaration order.
pub fn globs_checksum(
  repo: &dyn GitRepo,
  commit: &str,
  matcher: &PathMatcher,
  globs: &[String],
) -> Result<Checksum, GitError> {
  let entries = list_entries(repo, commit, matcher)?;
  let mut parts = Vec::with_capacity(globs.len());
  let mut no_match_paths = Vec::new();

  for glob in globs {
    let glob_matcher = PathMatcher::new(matcher.base_path(), std::slice::from_ref(glob), &[]);
    let glob_matcher = match glob_matcher {
      Ok(m) => m,
      Err(_) => {
        no_match_paths.push(glob.clone());
        continue;
      }
    };

    let matched: Vec<TreeEntry> = entries
      .iter()
      .filter(|e| glob_matcher.is_path_matched(&e.path))
      .cloned()
      .collect();

    if matched.is_empty() {
      no_match_paths.push(glob.clone());
      continue;
    }
    parts.push(ls_tree_checksum(&matched).0);
  }

  Ok(Checksum {
    value: sha256_args(parts),
    no_match_paths,
  })
}

/// Whether a blob must be transferred as binary content.
pub fn is_binary(content: &[u8]) -> bool {
  let head = &content[..content.len().min(BINARY_DETECTION_LEN)];
  head.contains(&0) || std::str::from_utf8(content).is_err()
}

/// Map a repository path to its location inside the mapping destination.
///
/// The path is made relative to `scope` and then renamed through `renames`
/// (keyed by repository path).
pub fn project_path(scope: &str, renames: &BTreeMap<String, String>, path: &str) -> Option<String> {
  if let Some(renamed) = renames.get(path) {
    return Some(renamed.clone());
  }
  if scope.is_empty() {
    return Some(path.to_string());
  }
  path
    .strip_prefix(scope)
    .and_then(|rest| rest.strip_prefix('/'))
    .map(str::to_string)
}
