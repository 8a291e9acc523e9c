//! Scratch files for archives and patches.
//!
//! Every pipeline owns one `GitDataManager`, which creates a unique directory
//! under the configured scratch root. Concurrent pipelines therefore never
//! share a path, and the directory is removed when the manager is dropped.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use tempfile::TempDir;
use tracing::debug;

use super::GitError;

#[derive(Debug)]
pub struct GitDataManager {
  dir: TempDir,
  counter: AtomicUsize,
}

impl GitDataManager {
  /// Create a unique scratch directory beneath `root`.
  pub fn new(root: &Path) -> Result<Self, GitError> {
    fs::create_dir_all(root).map_err(|source| GitError::Write {
      path: root.display().to_string(),
      source,
    })?;

    let dir = tempfile::Builder::new()
      .prefix("stagecraft-git-")
      .tempdir_in(root)
      .map_err(|source| GitError::Write {
        path: root.display().to_string(),
        source,
      })?;

    debug!(path = %dir.path().display(), "created git scratch directory");
    Ok(Self {
      dir,
      counter: AtomicUsize::new(0),
    })
  }

  pub fn path(&self) -> &Path {
    self.dir.path()
  }

  /// A fresh path for a file with the given stem and extension.
  pub fn new_file_path(&self, stem: &str, extension: &str) -> PathBuf {
    let n = self.counter.fetch_add(1, Ordering::SeqCst);
    self.dir.path().join(format!("{}-{}.{}", stem, n, extension))
  }

  /// Write `content` to a fresh scratch file.
  pub fn write_file(&self, stem: &str, extension: &str, content: &[u8]) -> Result<PathBuf, GitError> {
    let path = self.new_file_path(stem, extension);
    fs::write(&path, content).map_err(|source| GitError::Write {
      path: path.display().to_string(),
      source,
    })?;
    Ok(path)
  }
}
