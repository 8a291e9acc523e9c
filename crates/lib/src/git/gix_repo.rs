//! gix-backed repository access.
//!
//! Local repositories are opened in place. Remote repositories are cloned
//! bare into a cache directory on first use and fetched on later uses.

use std::fs;
use std::path::{Path, PathBuf};

use gix::objs::tree::EntryKind;
use gix::remote::Direction;
use tracing::{debug, info};

use super::{EntryMode, GitError, GitRepo, TreeEntry};

/// Repository name used for the project's own working tree.
pub const LOCAL_REPO_NAME: &str = "own";

pub struct GixRepo {
  name: String,
  path: PathBuf,
  local: bool,
  repo: gix::ThreadSafeRepository,
}

impl std::fmt::Debug for GixRepo {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("GixRepo")
      .field("name", &self.name)
      .field("path", &self.path)
      .field("local", &self.local)
      .finish()
  }
}

fn boxed<E: std::error::Error + Send + Sync + 'static>(e: E) -> Box<dyn std::error::Error + Send + Sync> {
  Box::new(e)
}

impl GixRepo {
  /// Open the project's own repository at `path`.
  pub fn open_local(path: &Path) -> Result<Self, GitError> {
    let path = dunce::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    debug!(path = %path.display(), "opening local repository");
    let repo = gix::ThreadSafeRepository::open(&path).map_err(|e| GitError::Open {
      path: path.display().to_string(),
      source: boxed(e),
    })?;

    Ok(Self {
      name: LOCAL_REPO_NAME.to_string(),
      path,
      local: true,
      repo,
    })
  }

  /// Clone `url` into `cache_dir/<name>`, or fetch updates into an existing
  /// clone.
  pub fn open_remote(name: &str, url: &str, cache_dir: &Path) -> Result<Self, GitError> {
    let path = cache_dir.join(name);
    fs::create_dir_all(cache_dir).map_err(|source| GitError::Write {
      path: cache_dir.display().to_string(),
      source,
    })?;

    let repo = if path.exists() {
      debug!(name, path = %path.display(), "opening cached clone");
      let repo = gix::open(&path).map_err(|e| GitError::Open {
        path: path.display().to_string(),
        source: boxed(e),
      })?;
      fetch_updates(&repo, url)?;
      repo
    } else {
      info!(name, url, path = %path.display(), "cloning repository");
      let mut prepared = gix::prepare_clone_bare(url, &path).map_err(|e| GitError::Clone {
        url: url.to_string(),
        source: boxed(e),
      })?;
      let (repo, _outcome) = prepared
        .fetch_only(gix::progress::Discard, &gix::interrupt::IS_INTERRUPTED)
        .map_err(|e| GitError::Clone {
          url: url.to_string(),
          source: boxed(e),
        })?;
      repo
    };

    Ok(Self {
      name: name.to_string(),
      path,
      local: false,
      repo: repo.into_sync(),
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  fn thread_local(&self) -> gix::Repository {
    self.repo.to_thread_local()
  }

  fn resolve(&self, spec: &str) -> Result<String, GitError> {
    let repo = self.thread_local();
    let resolved = repo.rev_parse(spec).map_err(|e| GitError::Reference {
      reference: spec.to_string(),
      message: e.to_string(),
    })?;
    let id = resolved.single().ok_or_else(|| GitError::Reference {
      reference: spec.to_string(),
      message: "ambiguous".to_string(),
    })?;
    Ok(id.to_string())
  }
}

fn fetch_updates(repo: &gix::Repository, url: &str) -> Result<(), GitError> {
  debug!(url, "fetching updates");

  let remote = repo
    .find_default_remote(Direction::Fetch)
    .ok_or_else(|| GitError::Reference {
      reference: "origin".to_string(),
      message: "no remote configured".to_string(),
    })?
    .map_err(|e| GitError::Clone {
      url: url.to_string(),
      source: boxed(e),
    })?;

  let connection = remote.connect(Direction::Fetch).map_err(|e| GitError::Clone {
    url: url.to_string(),
    source: boxed(e),
  })?;

  connection
    .prepare_fetch(gix::progress::Discard, Default::default())
    .map_err(|e| GitError::Clone {
      url: url.to_string(),
      source: boxed(e),
    })?
    .receive(gix::progress::Discard, &gix::interrupt::IS_INTERRUPTED)
    .map_err(|e| GitError::Clone {
      url: url.to_string(),
      source: boxed(e),
    })?;

  Ok(())
}

fn parse_oid(id: &str) -> Result<gix::ObjectId, GitError> {
  gix::ObjectId::from_hex(id.as_bytes()).map_err(|_| GitError::InvalidObjectId(id.to_string()))
}

impl GitRepo for GixRepo {
  fn name(&self) -> &str {
    &self.name
  }

  fn is_local(&self) -> bool {
    self.local
  }

  fn head_commit(&self) -> Result<String, GitError> {
    let repo = self.thread_local();
    let mut head = repo.head().map_err(|e| GitError::Reference {
      reference: "HEAD".to_string(),
      message: e.to_string(),
    })?;
    let commit = head.peel_to_commit().map_err(|e| GitError::Reference {
      reference: "HEAD".to_string(),
      message: e.to_string(),
    })?;
    Ok(commit.id.to_string())
  }

  fn tag_commit(&self, tag: &str) -> Result<String, GitError> {
    self.resolve(&format!("refs/tags/{}^{{commit}}", tag))
  }

  fn branch_commit(&self, branch: &str) -> Result<String, GitError> {
    let local = format!("refs/heads/{}^{{commit}}", branch);
    match self.resolve(&local) {
      Ok(id) => Ok(id),
      Err(_) => self.resolve(&format!("refs/remotes/origin/{}^{{commit}}", branch)),
    }
  }

  fn commit_exists(&self, commit: &str) -> Result<bool, GitError> {
    let Ok(oid) = parse_oid(commit) else {
      return Ok(false);
    };
    let repo = self.thread_local();
    let object = repo.try_find_object(oid).map_err(|e| GitError::Object {
      id: commit.to_string(),
      source: boxed(e),
    })?;
    Ok(object.is_some_and(|o| o.kind == gix::object::Kind::Commit))
  }

  fn ls_tree(&self, commit: &str) -> Result<Vec<TreeEntry>, GitError> {
    let oid = parse_oid(commit)?;
    let repo = self.thread_local();

    let tree_error = |e: Box<dyn std::error::Error + Send + Sync>| GitError::Tree {
      commit: commit.to_string(),
      source: e,
    };

    let object = repo
      .try_find_object(oid)
      .map_err(|e| tree_error(boxed(e)))?
      .ok_or_else(|| GitError::ObjectNotFound(commit.to_string()))?;
    let commit_object = object.try_into_commit().map_err(|e| tree_error(boxed(e)))?;
    let tree = commit_object.tree().map_err(|e| tree_error(boxed(e)))?;

    let mut recorder = gix::traverse::tree::Recorder::default();
    tree
      .traverse()
      .breadthfirst(&mut recorder)
      .map_err(|e| tree_error(boxed(e)))?;

    let mut entries: Vec<TreeEntry> = recorder
      .records
      .into_iter()
      .filter_map(|record| {
        let mode = match record.mode.kind() {
          EntryKind::Tree => return None,
          EntryKind::Blob => EntryMode::Blob,
          EntryKind::BlobExecutable => EntryMode::BlobExecutable,
          EntryKind::Link => EntryMode::Link,
          EntryKind::Commit => EntryMode::Commit,
        };
        Some(TreeEntry {
          path: record.filepath.to_string(),
          mode,
          oid: record.oid.to_string(),
        })
      })
      .collect();
    entries.sort();

    Ok(entries)
  }

  fn read_blob(&self, oid: &str) -> Result<Vec<u8>, GitError> {
    let id = parse_oid(oid)?;
    let repo = self.thread_local();
    let object = repo.find_object(id).map_err(|e| GitError::Object {
      id: oid.to_string(),
      source: boxed(e),
    })?;
    Ok(object.detach().data)
  }
}
