//! Build context checksums for ADD and COPY sources.
//!
//! A checksum covers every context file matched by the instruction's
//! sources after `.dockerignore` filtering. Matched files are listed as
//! tree entries (`mode oid path`) and folded through
//! [`ls_tree_checksum`](crate::git::ls_tree_checksum). Directory contexts
//! use content hashes as object ids, git contexts use blob ids.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;
use walkdir::WalkDir;

use super::DockerfileError;
use crate::consts::DOCKERIGNORE_FILE;
use crate::git::{EntryMode, GitRepo, TreeEntry, ls_tree_checksum};
use crate::path_matcher::{PathMatcher, glob_matches, normalize_path};
use crate::util::hash::{Digest, hash_bytes, hash_file, sha256_args};

/// Source of the files ADD and COPY read.
pub trait BuildContext {
  /// Checksum of the context files matched by `sources` (raw, already
  /// expanded ADD/COPY sources).
  fn files_checksum(&self, sources: &[String]) -> Result<Digest, DockerfileError>;
}

/// Normalise ADD/COPY sources into context-relative patterns.
///
/// `/` and `.` select the whole context.
pub fn normalize_sources(sources: &[String]) -> Vec<String> {
  sources.iter().map(|s| normalize_path(s)).collect()
}

fn checksum_of(entries: &[TreeEntry]) -> Digest {
  let inner = if entries.is_empty() {
    String::new()
  } else {
    ls_tree_checksum(entries).0
  };
  sha256_args([inner])
}

fn sources_matcher(base: &str, sources: &[String]) -> Result<PathMatcher, DockerfileError> {
  let patterns = normalize_sources(sources);
  PathMatcher::new(base, patterns.as_slice(), &[])
    .map_err(|e| DockerfileError::Context(e.to_string()))
}

/// `.dockerignore` rules.
#[derive(Debug, Clone, Default)]
pub struct DockerIgnore {
  rules: Vec<IgnoreRule>,
}

#[derive(Debug, Clone)]
struct IgnoreRule {
  pattern: String,
  negated: bool,
}

impl DockerIgnore {
  pub fn parse(content: &str) -> Self {
    let rules = content
      .lines()
      .map(str::trim)
      .filter(|line| !line.is_empty() && !line.starts_with('#'))
      .filter_map(|line| {
        let (negated, pattern) = match line.strip_prefix('!') {
          Some(rest) => (true, rest.trim()),
          None => (false, line),
        };
        let pattern = normalize_path(pattern);
        (!pattern.is_empty()).then_some(IgnoreRule { pattern, negated })
      })
      .collect();
    Self { rules }
  }

  /// Read `.dockerignore` from `dir`; a missing file ignores nothing.
  pub fn load(dir: &Path) -> Result<Self, DockerfileError> {
    let path = dir.join(DOCKERIGNORE_FILE);
    match fs::read_to_string(&path) {
      Ok(content) => Ok(Self::parse(&content)),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
      Err(source) => Err(DockerfileError::Io { path, source }),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.rules.is_empty()
  }

  /// Whether a context-relative path is excluded. The last matching rule
  /// wins; a rule matching a parent directory matches the path.
  pub fn is_excluded(&self, path: &str) -> bool {
    let path = normalize_path(path);
    let mut excluded = false;
    for rule in &self.rules {
      if rule_matches(&rule.pattern, &path) {
        excluded = !rule.negated;
      }
    }
    excluded
  }
}

fn rule_matches(pattern: &str, path: &str) -> bool {
  let mut candidate = path;
  loop {
    if glob_matches(pattern, candidate).unwrap_or(false) {
      return true;
    }
    match candidate.rfind('/') {
      Some(i) => candidate = &candidate[..i],
      None => return false,
    }
  }
}

/// A build context on the local filesystem.
#[derive(Debug, Clone)]
pub struct DirContext {
  root: PathBuf,
  ignore: DockerIgnore,
}

impl DirContext {
  /// Use `root` as context, honouring its `.dockerignore`.
  pub fn new(root: &Path) -> Result<Self, DockerfileError> {
    Ok(Self {
      root: root.to_path_buf(),
      ignore: DockerIgnore::load(root)?,
    })
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  fn entries(&self) -> Result<Vec<TreeEntry>, DockerfileError> {
    let mut entries = Vec::new();
    for entry in WalkDir::new(&self.root).sort_by_file_name() {
      let entry = entry.map_err(|e| DockerfileError::Context(e.to_string()))?;
      let Ok(rel) = entry.path().strip_prefix(&self.root) else {
        continue;
      };
      let rel = rel.to_string_lossy().replace('\\', "/");
      if rel.is_empty() || self.ignore.is_excluded(&rel) {
        continue;
      }

      let file_type = entry.file_type();
      let (mode, oid) = if file_type.is_symlink() {
        let target = fs::read_link(entry.path()).map_err(|source| DockerfileError::Io {
          path: entry.path().to_path_buf(),
          source,
        })?;
        (EntryMode::Link, hash_bytes(target.to_string_lossy().as_bytes()).0)
      } else if file_type.is_file() {
        let hash = hash_file(entry.path()).map_err(|e| DockerfileError::Context(e.to_string()))?;
        (file_mode(entry.path()), hash.0)
      } else {
        continue;
      };
      entries.push(TreeEntry { path: rel, mode, oid });
    }
    Ok(entries)
  }
}

#[cfg(unix)]
fn file_mode(path: &Path) -> EntryMode {
  use std::os::unix::fs::PermissionsExt;
  match fs::metadata(path) {
    Ok(meta) if meta.permissions().mode() & 0o111 != 0 => EntryMode::BlobExecutable,
    _ => EntryMode::Blob,
  }
}

#[cfg(not(unix))]
fn file_mode(_path: &Path) -> EntryMode {
  EntryMode::Blob
}

impl BuildContext for DirContext {
  fn files_checksum(&self, sources: &[String]) -> Result<Digest, DockerfileError> {
    let matcher = sources_matcher("", sources)?;
    let matched: Vec<TreeEntry> = self
      .entries()?
      .into_iter()
      .filter(|e| matcher.is_path_matched(&e.path))
      .collect();
    debug!(sources = ?sources, files = matched.len(), root = %self.root.display(), "checksummed context files");
    Ok(checksum_of(&matched))
  }
}

/// A build context read from a git commit.
pub struct GitContext {
  repo: Arc<dyn GitRepo>,
  commit: String,
  /// Context directory inside the repository.
  scope: String,
  ignore: DockerIgnore,
}

impl GitContext {
  /// Use directory `scope` of `commit` as context, honouring the committed
  /// `.dockerignore`.
  pub fn new(repo: Arc<dyn GitRepo>, commit: &str, scope: &str) -> Result<Self, DockerfileError> {
    let scope = normalize_path(scope);
    let ignore_path = if scope.is_empty() {
      DOCKERIGNORE_FILE.to_string()
    } else {
      format!("{}/{}", scope, DOCKERIGNORE_FILE)
    };

    let entries = repo.ls_tree(commit).map_err(|e| DockerfileError::Context(e.to_string()))?;
    let ignore = match entries.iter().find(|e| e.path == ignore_path) {
      Some(entry) => {
        let content = repo
          .read_blob(&entry.oid)
          .map_err(|e| DockerfileError::Context(e.to_string()))?;
        DockerIgnore::parse(&String::from_utf8_lossy(&content))
      }
      None => DockerIgnore::default(),
    };

    Ok(Self {
      repo,
      commit: commit.to_string(),
      scope,
      ignore,
    })
  }
}

impl BuildContext for GitContext {
  fn files_checksum(&self, sources: &[String]) -> Result<Digest, DockerfileError> {
    let matcher = sources_matcher(&self.scope, sources)?;
    let entries = self
      .repo
      .ls_tree(&self.commit)
      .map_err(|e| DockerfileError::Context(e.to_string()))?;

    let matched: Vec<TreeEntry> = entries
      .into_iter()
      .filter(|e| matcher.is_path_matched(&e.path))
      .filter(|e| {
        let rel = matcher.relative_to_base(&e.path).unwrap_or(&e.path);
        !self.ignore.is_excluded(rel)
      })
      .collect();
    debug!(sources = ?sources, files = matched.len(), commit = %self.commit, "checksummed context files");
    Ok(checksum_of(&matched))
  }
}
