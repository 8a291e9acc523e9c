//! Test utilities for stagecraft-lib.
//!
//! `MemoryRepo` is an in-memory `GitRepo` whose commits are full snapshots.
//! `MemoryImage` records every call made on a `WorkingImage`.
//! `MemoryStorage` keeps committed stage images in memory.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::git::{EntryMode, GitError, GitRepo, TreeEntry};
use crate::image::{
  ArchiveRequest, BuiltImage, ConfigChange, DockerfileBuildRequest, ImageError, ImportRequest, PatchRequest,
  WorkingImage,
};
use crate::stage::{StageName, StageStorage, StorageError};
use crate::util::hash::{Digest, hash_bytes};

/// In-memory repository.
#[derive(Debug, Clone, Default)]
pub struct MemoryRepo {
  name: String,
  local: bool,
  commits: HashMap<String, Vec<TreeEntry>>,
  blobs: HashMap<String, Vec<u8>>,
  tags: HashMap<String, String>,
  branches: HashMap<String, String>,
  head: Option<String>,
  counter: usize,
}

impl MemoryRepo {
  pub fn new(name: &str) -> Self {
    Self {
      name: name.to_string(),
      local: true,
      ..Default::default()
    }
  }

  /// Record a snapshot commit of regular files and make it HEAD.
  pub fn commit(&mut self, files: &[(&str, &str)]) -> String {
    let files: Vec<(&str, EntryMode, &[u8])> = files
      .iter()
      .map(|(path, content)| (*path, EntryMode::Blob, content.as_bytes()))
      .collect();
    self.commit_entries(&files)
  }

  /// Record a snapshot commit with explicit modes and binary content.
  pub fn commit_entries(&mut self, files: &[(&str, EntryMode, &[u8])]) -> String {
    self.counter += 1;
    let mut entries = Vec::new();
    for (path, mode, content) in files {
      let oid = hash_bytes(content).0[..40].to_string();
      self.blobs.insert(oid.clone(), content.to_vec());
      entries.push(TreeEntry {
        path: path.to_string(),
        mode: *mode,
        oid,
      });
    }
    entries.sort();

    let mut seed = format!("commit {}\n", self.counter);
    for entry in &entries {
      seed.push_str(&format!("{} {} {}\n", entry.mode.as_octal(), entry.oid, entry.path));
    }
    let id = hash_bytes(seed.as_bytes()).0[..40].to_string();

    self.commits.insert(id.clone(), entries);
    self.head = Some(id.clone());
    id
  }

  pub fn tag(&mut self, name: &str, commit: &str) {
    self.tags.insert(name.to_string(), commit.to_string());
  }

  pub fn branch(&mut self, name: &str, commit: &str) {
    self.branches.insert(name.to_string(), commit.to_string());
  }

  /// Forget a commit, as after a history rewrite.
  pub fn drop_commit(&mut self, commit: &str) {
    self.commits.remove(commit);
  }
}

impl GitRepo for MemoryRepo {
  fn name(&self) -> &str {
    &self.name
  }

  fn is_local(&self) -> bool {
    self.local
  }

  fn head_commit(&self) -> Result<String, GitError> {
    self.head.clone().ok_or_else(|| GitError::Reference {
      reference: "HEAD".to_string(),
      message: "no commits".to_string(),
    })
  }

  fn tag_commit(&self, tag: &str) -> Result<String, GitError> {
    self.tags.get(tag).cloned().ok_or_else(|| GitError::Reference {
      reference: format!("refs/tags/{}", tag),
      message: "not found".to_string(),
    })
  }

  fn branch_commit(&self, branch: &str) -> Result<String, GitError> {
    self.branches.get(branch).cloned().ok_or_else(|| GitError::Reference {
      reference: format!("refs/heads/{}", branch),
      message: "not found".to_string(),
    })
  }

  fn commit_exists(&self, commit: &str) -> Result<bool, GitError> {
    Ok(self.commits.contains_key(commit))
  }

  fn ls_tree(&self, commit: &str) -> Result<Vec<TreeEntry>, GitError> {
    self
      .commits
      .get(commit)
      .cloned()
      .ok_or_else(|| GitError::ObjectNotFound(commit.to_string()))
  }

  fn read_blob(&self, oid: &str) -> Result<Vec<u8>, GitError> {
    self
      .blobs
      .get(oid)
      .cloned()
      .ok_or_else(|| GitError::ObjectNotFound(oid.to_string()))
  }
}

/// One recorded `WorkingImage` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageCall {
  Volumes(Vec<String>),
  Labels(BTreeMap<String, String>),
  Envs(BTreeMap<String, String>),
  Commands(Vec<String>),
  Archive { archive_type: String, to: String },
  RemovePaths {
    base: String,
    paths: Vec<String>,
    prune_empty_parents: bool,
  },
  Patch { to: String },
  Config(ConfigChange),
  Import(ImportRequest),
  Dockerfile(DockerfileBuildRequest),
}

/// Working image that only records what it is asked to do.
#[derive(Debug, Default)]
pub struct MemoryImage {
  pub calls: Vec<ImageCall>,
  labels: BTreeMap<String, String>,
}

impl MemoryImage {
  pub fn new() -> Self {
    Self::default()
  }

  /// A working image inheriting the labels of its parent.
  pub fn with_labels(labels: BTreeMap<String, String>) -> Self {
    Self {
      calls: Vec::new(),
      labels,
    }
  }

  pub fn commands(&self) -> Vec<String> {
    self
      .calls
      .iter()
      .filter_map(|c| match c {
        ImageCall::Commands(cmds) => Some(cmds.clone()),
        _ => None,
      })
      .flatten()
      .collect()
  }
}

impl WorkingImage for MemoryImage {
  fn add_volumes(&mut self, volumes: &[String]) -> Result<(), ImageError> {
    self.calls.push(ImageCall::Volumes(volumes.to_vec()));
    Ok(())
  }

  fn add_labels(&mut self, labels: &BTreeMap<String, String>) -> Result<(), ImageError> {
    self.labels.extend(labels.clone());
    self.calls.push(ImageCall::Labels(labels.clone()));
    Ok(())
  }

  fn add_envs(&mut self, envs: &BTreeMap<String, String>) -> Result<(), ImageError> {
    self.calls.push(ImageCall::Envs(envs.clone()));
    Ok(())
  }

  fn run_commands(&mut self, commands: &[String]) -> Result<(), ImageError> {
    self.calls.push(ImageCall::Commands(commands.to_vec()));
    Ok(())
  }

  fn labels(&self) -> BTreeMap<String, String> {
    self.labels.clone()
  }

  fn add_data_archive(&mut self, request: &ArchiveRequest<'_>) -> Result<(), ImageError> {
    self.calls.push(ImageCall::Archive {
      archive_type: request.archive_type.as_str().to_string(),
      to: request.to.to_string(),
    });
    Ok(())
  }

  fn remove_paths(&mut self, base: &str, paths: &[String], prune_empty_parents: bool) -> Result<(), ImageError> {
    self.calls.push(ImageCall::RemovePaths {
      base: base.to_string(),
      paths: paths.to_vec(),
      prune_empty_parents,
    });
    Ok(())
  }

  fn apply_patch(&mut self, request: &PatchRequest<'_>) -> Result<(), ImageError> {
    self.calls.push(ImageCall::Patch {
      to: request.to.to_string(),
    });
    Ok(())
  }

  fn apply_config(&mut self, change: &ConfigChange) -> Result<(), ImageError> {
    self.calls.push(ImageCall::Config(change.clone()));
    Ok(())
  }

  fn import_files(&mut self, request: &ImportRequest) -> Result<(), ImageError> {
    self.calls.push(ImageCall::Import(request.clone()));
    Ok(())
  }

  fn build_dockerfile(&mut self, request: &DockerfileBuildRequest) -> Result<(), ImageError> {
    self.calls.push(ImageCall::Dockerfile(request.clone()));
    Ok(())
  }
}

/// Stage storage kept in memory. Committed images get sequential ids.
#[derive(Debug, Default)]
pub struct MemoryStorage {
  images: BTreeMap<(StageName, String), BuiltImage>,
  counter: u64,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  /// Rewrite the labels of a stored image in place.
  pub fn relabel(&mut self, name: StageName, digest: &Digest, f: impl FnOnce(&mut BTreeMap<String, String>)) {
    let image = self.images.get_mut(&(name, digest.0.clone())).unwrap();
    f(&mut image.labels);
  }
}

impl StageStorage for MemoryStorage {
  fn find(&self, name: StageName, digest: &Digest) -> Result<Option<BuiltImage>, StorageError> {
    Ok(self.images.get(&(name, digest.0.clone())).cloned())
  }

  fn start(&self, parent: Option<&BuiltImage>) -> Result<Box<dyn WorkingImage>, StorageError> {
    let labels = parent.map(|p| p.labels.clone()).unwrap_or_default();
    Ok(Box::new(MemoryImage::with_labels(labels)))
  }

  fn commit(
    &mut self,
    name: StageName,
    digest: &Digest,
    image: Box<dyn WorkingImage>,
  ) -> Result<BuiltImage, StorageError> {
    self.counter += 1;
    let built = BuiltImage {
      id: format!("sha256:{:064}", self.counter),
      name: format!("memory/{}:{}", name, self.counter),
      parent_id: None,
      created_at: self.counter,
      labels: image.labels(),
    };
    self.images.insert((name, digest.0.clone()), built.clone());
    Ok(built)
  }
}

/// Write `files` under `root`, creating parent directories.
pub fn write_tree(root: &Path, files: &[(&str, &str)]) {
  for (path, content) in files {
    let full = root.join(path);
    if let Some(parent) = full.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(full, content).unwrap();
  }
}
