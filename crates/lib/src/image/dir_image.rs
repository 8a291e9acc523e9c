//! A working image backed by a plain directory.
//!
//! Filesystem primitives (archives, patches, removals) act on the directory.
//! Everything that needs a container runtime (commands, volumes, config) is
//! recorded so callers can inspect it.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::{
  ArchiveRequest, ConfigChange, DockerfileBuildRequest, ImageError, ImportRequest, PatchRequest, WorkingImage,
  join_image_path,
};
use crate::git::diff::{apply_unified_diff, prune_empty_parents};
use crate::path_matcher::normalize_path;

#[derive(Debug)]
pub struct DirImage {
  root: PathBuf,
  labels: BTreeMap<String, String>,
  pub envs: BTreeMap<String, String>,
  pub volumes: Vec<String>,
  pub commands: Vec<String>,
  pub config: Vec<ConfigChange>,
  pub imports: Vec<ImportRequest>,
  pub dockerfile_builds: Vec<DockerfileBuildRequest>,
}

impl DirImage {
  /// Use `root` as the image filesystem, creating it if needed.
  pub fn new(root: &Path) -> Result<Self, ImageError> {
    fs::create_dir_all(root).map_err(|source| ImageError::Io {
      path: root.to_path_buf(),
      source,
    })?;
    Ok(Self {
      root: root.to_path_buf(),
      labels: BTreeMap::new(),
      envs: BTreeMap::new(),
      volumes: Vec::new(),
      commands: Vec::new(),
      config: Vec::new(),
      imports: Vec::new(),
      dockerfile_builds: Vec::new(),
    })
  }

  /// Start from the labels of a parent image.
  pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
    self.labels = labels;
    self
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Host path of an absolute image path.
  pub fn host_path(&self, image_path: &str) -> PathBuf {
    let rel = normalize_path(image_path);
    if rel.is_empty() { self.root.clone() } else { self.root.join(rel) }
  }

  fn ensure_dir(&self, image_path: &str) -> Result<PathBuf, ImageError> {
    let dir = self.host_path(image_path);
    fs::create_dir_all(&dir).map_err(|source| ImageError::Io {
      path: dir.clone(),
      source,
    })?;
    Ok(dir)
  }
}

impl WorkingImage for DirImage {
  fn add_volumes(&mut self, volumes: &[String]) -> Result<(), ImageError> {
    for volume in volumes {
      if !self.volumes.contains(volume) {
        self.volumes.push(volume.clone());
      }
    }
    Ok(())
  }

  fn add_labels(&mut self, labels: &BTreeMap<String, String>) -> Result<(), ImageError> {
    self.labels.extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
    Ok(())
  }

  fn add_envs(&mut self, envs: &BTreeMap<String, String>) -> Result<(), ImageError> {
    self.envs.extend(envs.iter().map(|(k, v)| (k.clone(), v.clone())));
    Ok(())
  }

  fn run_commands(&mut self, commands: &[String]) -> Result<(), ImageError> {
    self.commands.extend(commands.iter().cloned());
    Ok(())
  }

  fn labels(&self) -> BTreeMap<String, String> {
    self.labels.clone()
  }

  fn add_data_archive(&mut self, request: &ArchiveRequest<'_>) -> Result<(), ImageError> {
    let target = self.ensure_dir(&request.target_dir())?;
    let file = fs::File::open(request.archive).map_err(|source| ImageError::Unpack {
      path: request.archive.to_path_buf(),
      source,
    })?;

    let mut archive = tar::Archive::new(file);
    archive.set_overwrite(true);
    archive.unpack(&target).map_err(|source| ImageError::Unpack {
      path: request.archive.to_path_buf(),
      source,
    })?;

    if request.owner.is_some() || request.group.is_some() {
      debug!(owner = ?request.owner, group = ?request.group, "ownership is not applied to directory images");
    }
    debug!(archive = %request.archive.display(), target = %target.display(), "unpacked archive");
    Ok(())
  }

  fn remove_paths(&mut self, base: &str, paths: &[String], prune_empty_parents_flag: bool) -> Result<(), ImageError> {
    let base_dir = self.host_path(base);

    for path in paths {
      let full = self.host_path(&join_image_path(base, path));
      if !full.starts_with(&base_dir) || full == base_dir {
        return Err(ImageError::PathEscape(path.clone()));
      }

      let removed = match fs::symlink_metadata(&full) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(&full),
        Ok(_) => fs::remove_file(&full),
        Err(e) if e.kind() == ErrorKind::NotFound => continue,
        Err(e) => Err(e),
      };
      removed.map_err(|source| ImageError::Io {
        path: full.clone(),
        source,
      })?;

      if prune_empty_parents_flag {
        prune_empty_parents(&base_dir, &full);
      }
    }
    Ok(())
  }

  fn apply_patch(&mut self, request: &PatchRequest<'_>) -> Result<(), ImageError> {
    let target = self.ensure_dir(request.to)?;
    let text = fs::read_to_string(request.patch).map_err(|source| ImageError::Io {
      path: request.patch.to_path_buf(),
      source,
    })?;
    let applied = apply_unified_diff(&target, &text)?;
    debug!(files = applied.len(), target = %target.display(), "applied patch");
    Ok(())
  }

  fn apply_config(&mut self, change: &ConfigChange) -> Result<(), ImageError> {
    self.config.push(change.clone());
    Ok(())
  }

  fn import_files(&mut self, request: &ImportRequest) -> Result<(), ImageError> {
    self.imports.push(request.clone());
    Ok(())
  }

  fn build_dockerfile(&mut self, request: &DockerfileBuildRequest) -> Result<(), ImageError> {
    self.dockerfile_builds.push(request.clone());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::git::ArchiveType;
  use crate::util::testutil::write_tree;
  use tempfile::tempdir;

  fn tar_with(dir: &Path, files: &[(&str, &str)]) -> PathBuf {
    let path = dir.join("in.tar");
    let mut builder = tar::Builder::new(fs::File::create(&path).unwrap());
    for (name, content) in files {
      let mut header = tar::Header::new_gnu();
      header.set_size(content.len() as u64);
      header.set_mode(0o644);
      builder.append_data(&mut header, name, content.as_bytes()).unwrap();
    }
    builder.finish().unwrap();
    path
  }

  #[test]
  fn unpacks_directory_archive_at_destination() {
    let scratch = tempdir().unwrap();
    let root = tempdir().unwrap();
    let archive = tar_with(scratch.path(), &[("src/main.rs", "fn main() {}\n")]);

    let mut image = DirImage::new(root.path()).unwrap();
    image
      .add_data_archive(&ArchiveRequest {
        archive: &archive,
        archive_type: ArchiveType::Directory,
        to: "/app",
        owner: None,
        group: None,
      })
      .unwrap();

    assert!(root.path().join("app/src/main.rs").exists());
  }

  #[test]
  fn unpacks_file_archive_into_parent() {
    let scratch = tempdir().unwrap();
    let root = tempdir().unwrap();
    let archive = tar_with(scratch.path(), &[("config.yaml", "a: 1\n")]);

    let mut image = DirImage::new(root.path()).unwrap();
    image
      .add_data_archive(&ArchiveRequest {
        archive: &archive,
        archive_type: ArchiveType::File,
        to: "/etc/app/config.yaml",
        owner: None,
        group: None,
      })
      .unwrap();

    assert!(root.path().join("etc/app/config.yaml").is_file());
  }

  #[test]
  fn remove_paths_prunes_empty_parents_below_base() {
    let root = tempdir().unwrap();
    write_tree(root.path(), &[("app/a/b/c.txt", "x"), ("app/keep.txt", "y")]);

    let mut image = DirImage::new(root.path()).unwrap();
    image.remove_paths("/app", &["a/b/c.txt".to_string()], true).unwrap();

    assert!(!root.path().join("app/a").exists());
    assert!(root.path().join("app/keep.txt").exists());
  }

  #[test]
  fn remove_paths_keeps_parents_when_asked() {
    let root = tempdir().unwrap();
    write_tree(root.path(), &[("app/a/b/c.txt", "x")]);

    let mut image = DirImage::new(root.path()).unwrap();
    image
      .remove_paths("/app", &["a/b/c.txt".to_string(), "missing".to_string()], false)
      .unwrap();

    assert!(root.path().join("app/a/b").is_dir());
  }

  #[test]
  fn remove_paths_rejects_base_itself() {
    let root = tempdir().unwrap();
    let mut image = DirImage::new(root.path()).unwrap();
    let err = image.remove_paths("/app", &["..".to_string()], false).unwrap_err();
    assert!(matches!(err, ImageError::PathEscape(_)));
  }

  #[test]
  fn records_runtime_operations() {
    let root = tempdir().unwrap();
    let mut image = DirImage::new(root.path()).unwrap();
    image.add_volumes(&["/tmp".to_string(), "/tmp".to_string()]).unwrap();
    image.run_commands(&["echo hi".to_string()]).unwrap();
    image.apply_config(&ConfigChange::Workdir("/app".to_string())).unwrap();

    assert_eq!(image.volumes, vec!["/tmp"]);
    assert_eq!(image.commands, vec!["echo hi"]);
    assert_eq!(image.config, vec![ConfigChange::Workdir("/app".to_string())]);
  }
}
