//! Tar archives of filtered commit trees.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::{EntryMode, GitError, GitRepo, list_entries, project_path};
use crate::path_matcher::PathMatcher;

/// What goes into an archive.
#[derive(Debug, Clone)]
pub struct ArchiveOptions<'a> {
  pub commit: &'a str,
  pub matcher: &'a PathMatcher,
  /// Archive paths are relative to this repository directory.
  pub scope: &'a str,
  /// Repository path to archive path overrides.
  pub renames: &'a BTreeMap<String, String>,
  /// Restrict the archive to these repository paths.
  pub only_paths: Option<&'a BTreeSet<String>>,
}

/// A tar file written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Archive {
  pub path: PathBuf,
  /// Archive paths, in archive order.
  pub entries: Vec<String>,
}

impl Archive {
  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}

fn write_error(path: &Path) -> impl Fn(std::io::Error) -> GitError + '_ {
  move |source| GitError::Write {
    path: path.display().to_string(),
    source,
  }
}

/// Write a tar of the filtered tree of `options.commit` to `dest`.
///
/// Regular files keep their executable bit, symlinks are stored as links.
/// Submodule pointers have no content in this repository and are skipped.
pub fn create_archive(repo: &dyn GitRepo, options: &ArchiveOptions<'_>, dest: &Path) -> Result<Archive, GitError> {
  let entries = list_entries(repo, options.commit, options.matcher)?;

  let file = fs::File::create(dest).map_err(write_error(dest))?;
  let mut builder = tar::Builder::new(file);
  let mut written = Vec::new();

  for entry in entries {
    if options.only_paths.is_some_and(|only| !only.contains(&entry.path)) {
      continue;
    }

    let Some(archive_path) = project_path(options.scope, options.renames, &entry.path) else {
      continue;
    };
    if archive_path.is_empty() {
      continue;
    }

    match entry.mode {
      EntryMode::Blob | EntryMode::BlobExecutable => {
        let data = repo.read_blob(&entry.oid)?;
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(data.len() as u64);
        header.set_mode(if entry.mode == EntryMode::BlobExecutable { 0o755 } else { 0o644 });
        header.set_mtime(0);
        builder
          .append_data(&mut header, &archive_path, data.as_slice())
          .map_err(write_error(dest))?;
      }
      EntryMode::Link => {
        let target = repo.read_blob(&entry.oid)?;
        let target = String::from_utf8_lossy(&target).into_owned();
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Symlink);
        header.set_size(0);
        header.set_mode(0o777);
        header.set_mtime(0);
        builder
          .append_link(&mut header, &archive_path, &target)
          .map_err(write_error(dest))?;
      }
      EntryMode::Commit => {
        debug!(path = %entry.path, "skipping submodule in archive");
        continue;
      }
    }

    written.push(archive_path);
  }

  builder.finish().map_err(write_error(dest))?;

  debug!(
    commit = options.commit,
    entries = written.len(),
    path = %dest.display(),
    "created archive"
  );

  Ok(Archive {
    path: dest.to_path_buf(),
    entries: written,
  })
}
