//! Hashing utilities for stage digests and content checksums.
//!
//! This module provides:
//! - `Digest`: the stage cache key, a full 64-character SHA-256 hex string
//! - `sha256_args()`: the digest primitive every stage folds its inputs through
//! - `hash_directory()`: Deterministic directory hashing
//! - `hash_file()`: Single file hashing
//! - `hash_bytes()`: Arbitrary byte hashing

use std::fs;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use walkdir::WalkDir;

use crate::consts::DIGEST_ARGS_SEPARATOR;

/// A stage cache key.
///
/// Equality is the only meaningful operation on a digest: two stages with the
/// same digest are interchangeable in the cache.
///
/// # Format
///
/// The digest is a lowercase hexadecimal string (64 characters).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Digest(pub String);

impl Digest {
  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl std::fmt::Display for Digest {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Hash an ordered list of strings into a [`Digest`].
///
/// The arguments are joined with `:::` and hashed with SHA-256, so the result
/// is order-sensitive. An empty list hashes the empty string.
///
/// # Example
///
/// ```
/// use stagecraft_lib::util::hash::sha256_args;
///
/// let digest = sha256_args(["alpine:latest", "RUN echo hello"]);
/// assert_eq!(
///   digest.0,
///   "b9d5527ee7a7047747bce5fb5fd1d7ab2b687f141a91151620098b60c2ad0eae"
/// );
/// ```
pub fn sha256_args<I, S>(args: I) -> Digest
where
  I: IntoIterator<Item = S>,
  S: AsRef<str>,
{
  let mut hasher = Sha256::new();
  for (i, arg) in args.into_iter().enumerate() {
    if i > 0 {
      hasher.update(DIGEST_ARGS_SEPARATOR.as_bytes());
    }
    hasher.update(arg.as_ref().as_bytes());
  }
  Digest(format!("{:x}", hasher.finalize()))
}

/// A full 64-character SHA256 hash for content verification.
///
/// # Format
///
/// The hash is a lowercase hexadecimal string (64 characters).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Error during directory hashing.
#[derive(Debug, thiserror::Error, serde::Serialize, serde::Deserialize)]
pub enum DirHashError {
  #[error("failed to walk directory: {message}")]
  WalkDir { message: String },

  #[error("failed to read file {path}: {message}")]
  ReadFile { path: String, message: String },

  #[error("failed to read symlink {path}: {message}")]
  ReadSymlink { path: String, message: String },
}

/// Compute a deterministic hash of a directory's contents.
///
/// The hash includes:
/// - File contents (not metadata like timestamps or permissions)
/// - Directory structure
/// - Symlink targets
///
/// Entries are sorted by path for determinism. `filter` receives each path
/// relative to `path` (with `/` separators) and returns whether the entry
/// takes part in the hash; rejected directories are still descended into.
pub fn hash_directory_filtered<F>(path: &Path, mut filter: F) -> Result<ContentHash, DirHashError>
where
  F: FnMut(&str) -> bool,
{
  let mut entries: Vec<(String, String)> = Vec::new();

  for entry in WalkDir::new(path).sort_by_file_name() {
    let entry = entry.map_err(|e| DirHashError::WalkDir { message: e.to_string() })?;
    let entry_path = entry.path();

    let rel_path = entry_path
      .strip_prefix(path)
      .unwrap_or(entry_path)
      .to_string_lossy()
      .replace('\\', "/");

    // Skip the root directory itself
    if rel_path.is_empty() || !filter(&rel_path) {
      continue;
    }

    let file_type = entry.file_type();
    let entry_hash = if file_type.is_file() {
      let content_hash = hash_file(entry_path)?;
      format!("F:{}:{}", rel_path, content_hash.0)
    } else if file_type.is_dir() {
      format!("D:{}", rel_path)
    } else if file_type.is_symlink() {
      let target = fs::read_link(entry_path).map_err(|e| DirHashError::ReadSymlink {
        path: entry_path.display().to_string(),
        message: e.to_string(),
      })?;
      let target_hash = hash_bytes(target.to_string_lossy().as_bytes());
      format!("L:{}:{}", rel_path, target_hash.0)
    } else {
      // Skip special files (sockets, devices, etc.)
      continue;
    };

    entries.push((rel_path, entry_hash));
  }

  entries.sort_by(|a, b| a.0.cmp(&b.0));

  let mut hasher = Sha256::new();
  for (_, entry_hash) in entries {
    hasher.update(entry_hash.as_bytes());
    hasher.update(b"\n");
  }

  Ok(ContentHash(format!("{:x}", hasher.finalize())))
}

/// Compute a deterministic hash of a whole directory.
///
/// Shorthand for [`hash_directory_filtered`] that keeps every entry.
pub fn hash_directory(path: &Path) -> Result<ContentHash, DirHashError> {
  hash_directory_filtered(path, |_| true)
}

/// Hash a file's contents.
///
/// Returns the full 64-character SHA256 hash of the file.
pub fn hash_file(path: &Path) -> Result<ContentHash, DirHashError> {
  let mut file = fs::File::open(path).map_err(|e| DirHashError::ReadFile {
    path: path.display().to_string(),
    message: e.to_string(),
  })?;

  let mut hasher = Sha256::new();
  let mut buffer = [0u8; 8192];

  loop {
    let bytes_read = file.read(&mut buffer).map_err(|e| DirHashError::ReadFile {
      path: path.display().to_string(),
      message: e.to_string(),
    })?;
    if bytes_read == 0 {
      break;
    }
    hasher.update(&buffer[..bytes_read]);
  }

  Ok(ContentHash(format!("{:x}", hasher.finalize())))
}

/// Hash arbitrary bytes.
///
/// Returns the full 64-character SHA256 hash.
pub fn hash_bytes(data: &[u8]) -> ContentHash {
  let mut hasher = Sha256::new();
  hasher.update(data);
  ContentHash(format!("{:x}", hasher.finalize()))
}
