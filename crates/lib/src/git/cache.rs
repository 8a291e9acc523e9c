//! Memoisation with per-key locking.
//!
//! `KeyedCache` hands out one mutex per key from a shared map, so concurrent
//! lookups of the same key are serialised while different keys resolve in
//! parallel. `CachedRepo` uses it to memoise tree listings per commit hash.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use super::{GitError, GitRepo, TreeEntry};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A concurrent map from string keys to lazily computed values.
#[derive(Debug)]
pub struct KeyedCache<T> {
  slots: Mutex<HashMap<String, Arc<Mutex<Option<Arc<T>>>>>>,
}

impl<T> Default for KeyedCache<T> {
  fn default() -> Self {
    Self {
      slots: Mutex::new(HashMap::new()),
    }
  }
}

impl<T> KeyedCache<T> {
  pub fn new() -> Self {
    Self::default()
  }

  /// Return the cached value for `key`, computing it with `init` on a miss.
  ///
  /// Only one caller computes a given key; others block on that key's mutex
  /// and then observe the stored value. A failed computation stores nothing.
  pub fn get_or_try_insert_with<E, F>(&self, key: &str, init: F) -> Result<Arc<T>, E>
  where
    F: FnOnce() -> Result<T, E>,
  {
    let slot = {
      let mut slots = lock(&self.slots);
      slots.entry(key.to_string()).or_default().clone()
    };

    let mut value = lock(&slot);
    if let Some(existing) = value.as_ref() {
      return Ok(existing.clone());
    }

    let computed = Arc::new(init()?);
    *value = Some(computed.clone());
    Ok(computed)
  }

  pub fn get(&self, key: &str) -> Option<Arc<T>> {
    let slot = lock(&self.slots).get(key).cloned()?;
    let value = lock(&slot);
    value.clone()
  }

  pub fn len(&self) -> usize {
    lock(&self.slots)
      .values()
      .filter(|slot| lock(slot).is_some())
      .count()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

/// A `GitRepo` wrapper memoising tree listings per commit.
pub struct CachedRepo<R> {
  inner: R,
  trees: KeyedCache<Vec<TreeEntry>>,
}

impl<R: GitRepo> CachedRepo<R> {
  pub fn new(inner: R) -> Self {
    Self {
      inner,
      trees: KeyedCache::new(),
    }
  }

  pub fn inner(&self) -> &R {
    &self.inner
  }
}

impl<R: GitRepo> GitRepo for CachedRepo<R> {
  fn name(&self) -> &str {
    self.inner.name()
  }

  fn is_local(&self) -> bool {
    self.inner.is_local()
  }

  fn head_commit(&self) -> Result<String, GitError> {
    self.inner.head_commit()
  }

  fn tag_commit(&self, tag: &str) -> Result<String, GitError> {
    self.inner.tag_commit(tag)
  }

  fn branch_commit(&self, branch: &str) -> Result<String, GitError> {
    self.inner.branch_commit(branch)
  }

  fn commit_exists(&self, commit: &str) -> Result<bool, GitError> {
    if self.trees.get(commit).is_some() {
      return Ok(true);
    }
    self.inner.commit_exists(commit)
  }

  fn ls_tree(&self, commit: &str) -> Result<Vec<TreeEntry>, GitError> {
    let entries = self.trees.get_or_try_insert_with(commit, || {
      debug!(repo = self.inner.name(), commit, "listing tree");
      self.inner.ls_tree(commit)
    })?;
    Ok(entries.as_ref().clone())
  }

  fn read_blob(&self, oid: &str) -> Result<Vec<u8>, GitError> {
    self.inner.read_blob(oid)
  }
}
