//! Git mappings: a repository subtree bound into an image.
//!
//! A mapping knows:
//! - its identity hash ("paramshash"), which keys every label it writes and
//!   depends only on static configuration, never on the current commit
//! - how to resolve the commit to apply (commit > tag > branch > HEAD)
//! - how its paths project into the image (path scope, file renames,
//!   archive type)
//! - how to read back what a previous image recorded (`ImageCommitInfo`)
//!
//! The decision between archive, patch and no-op lives in [`apply`].

pub mod apply;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{GitMappingConfig, StageDependenciesConfig};
use crate::consts::{DIGEST_ARGS_SEPARATOR, GIT_LABEL_PREFIX};
use crate::git::{
  ArchiveType, GitError, GitRepo, KeyedCache, PathKind, Patch, PatchOptions, create_patch, globs_checksum,
  list_entries,
};
use crate::image::BuiltImage;
use crate::path_matcher::{PathMatcher, PathMatcherError, normalize_path};
use crate::util::hash::{Digest, hash_bytes};

pub use apply::{ApplyDecision, ApplyOutcome, GitApplier};

/// Errors raised by git mapping operations.
#[derive(Debug, Error)]
pub enum GitMappingError {
  #[error(transparent)]
  Git(#[from] GitError),

  #[error("invalid git mapping: {0}")]
  Invalid(String),

  #[error(transparent)]
  Pattern(#[from] PathMatcherError),

  #[error("commit '{commit}' of mapping '{mapping}' not found")]
  CommitNotFound { mapping: String, commit: String },

  #[error("invalid image: not found commit id by label {0:?}")]
  MissingCommitLabel(String),

  #[error(transparent)]
  Image(#[from] crate::image::ImageError),
}

/// Commit information recorded in a built image for one mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCommitInfo {
  pub commit: String,
  pub archive_type: Option<ArchiveType>,
  pub virtual_merge: bool,
  pub virtual_merge_from_commit: Option<String>,
  pub virtual_merge_into_commit: Option<String>,
}

/// A virtual merge commit produced outside the engine (e.g. by CI merging a
/// branch into its target before building).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualMerge {
  pub from_commit: String,
  pub into_commit: String,
}

pub struct GitMapping {
  repo: Arc<dyn GitRepo>,
  name: Option<String>,
  add: String,
  to: String,
  include_paths: Vec<String>,
  exclude_paths: Vec<String>,
  owner: Option<String>,
  group: Option<String>,
  branch: Option<String>,
  tag: Option<String>,
  commit: Option<String>,
  stage_dependencies: StageDependenciesConfig,
  virtual_merge: Option<VirtualMerge>,
  latest_commit: Mutex<Option<String>>,
  base_commits: KeyedCache<String>,
}

impl std::fmt::Debug for GitMapping {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("GitMapping")
      .field("repo", &self.repo.name())
      .field("name", &self.name)
      .field("add", &self.add)
      .field("to", &self.to)
      .finish_non_exhaustive()
  }
}

fn basename(path: &str) -> &str {
  path.rsplit('/').next().unwrap_or(path)
}

fn dirname(path: &str) -> String {
  match path.rfind('/') {
    Some(i) => path[..i].to_string(),
    None => String::new(),
  }
}

impl GitMapping {
  pub fn from_config(repo: Arc<dyn GitRepo>, config: &GitMappingConfig) -> Result<Self, GitMappingError> {
    if !config.to.starts_with('/') {
      return Err(GitMappingError::Invalid(format!(
        "'to' must be an absolute path, got '{}'",
        config.to
      )));
    }

    // Validate patterns up front so later operations cannot fail on them.
    PathMatcher::new(&config.add, &config.include_paths, &config.exclude_paths)?;

    let mut to = normalize_path(&config.to);
    to.insert(0, '/');

    Ok(Self {
      repo,
      name: config.name.clone(),
      add: normalize_path(&config.add),
      to,
      include_paths: config.include_paths.clone(),
      exclude_paths: config.exclude_paths.clone(),
      owner: config.owner.clone(),
      group: config.group.clone(),
      branch: config.branch.clone(),
      tag: config.tag.clone(),
      commit: config.commit.clone(),
      stage_dependencies: config.stage_dependencies.clone(),
      virtual_merge: None,
      latest_commit: Mutex::new(None),
      base_commits: KeyedCache::new(),
    })
  }

  /// Mark the latest commit as a virtual merge of `from` into `into`.
  pub fn with_virtual_merge(mut self, virtual_merge: VirtualMerge) -> Self {
    self.virtual_merge = Some(virtual_merge);
    self
  }

  pub fn repo(&self) -> &dyn GitRepo {
    self.repo.as_ref()
  }

  pub fn add(&self) -> &str {
    &self.add
  }

  pub fn to(&self) -> &str {
    &self.to
  }

  pub fn owner(&self) -> Option<&str> {
    self.owner.as_deref()
  }

  pub fn group(&self) -> Option<&str> {
    self.group.as_deref()
  }

  pub fn include_paths(&self) -> &[String] {
    &self.include_paths
  }

  pub fn exclude_paths(&self) -> &[String] {
    &self.exclude_paths
  }

  pub fn stage_dependencies(&self) -> &StageDependenciesConfig {
    &self.stage_dependencies
  }

  /// Repository name, suffixed with the mapping name when one is set.
  pub fn full_name(&self) -> String {
    match &self.name {
      Some(name) if !name.is_empty() => format!("{}_{}", self.repo.name(), name),
      _ => self.repo.name().to_string(),
    }
  }

  /// Identity hash over every identity-affecting field.
  ///
  /// Label keys embed this value, so its derivation must never change.
  pub fn params_hash(&self) -> String {
    let sep = DIGEST_ARGS_SEPARATOR;
    let mut data = String::new();
    data.push_str(&self.full_name());
    data.push_str(sep);
    data.push_str(&self.to);
    data.push_str(sep);
    data.push('/');
    data.push_str(&self.add);
    data.push_str(sep);
    for include in &self.include_paths {
      data.push_str(include);
    }
    data.push_str(sep);
    for exclude in &self.exclude_paths {
      data.push_str(exclude);
    }
    data.push_str(sep);
    data.push_str(self.owner.as_deref().unwrap_or_default());
    data.push_str(sep);
    data.push_str(self.group.as_deref().unwrap_or_default());
    data.push_str(sep);
    data.push_str(self.branch.as_deref().unwrap_or_default());
    data.push_str(sep);
    data.push_str(self.tag.as_deref().unwrap_or_default());
    data.push_str(sep);
    data.push_str(self.commit.as_deref().unwrap_or_default());
    hash_bytes(data.as_bytes()).0
  }

  fn label(&self, suffix: &str) -> String {
    format!("{}{}-{}", GIT_LABEL_PREFIX, self.params_hash(), suffix)
  }

  pub fn commit_label(&self) -> String {
    self.label("commit")
  }

  pub fn type_label(&self) -> String {
    self.label("type")
  }

  pub fn virtual_merge_label(&self) -> String {
    self.label("virtual-merge")
  }

  pub fn virtual_merge_from_commit_label(&self) -> String {
    self.label("virtual-merge-from-commit")
  }

  pub fn virtual_merge_into_commit_label(&self) -> String {
    self.label("virtual-merge-into-commit")
  }

  /// The commit to apply: commit > tag > branch > HEAD. Resolved once.
  pub fn latest_commit(&self) -> Result<String, GitMappingError> {
    let mut cached = self.latest_commit.lock().unwrap_or_else(|p| p.into_inner());
    if let Some(commit) = cached.as_ref() {
      return Ok(commit.clone());
    }

    let commit = if let Some(commit) = &self.commit {
      if !self.repo.commit_exists(commit)? {
        return Err(GitMappingError::CommitNotFound {
          mapping: self.full_name(),
          commit: commit.clone(),
        });
      }
      commit.clone()
    } else if let Some(tag) = &self.tag {
      self.repo.tag_commit(tag)?
    } else if let Some(branch) = &self.branch {
      self.repo.branch_commit(branch)?
    } else {
      self.repo.head_commit()?
    };

    debug!(mapping = %self.full_name(), commit, "resolved latest commit");
    *cached = Some(commit.clone());
    Ok(commit)
  }

  fn add_kind(&self, commit: &str) -> Result<Option<PathKind>, GitMappingError> {
    Ok(self.repo.path_kind(commit, &self.add)?)
  }

  /// Repository directory that archive and patch paths are relative to.
  pub fn path_scope(&self, commit: &str) -> Result<String, GitMappingError> {
    match self.add_kind(commit)? {
      Some(PathKind::Directory) | Some(PathKind::Submodule) | None => Ok(self.add.clone()),
      Some(PathKind::File) => Ok(dirname(&self.add)),
    }
  }

  pub fn archive_type(&self, commit: &str) -> Result<ArchiveType, GitMappingError> {
    match self.add_kind(commit)? {
      Some(PathKind::File) => Ok(ArchiveType::File),
      _ => Ok(ArchiveType::Directory),
    }
  }

  /// Renames applied when `add` is a file whose basename differs from `to`'s.
  pub fn file_renames(&self, commit: &str) -> Result<BTreeMap<String, String>, GitMappingError> {
    let mut renames = BTreeMap::new();
    if self.add_kind(commit)? == Some(PathKind::File) && basename(&self.add) != basename(&self.to) {
      renames.insert(self.add.clone(), basename(&self.to).to_string());
    }
    Ok(renames)
  }

  pub fn path_matcher(&self) -> PathMatcher {
    PathMatcher::new(&self.add, &self.include_paths, &self.exclude_paths)
      .unwrap_or_else(|_| PathMatcher::under(&self.add))
  }

  /// Image directory the mapping's archive and patch paths land in.
  pub fn target_dir(&self, archive_type: ArchiveType) -> String {
    match archive_type {
      ArchiveType::Directory => self.to.clone(),
      ArchiveType::File => crate::image::parent_dir(&self.to),
    }
  }

  /// Whether nothing in the repository matches the mapping at `commit`.
  pub fn is_empty_at(&self, commit: &str) -> Result<bool, GitMappingError> {
    Ok(list_entries(self.repo.as_ref(), commit, &self.path_matcher())?.is_empty())
  }

  pub fn is_empty(&self) -> Result<bool, GitMappingError> {
    let commit = self.latest_commit()?;
    self.is_empty_at(&commit)
  }

  /// Labels recording that `commit` of this mapping is baked in.
  pub fn labels_for(&self, commit: &str) -> Result<BTreeMap<String, String>, GitMappingError> {
    let mut labels = BTreeMap::new();
    labels.insert(self.commit_label(), commit.to_string());
    labels.insert(self.type_label(), self.archive_type(commit)?.to_string());

    let latest = self.latest_commit()?;
    match &self.virtual_merge {
      Some(vm) if latest == commit => {
        labels.insert(self.virtual_merge_label(), "true".to_string());
        labels.insert(self.virtual_merge_from_commit_label(), vm.from_commit.clone());
        labels.insert(self.virtual_merge_into_commit_label(), vm.into_commit.clone());
      }
      _ => {
        labels.insert(self.virtual_merge_label(), "false".to_string());
      }
    }
    Ok(labels)
  }

  /// Decode what `image` recorded for this mapping, `None` when it recorded
  /// nothing.
  pub fn image_commit_info(&self, image: &BuiltImage) -> Option<ImageCommitInfo> {
    let commit = image.label(&self.commit_label())?.to_string();
    let non_empty = |key: String| image.label(&key).filter(|v| !v.is_empty()).map(str::to_string);

    Some(ImageCommitInfo {
      commit,
      archive_type: image.label(&self.type_label()).and_then(ArchiveType::parse),
      virtual_merge: image.label(&self.virtual_merge_label()) == Some("true"),
      virtual_merge_from_commit: non_empty(self.virtual_merge_from_commit_label()),
      virtual_merge_into_commit: non_empty(self.virtual_merge_into_commit_label()),
    })
  }

  /// Commit the previous image was built from, memoised per image name.
  ///
  /// For a virtual merge this is the merge commit itself: the image holds the
  /// merged tree, so neither parent is a valid patch base.
  pub fn base_commit_for_prev_built_image(&self, image: &BuiltImage) -> Result<String, GitMappingError> {
    let key = if image.name.is_empty() { image.id.clone() } else { image.name.clone() };
    let commit = self.base_commits.get_or_try_insert_with(&key, || -> Result<String, GitMappingError> {
      let info = self
        .image_commit_info(image)
        .ok_or_else(|| GitMappingError::MissingCommitLabel(self.commit_label()))?;
      Ok(info.commit)
    })?;
    Ok(commit.as_ref().clone())
  }

  /// Whether the previous image references history that no longer exists.
  ///
  /// Virtual merge commits are ephemeral and usually absent from the
  /// repository, in which case the mapping is archived again.
  pub fn should_be_reset(&self, image: &BuiltImage) -> Result<bool, GitMappingError> {
    let Some(info) = self.image_commit_info(image) else {
      return Ok(false);
    };
    let base = self.base_commit_for_prev_built_image(image)?;
    let exists = self.repo.commit_exists(&base)?;
    if !exists {
      debug!(
        mapping = %self.full_name(),
        commit = base,
        virtual_merge = info.virtual_merge,
        "recorded commit no longer exists"
      );
    }
    Ok(!exists)
  }

  /// Filtered patch between two commits, in mapping coordinates.
  pub fn create_patch(&self, from: &str, to: &str, full: bool) -> Result<Patch, GitMappingError> {
    let scope = self.path_scope(to)?;
    let renames = self.file_renames(to)?;
    let matcher = self.path_matcher();
    let mut options = PatchOptions::new(from, to, &matcher, &scope, &renames);
    if full {
      options.context_lines = None;
      options.with_binary = true;
    }
    Ok(create_patch(self.repo.as_ref(), &options)?)
  }

  /// Size of the full-context, binary-inclusive patch from `from` to the
  /// latest commit.
  pub fn patch_size(&self, from: &str) -> Result<u64, GitMappingError> {
    let latest = self.latest_commit()?;
    if from == latest {
      return Ok(0);
    }
    Ok(self.create_patch(from, &latest, true)?.size())
  }

  /// Checksum of the files matched by `globs` at the latest commit.
  ///
  /// Returns `None` when no globs are configured.
  pub fn stage_dependencies_checksum(&self, globs: &[String]) -> Result<Option<Digest>, GitMappingError> {
    if globs.is_empty() {
      return Ok(None);
    }
    let commit = self.latest_commit()?;
    let checksum = globs_checksum(self.repo.as_ref(), &commit, &self.path_matcher(), globs)?;
    for glob in &checksum.no_match_paths {
      warn!(
        mapping = %self.full_name(),
        glob = %glob,
        "stage dependency glob matched no files"
      );
    }
    Ok(Some(checksum.value))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::util::testutil::MemoryRepo;

  fn config(add: &str, to: &str) -> GitMappingConfig {
    GitMappingConfig {
      add: add.to_string(),
      to: to.to_string(),
      ..Default::default()
    }
  }

  fn mapping(repo: MemoryRepo, config: &GitMappingConfig) -> GitMapping {
    GitMapping::from_config(Arc::new(repo), config).unwrap()
  }

  fn built(labels: BTreeMap<String, String>) -> BuiltImage {
    BuiltImage {
      id: "sha256:prev".to_string(),
      name: "project:prev".to_string(),
      labels,
      ..Default::default()
    }
  }

  mod identity {
    use super::*;

    #[test]
    fn params_hash_ignores_current_commit() {
      let mut repo = MemoryRepo::new("own");
      repo.commit(&[("a", "1\n")]);
      let m = mapping(repo, &config("/", "/app"));
      let before = m.params_hash();

      let mut repo = MemoryRepo::new("own");
      repo.commit(&[("a", "1\n")]);
      repo.commit(&[("a", "2\n")]);
      let m2 = mapping(repo, &config("/", "/app"));
      assert_eq!(before, m2.params_hash());
    }

    #[test]
    fn params_hash_matches_concatenated_fields() {
      let m = mapping(MemoryRepo::new("own"), &config("/src", "/app"));
      let data = format!("own:::/app:::/src{}", ":::".repeat(7));
      let expected = hash_bytes(data.as_bytes()).0;
      assert_eq!(m.params_hash(), expected);
    }

    #[test]
    fn params_hash_follows_configuration() {
      let base = mapping(MemoryRepo::new("own"), &config("/", "/app")).params_hash();

      let mut named = config("/", "/app");
      named.name = Some("docs".to_string());
      let named = mapping(MemoryRepo::new("own"), &named);
      assert_eq!(named.full_name(), "own_docs");
      assert_ne!(base, named.params_hash());

      let mut filtered = config("/", "/app");
      filtered.include_paths = vec!["src".to_string()];
      assert_ne!(base, mapping(MemoryRepo::new("own"), &filtered).params_hash());
    }

    #[test]
    fn labels_embed_params_hash() {
      let m = mapping(MemoryRepo::new("own"), &config("/", "/app"));
      let hash = m.params_hash();
      assert_eq!(m.commit_label(), format!("werf-git-{}-commit", hash));
      assert_eq!(m.type_label(), format!("werf-git-{}-type", hash));
      assert_eq!(m.virtual_merge_label(), format!("werf-git-{}-virtual-merge", hash));
    }

    #[test]
    fn relative_destination_is_rejected() {
      let err = GitMapping::from_config(Arc::new(MemoryRepo::new("own")), &config("/", "app")).unwrap_err();
      assert!(matches!(err, GitMappingError::Invalid(_)));
    }
  }

  mod commits {
    use super::*;

    #[test]
    fn pin_precedence() {
      let mut repo = MemoryRepo::new("own");
      let c1 = repo.commit(&[("a", "1\n")]);
      let c2 = repo.commit(&[("a", "2\n")]);
      let c3 = repo.commit(&[("a", "3\n")]);
      let head = repo.commit(&[("a", "4\n")]);
      repo.tag("v1", &c2);
      repo.branch("main", &c3);
      let repo: Arc<dyn GitRepo> = Arc::new(repo);

      let mut cfg = config("/", "/app");
      let m = GitMapping::from_config(repo.clone(), &cfg).unwrap();
      assert_eq!(m.latest_commit().unwrap(), head);

      cfg.branch = Some("main".to_string());
      let m = GitMapping::from_config(repo.clone(), &cfg).unwrap();
      assert_eq!(m.latest_commit().unwrap(), c3);

      cfg.tag = Some("v1".to_string());
      let m = GitMapping::from_config(repo.clone(), &cfg).unwrap();
      assert_eq!(m.latest_commit().unwrap(), c2);

      cfg.commit = Some(c1.clone());
      let m = GitMapping::from_config(repo.clone(), &cfg).unwrap();
      assert_eq!(m.latest_commit().unwrap(), c1);
    }

    #[test]
    fn missing_pinned_commit_is_an_error() {
      let mut repo = MemoryRepo::new("own");
      repo.commit(&[("a", "1\n")]);
      let mut cfg = config("/", "/app");
      cfg.commit = Some("0".repeat(40));
      let m = mapping(repo, &cfg);
      assert!(matches!(m.latest_commit(), Err(GitMappingError::CommitNotFound { .. })));
    }
  }

  mod layout {
    use super::*;

    #[test]
    fn directory_add() {
      let mut repo = MemoryRepo::new("own");
      let c = repo.commit(&[("src/main.rs", "x\n")]);
      let m = mapping(repo, &config("/src", "/app"));
      assert_eq!(m.path_scope(&c).unwrap(), "src");
      assert_eq!(m.archive_type(&c).unwrap(), ArchiveType::Directory);
      assert!(m.file_renames(&c).unwrap().is_empty());
      assert_eq!(m.target_dir(ArchiveType::Directory), "/app");
    }

    #[test]
    fn file_add_with_rename() {
      let mut repo = MemoryRepo::new("own");
      let c = repo.commit(&[("conf/app.yaml", "a: 1\n")]);
      let m = mapping(repo, &config("/conf/app.yaml", "/etc/config.yaml"));
      assert_eq!(m.path_scope(&c).unwrap(), "conf");
      assert_eq!(m.archive_type(&c).unwrap(), ArchiveType::File);
      assert_eq!(m.file_renames(&c).unwrap()["conf/app.yaml"], "config.yaml");
      assert_eq!(m.target_dir(ArchiveType::File), "/etc");
    }

    #[test]
    fn file_add_same_basename_has_no_rename() {
      let mut repo = MemoryRepo::new("own");
      let c = repo.commit(&[("conf/app.yaml", "a: 1\n")]);
      let m = mapping(repo, &config("/conf/app.yaml", "/etc/app.yaml"));
      assert!(m.file_renames(&c).unwrap().is_empty());
    }

    #[test]
    fn emptiness_follows_filters() {
      let mut repo = MemoryRepo::new("own");
      repo.commit(&[("src/main.rs", "x\n")]);
      let repo: Arc<dyn GitRepo> = Arc::new(repo);

      let m = GitMapping::from_config(repo.clone(), &config("/src", "/app")).unwrap();
      assert!(!m.is_empty().unwrap());

      let mut cfg = config("/src", "/app");
      cfg.include_paths = vec!["*.go".to_string()];
      let m = GitMapping::from_config(repo, &cfg).unwrap();
      assert!(m.is_empty().unwrap());
    }
  }

  mod previous_image {
    use super::*;

    #[test]
    fn commit_info_roundtrips_through_labels() {
      let mut repo = MemoryRepo::new("own");
      let c = repo.commit(&[("a", "1\n")]);
      let m = mapping(repo, &config("/", "/app"));

      let image = built(m.labels_for(&c).unwrap());
      let info = m.image_commit_info(&image).unwrap();
      assert_eq!(info.commit, c);
      assert_eq!(info.archive_type, Some(ArchiveType::Directory));
      assert!(!info.virtual_merge);
      assert_eq!(image.label(&m.virtual_merge_label()), Some("false"));
    }

    #[test]
    fn missing_label_is_reported() {
      let m = mapping(MemoryRepo::new("own"), &config("/", "/app"));
      let err = m.base_commit_for_prev_built_image(&built(BTreeMap::new())).unwrap_err();
      assert_eq!(
        err.to_string(),
        format!("invalid image: not found commit id by label {:?}", m.commit_label())
      );
    }

    fn virtual_merge_labels(m: &GitMapping, merge: &str, into: &str) -> BTreeMap<String, String> {
      let mut labels = BTreeMap::new();
      labels.insert(m.commit_label(), merge.to_string());
      labels.insert(m.virtual_merge_label(), "true".to_string());
      labels.insert(m.virtual_merge_from_commit_label(), "f".repeat(40));
      labels.insert(m.virtual_merge_into_commit_label(), into.to_string());
      labels
    }

    #[test]
    fn virtual_merge_base_is_the_merge_commit() {
      let mut repo = MemoryRepo::new("own");
      let into = repo.commit(&[("f", "1\n")]);
      let merge = repo.commit(&[("f", "1\n"), ("g", "from feature\n")]);
      let _latest = repo.commit(&[("f", "1\n"), ("h", "2\n")]);
      let m = mapping(repo, &config("/", "/app"));

      let image = built(virtual_merge_labels(&m, &merge, &into));
      assert_eq!(m.base_commit_for_prev_built_image(&image).unwrap(), merge);
      assert!(!m.should_be_reset(&image).unwrap());
    }

    #[test]
    fn missing_virtual_merge_commit_resets() {
      let mut repo = MemoryRepo::new("own");
      let into = repo.commit(&[("f", "1\n")]);
      let merge = repo.commit(&[("f", "1\n"), ("g", "from feature\n")]);
      repo.commit(&[("f", "1\n"), ("h", "2\n")]);
      repo.drop_commit(&merge);
      let m = mapping(repo, &config("/", "/app"));

      assert!(m.should_be_reset(&built(virtual_merge_labels(&m, &merge, &into))).unwrap());
    }

    #[test]
    fn virtual_merge_equal_to_latest_is_kept() {
      let mut repo = MemoryRepo::new("own");
      let into = repo.commit(&[("a", "1\n")]);
      let merge = repo.commit(&[("a", "2\n")]);
      let m = mapping(repo, &config("/", "/app"));

      let mut labels = BTreeMap::new();
      labels.insert(m.commit_label(), merge.clone());
      labels.insert(m.virtual_merge_label(), "true".to_string());
      labels.insert(m.virtual_merge_into_commit_label(), into);

      assert_eq!(m.base_commit_for_prev_built_image(&built(labels)).unwrap(), merge);
    }

    #[test]
    fn virtual_merge_labels_are_written_for_latest() {
      let mut repo = MemoryRepo::new("own");
      let c = repo.commit(&[("a", "1\n")]);
      let m = mapping(repo, &config("/", "/app")).with_virtual_merge(VirtualMerge {
        from_commit: "f".repeat(40),
        into_commit: "e".repeat(40),
      });
      let labels = m.labels_for(&c).unwrap();
      assert_eq!(labels[&m.virtual_merge_label()], "true");
      assert_eq!(labels[&m.virtual_merge_into_commit_label()], "e".repeat(40));
    }

    #[test]
    fn reset_when_recorded_commit_vanished() {
      let mut repo = MemoryRepo::new("own");
      let old = repo.commit(&[("a", "1\n")]);
      repo.commit(&[("a", "2\n")]);
      repo.drop_commit(&old);
      let m = mapping(repo, &config("/", "/app"));

      let mut labels = BTreeMap::new();
      labels.insert(m.commit_label(), old);
      assert!(m.should_be_reset(&built(labels)).unwrap());
    }

    #[test]
    fn no_reset_for_existing_commit_or_unlabelled_image() {
      let mut repo = MemoryRepo::new("own");
      let c = repo.commit(&[("a", "1\n")]);
      let m = mapping(repo, &config("/", "/app"));

      assert!(!m.should_be_reset(&built(BTreeMap::new())).unwrap());
      let mut labels = BTreeMap::new();
      labels.insert(m.commit_label(), c);
      assert!(!m.should_be_reset(&built(labels)).unwrap());
    }
  }

  mod sizes {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn patch_size_is_zero_at_latest() {
      let mut repo = MemoryRepo::new("own");
      let c = repo.commit(&[("a", "1\n")]);
      let m = mapping(repo, &config("/", "/app"));
      assert_eq!(m.patch_size(&c).unwrap(), 0);
    }

    #[test]
    fn patch_size_counts_whole_files() {
      let mut repo = MemoryRepo::new("own");
      let body: String = (0..100).map(|i| format!("{}\n", i)).collect();
      let a = repo.commit(&[("f", body.as_str())]);
      let changed = format!("{}extra\n", body);
      repo.commit(&[("f", changed.as_str())]);
      let m = mapping(repo, &config("/", "/app"));
      assert!(m.patch_size(&a).unwrap() > body.len() as u64);
    }

    #[test]
    fn stage_dependencies_checksum_tracks_globs() {
      let mut repo = MemoryRepo::new("own");
      repo.commit(&[("go.mod", "module x\n"), ("main.go", "package main\n")]);
      let m = mapping(repo, &config("/", "/app"));
      assert!(m.stage_dependencies_checksum(&[]).unwrap().is_none());
      assert!(m.stage_dependencies_checksum(&["go.mod".to_string()]).unwrap().is_some());
    }

    #[test]
    #[traced_test]
    fn unmatched_stage_dependency_warns() {
      let mut repo = MemoryRepo::new("own");
      repo.commit(&[("main.go", "package main\n")]);
      let m = mapping(repo, &config("/", "/app"));
      m.stage_dependencies_checksum(&["*.lock".to_string()]).unwrap();
      assert!(logs_contain("stage dependency glob matched no files"));
    }
  }
}
