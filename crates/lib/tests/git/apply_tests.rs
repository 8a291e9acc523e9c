use std::path::Path;
use std::sync::Arc;

use stagecraft_lib::config::{EngineConfig, GitMappingConfig, PatchStrategy};
use stagecraft_lib::git::{CachedRepo, GitDataManager, GitRepo, GixRepo};
use stagecraft_lib::git_mapping::{ApplyDecision, GitApplier, GitMapping};
use stagecraft_lib::image::{BuiltImage, DirImage, WorkingImage};
use stagecraft_lib::util::hash::hash_directory;
use tempfile::TempDir;

use super::common::{commit_all, init_repo, require_git, write};

fn open(dir: &Path) -> Arc<dyn GitRepo> {
  Arc::new(CachedRepo::new(GixRepo::open_local(dir).unwrap()))
}

fn mapping_at(repo: &Arc<dyn GitRepo>, commit: &str) -> GitMapping {
  let config = GitMappingConfig {
    add: "/app".to_string(),
    to: "/srv/app".to_string(),
    exclude_paths: vec!["tmp".to_string()],
    commit: Some(commit.to_string()),
    ..Default::default()
  };
  GitMapping::from_config(repo.clone(), &config).unwrap()
}

/// Two commits touching modified, added, removed and excluded files.
fn two_commits(dir: &Path) -> (String, String) {
  init_repo(dir);
  write(dir, "app/src/main.rs", "fn main() {\n  one();\n}\n");
  write(dir, "app/src/old.rs", "pub fn old() {}\n");
  write(dir, "app/tmp/cache", "ignored\n");
  write(dir, "app/README.md", "readme\n");
  write(dir, "other/file", "outside\n");
  let a = commit_all(dir, "a");

  write(dir, "app/src/main.rs", "fn main() {\n  two();\n  three();\n}\n");
  std::fs::remove_file(dir.join("app/src/old.rs")).unwrap();
  write(dir, "app/src/new/mod.rs", "pub mod x;\n");
  write(dir, "app/tmp/cache", "changed\n");
  write(dir, "other/file", "moved on\n");
  let b = commit_all(dir, "b");
  (a, b)
}

/// Archive(B) must equal Archive(A) followed by the transfer A -> B.
fn assert_equivalent(repo_dir: &Path, a: &str, b: &str, strategy: PatchStrategy) -> TempDir {
  let repo = open(repo_dir);

  let scratch = TempDir::new().unwrap();
  let data = GitDataManager::new(scratch.path()).unwrap();
  let config = EngineConfig {
    patch_strategy: strategy,
    ..Default::default()
  };
  let applier = GitApplier::new(&config, &data);
  let at_a = mapping_at(&repo, a);
  let at_b = mapping_at(&repo, b);

  let fresh = TempDir::new().unwrap();
  let mut fresh_image = DirImage::new(fresh.path()).unwrap();
  applier.apply_archive(&at_b, b, &mut fresh_image).unwrap();

  let incremental = TempDir::new().unwrap();
  let mut incremental_image = DirImage::new(incremental.path()).unwrap();
  applier.apply_archive(&at_a, a, &mut incremental_image).unwrap();
  let patch = at_b.create_patch(a, b, false).unwrap();
  applier.apply_patch(&at_b, &patch, &mut incremental_image).unwrap();

  assert_eq!(
    hash_directory(fresh.path()).unwrap(),
    hash_directory(incremental.path()).unwrap(),
    "{strategy:?}"
  );
  fresh
}

fn check_equivalence(strategy: PatchStrategy) {
  let repo_dir = TempDir::new().unwrap();
  let (a, b) = two_commits(repo_dir.path());
  let fresh = assert_equivalent(repo_dir.path(), &a, &b, strategy);

  assert!(fresh.path().join("srv/app/src/new/mod.rs").exists());
  assert!(!fresh.path().join("srv/app/tmp").exists());
}

fn remove(dir: &Path, relative_path: &str) {
  let path = dir.join(relative_path);
  if path.is_dir() {
    std::fs::remove_dir_all(path).unwrap();
  } else {
    std::fs::remove_file(path).unwrap();
  }
}

type Change = fn(&Path);

fn case(name: &'static str, before: Change, after: Change) -> (&'static str, Change, Change) {
  (name, before, after)
}

fn tricky_changes() -> Vec<(&'static str, Change, Change)> {
  vec![
    case(
      "directory becomes a file",
      |dir| {
        write(dir, "app/conf/x", "1\n");
        write(dir, "app/conf/y", "2\n");
      },
      |dir| {
        remove(dir, "app/conf");
        write(dir, "app/conf", "now a file\n");
      },
    ),
    case(
      "file becomes a directory",
      |dir| write(dir, "app/conf", "a file\n"),
      |dir| {
        remove(dir, "app/conf");
        write(dir, "app/conf/x", "1\n");
      },
    ),
    case(
      "directory deleted next to an added sibling",
      |dir| write(dir, "app/old/b/c", "c\n"),
      |dir| {
        remove(dir, "app/old");
        write(dir, "app/new/b/c", "c\n");
      },
    ),
    case(
      "crlf edits",
      |dir| write(dir, "app/win.txt", "one\r\ntwo\r\nthree\r\n"),
      |dir| write(dir, "app/win.txt", "one\r\nTWO\r\nthree\r\nfour\r\n"),
    ),
    case(
      "edits without trailing newline",
      |dir| {
        write(dir, "app/tail", "a\nb");
        write(dir, "app/gains", "x\ny");
      },
      |dir| {
        write(dir, "app/tail", "a\nc");
        write(dir, "app/gains", "x\ny\n");
      },
    ),
    case(
      "large rewrite",
      |dir| write(dir, "app/big.txt", &(0..3000).map(|i| format!("before {i}\n")).collect::<String>()),
      |dir| write(dir, "app/big.txt", &(0..3000).map(|i| format!("after {i}\n")).collect::<String>()),
    ),
  ]
}

fn check_change(name: &str, before: Change, after: Change) {
  let repo_dir = TempDir::new().unwrap();
  init_repo(repo_dir.path());
  write(repo_dir.path(), "app/keep", "k\n");
  before(repo_dir.path());
  let a = commit_all(repo_dir.path(), "before");
  after(repo_dir.path());
  let b = commit_all(repo_dir.path(), "after");

  for strategy in [PatchStrategy::TextPatch, PatchStrategy::FilteredArchive] {
    eprintln!("case: {name} ({strategy:?})");
    assert_equivalent(repo_dir.path(), &a, &b, strategy);
  }
}

#[test]
fn tricky_changes_match_fresh_archive() {
  require_git!();
  for (name, before, after) in tricky_changes() {
    check_change(name, before, after);
  }
}

#[cfg(unix)]
#[test]
fn type_changes_match_fresh_archive() {
  require_git!();
  check_change(
    "file becomes a symlink",
    |dir| write(dir, "app/link", "was a file\n"),
    |dir| {
      remove(dir, "app/link");
      std::os::unix::fs::symlink("keep", dir.join("app/link")).unwrap();
    },
  );
  check_change(
    "symlink becomes a file",
    |dir| std::os::unix::fs::symlink("keep", dir.join("app/link")).unwrap(),
    |dir| {
      remove(dir, "app/link");
      write(dir, "app/link", "now a file\n");
    },
  );
}

#[test]
fn archive_plus_text_patch_matches_fresh_archive() {
  require_git!();
  check_equivalence(PatchStrategy::TextPatch);
}

#[test]
fn archive_plus_filtered_archive_matches_fresh_archive() {
  require_git!();
  check_equivalence(PatchStrategy::FilteredArchive);
}

#[test]
fn decisions_follow_the_previous_image() {
  require_git!();
  let repo_dir = TempDir::new().unwrap();
  let (a, b) = two_commits(repo_dir.path());
  let repo = open(repo_dir.path());

  let scratch = TempDir::new().unwrap();
  let data = GitDataManager::new(scratch.path()).unwrap();
  let config = EngineConfig::default();
  let applier = GitApplier::new(&config, &data);
  let mapping = mapping_at(&repo, &b);

  let built_at = |commit: &str| BuiltImage {
    name: format!("previous-{}", commit),
    labels: mapping.labels_for(commit).unwrap(),
    ..Default::default()
  };

  assert_eq!(
    applier.decide(&mapping, None).unwrap(),
    ApplyDecision::Archive { commit: b.clone() }
  );
  assert_eq!(
    applier.decide(&mapping, Some(&built_at(&b))).unwrap(),
    ApplyDecision::NoOp { commit: b.clone() }
  );
  assert_eq!(
    applier.decide(&mapping, Some(&built_at(&a))).unwrap(),
    ApplyDecision::Patch { from: a, to: b }
  );
}

#[test]
fn apply_labels_the_working_image() {
  require_git!();
  let repo_dir = TempDir::new().unwrap();
  let (_, b) = two_commits(repo_dir.path());
  let repo = open(repo_dir.path());

  let scratch = TempDir::new().unwrap();
  let data = GitDataManager::new(scratch.path()).unwrap();
  let config = EngineConfig::default();
  let mapping = mapping_at(&repo, &b);

  let root = TempDir::new().unwrap();
  let mut image = DirImage::new(root.path()).unwrap();
  let outcome = GitApplier::new(&config, &data).apply(&mapping, None, &mut image).unwrap();

  assert_eq!(outcome.decision.kind(), "archive");
  assert_eq!(image.labels()[&mapping.commit_label()], b);
  assert_eq!(
    std::fs::read_to_string(root.path().join("srv/app/README.md")).unwrap(),
    "readme\n"
  );
}
