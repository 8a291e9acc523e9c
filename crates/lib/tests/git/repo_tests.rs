use stagecraft_lib::git::{EntryMode, GitRepo, GixRepo};
use tempfile::TempDir;

use super::common::{commit_all, git, init_repo, require_git, write};

#[test]
fn resolves_head_branch_and_tag() {
  require_git!();
  let dir = TempDir::new().unwrap();
  init_repo(dir.path());
  write(dir.path(), "a.txt", "one\n");
  let first = commit_all(dir.path(), "first");
  git(dir.path(), &["tag", "v1"]);
  git(dir.path(), &["branch", "feature"]);
  write(dir.path(), "a.txt", "two\n");
  let second = commit_all(dir.path(), "second");

  let repo = GixRepo::open_local(dir.path()).unwrap();

  assert!(repo.is_local());
  assert_eq!(repo.head_commit().unwrap(), second);
  assert_eq!(repo.tag_commit("v1").unwrap(), first);
  assert_eq!(repo.branch_commit("feature").unwrap(), first);
  assert!(repo.branch_commit("missing").is_err());
}

#[test]
fn commit_exists_only_for_commits() {
  require_git!();
  let dir = TempDir::new().unwrap();
  init_repo(dir.path());
  write(dir.path(), "a.txt", "one\n");
  let commit = commit_all(dir.path(), "first");
  let blob = git(dir.path(), &["rev-parse", "HEAD:a.txt"]);

  let repo = GixRepo::open_local(dir.path()).unwrap();

  assert!(repo.commit_exists(&commit).unwrap());
  assert!(!repo.commit_exists(&blob).unwrap());
  assert!(!repo.commit_exists(&"0".repeat(40)).unwrap());
  assert!(!repo.commit_exists("not-a-hash").unwrap());
}

#[cfg(unix)]
#[test]
fn ls_tree_lists_blobs_with_modes() {
  use std::os::unix::fs::PermissionsExt;

  require_git!();
  let dir = TempDir::new().unwrap();
  init_repo(dir.path());
  write(dir.path(), "src/lib.rs", "pub fn f() {}\n");
  write(dir.path(), "run.sh", "#!/bin/sh\n");
  write(dir.path(), "README.md", "# readme\n");
  std::fs::set_permissions(dir.path().join("run.sh"), std::fs::Permissions::from_mode(0o755)).unwrap();
  let commit = commit_all(dir.path(), "first");

  let repo = GixRepo::open_local(dir.path()).unwrap();
  let entries = repo.ls_tree(&commit).unwrap();

  let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
  assert_eq!(paths, vec!["README.md", "run.sh", "src/lib.rs"]);
  assert_eq!(entries[0].mode, EntryMode::Blob);
  assert_eq!(entries[1].mode, EntryMode::BlobExecutable);

  let readme = repo.read_blob(&entries[0].oid).unwrap();
  assert_eq!(readme, b"# readme\n");
}
