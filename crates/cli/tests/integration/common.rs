//! Shared test helpers for CLI integration tests.

use std::path::{Path, PathBuf};
use std::process::Command as StdCommand;

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

/// Get a Command for the stagecraft binary.
pub fn stagecraft_cmd() -> Command {
  cargo_bin_cmd!("stagecraft")
}

/// Isolated test environment.
///
/// Each test gets its own temporary directory; scratch files of the engine
/// land beneath it too.
pub struct TestEnv {
  pub temp: TempDir,
}

impl TestEnv {
  pub fn new() -> Self {
    Self {
      temp: TempDir::new().unwrap(),
    }
  }

  pub fn path(&self, relative_path: &str) -> PathBuf {
    self.temp.path().join(relative_path)
  }

  /// Write a file relative to the temp directory.
  pub fn write_file(&self, relative_path: &str, content: &str) -> PathBuf {
    let path = self.path(relative_path);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    path
  }

  /// Command with `TMPDIR` pointed inside the environment.
  pub fn cmd(&self) -> Command {
    let mut cmd = stagecraft_cmd();
    cmd.env("TMPDIR", self.path("tmp"));
    std::fs::create_dir_all(self.path("tmp")).unwrap();
    cmd
  }
}

/// Whether a `git` binary is on the PATH.
pub fn git_available() -> bool {
  StdCommand::new("git")
    .arg("--version")
    .output()
    .map(|o| o.status.success())
    .unwrap_or(false)
}

pub fn git(dir: &Path, args: &[&str]) -> String {
  let output = StdCommand::new("git")
    .args(args)
    .current_dir(dir)
    .env("GIT_AUTHOR_NAME", "test")
    .env("GIT_AUTHOR_EMAIL", "test@example.com")
    .env("GIT_COMMITTER_NAME", "test")
    .env("GIT_COMMITTER_EMAIL", "test@example.com")
    .output()
    .unwrap();
  assert!(output.status.success(), "git {:?}: {}", args, String::from_utf8_lossy(&output.stderr));
  String::from_utf8(output.stdout).unwrap().trim().to_string()
}

/// Initialise a repository at `dir` and commit every file currently in it.
/// Returns the commit id.
pub fn init_repo(dir: &Path) -> String {
  git(dir, &["init", "-q"]);
  commit_all(dir, "initial")
}

pub fn commit_all(dir: &Path, message: &str) -> String {
  git(dir, &["add", "-A"]);
  git(dir, &["-c", "commit.gpgsign=false", "commit", "-q", "-m", message]);
  git(dir, &["rev-parse", "HEAD"])
}

macro_rules! require_git {
  () => {
    if !super::common::git_available() {
      eprintln!("git not available, skipping");
      return;
    }
  };
}
pub(crate) use require_git;
