use std::path::Path;
use std::process::Command;

/// Whether a `git` binary is on the PATH.
pub fn git_available() -> bool {
  Command::new("git")
    .arg("--version")
    .output()
    .map(|o| o.status.success())
    .unwrap_or(false)
}

pub fn git(dir: &Path, args: &[&str]) -> String {
  let output = Command::new("git")
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

pub fn write(dir: &Path, relative_path: &str, content: &str) {
  let path = dir.join(relative_path);
  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent).unwrap();
  }
  std::fs::write(path, content).unwrap();
}

/// Stage everything under `dir` and commit it. Returns the commit id.
pub fn commit_all(dir: &Path, message: &str) -> String {
  git(dir, &["add", "-A"]);
  git(dir, &["-c", "commit.gpgsign=false", "commit", "-q", "-m", message]);
  git(dir, &["rev-parse", "HEAD"])
}

pub fn init_repo(dir: &Path) {
  std::fs::create_dir_all(dir).unwrap();
  git(dir, &["init", "-q"]);
  git(dir, &["config", "core.autocrlf", "false"]);
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
