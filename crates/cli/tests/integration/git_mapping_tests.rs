//! git-mapping command integration tests. They need a git binary.

use super::common::{TestEnv, commit_all, init_repo, require_git};

#[test]
fn git_mapping_archives_without_previous_image() {
  require_git!();

  let env = TestEnv::new();
  env.write_file("repo/src/main.rs", "fn main() {}\n");
  env.write_file("repo/README.md", "# app\n");
  let commit = init_repo(&env.path("repo"));

  let output = env
    .cmd()
    .arg("git-mapping")
    .arg(env.path("repo"))
    .args(["--add", "/src", "--to", "/app/src", "--output", "json"])
    .output()
    .unwrap();
  assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

  let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(json["commit"], commit.as_str());
  assert_eq!(json["archiveType"], "directory");
  assert_eq!(json["empty"], false);
  assert_eq!(json["decision"]["kind"], "archive");
}

#[test]
fn git_mapping_patches_on_top_of_previous_labels() {
  require_git!();

  let env = TestEnv::new();
  env.write_file("repo/src/main.rs", "fn main() {}\n");
  let repo = env.path("repo");
  init_repo(&repo);

  let first = env
    .cmd()
    .arg("git-mapping")
    .arg(&repo)
    .args(["--to", "/app", "--output", "json"])
    .output()
    .unwrap();
  assert!(first.status.success());
  let first: serde_json::Value = serde_json::from_slice(&first.stdout).unwrap();
  let labels = env.write_file("labels.json", &first["labels"].to_string());

  let unchanged = env
    .cmd()
    .arg("git-mapping")
    .arg(&repo)
    .args(["--to", "/app", "--output", "json", "--prev-labels"])
    .arg(&labels)
    .output()
    .unwrap();
  let unchanged: serde_json::Value = serde_json::from_slice(&unchanged.stdout).unwrap();
  assert_eq!(unchanged["decision"]["kind"], "noop");

  env.write_file("repo/src/main.rs", "fn main() {\n  println!(\"hi\");\n}\n");
  let second = commit_all(&repo, "change");

  let changed = env
    .cmd()
    .arg("git-mapping")
    .arg(&repo)
    .args(["--to", "/app", "--output", "json", "--prev-labels"])
    .arg(&labels)
    .output()
    .unwrap();
  let changed: serde_json::Value = serde_json::from_slice(&changed.stdout).unwrap();
  assert_eq!(changed["decision"]["kind"], "patch");
  assert_eq!(changed["decision"]["from"], first["commit"]);
  assert_eq!(changed["decision"]["to"], second.as_str());
}
