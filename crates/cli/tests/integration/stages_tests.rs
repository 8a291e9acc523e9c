//! stages command integration tests.

use predicates::prelude::*;

use super::common::TestEnv;

const HELLO: &str = "FROM alpine:latest\nRUN echo hello\n";

const SHELL_IMAGE: &str = r#"{
  "name": "backend",
  "from": "alpine:3.20",
  "shell": { "install": { "commands": ["make"] } },
  "docker": { "workdir": "/app" }
}"#;

#[test]
fn stages_of_a_shell_image() {
  let env = TestEnv::new();
  let image = env.write_file("image.json", SHELL_IMAGE);

  env
    .cmd()
    .arg("stages")
    .arg(&image)
    .assert()
    .success()
    .stdout(predicate::str::contains("3 stage(s)"))
    .stdout(predicate::str::contains("install"))
    .stdout(predicate::str::contains("dockerInstructions"));
}

#[test]
fn stages_json_is_stable() {
  let env = TestEnv::new();
  let image = env.write_file("image.json", SHELL_IMAGE);

  let run = || {
    let output = env
      .cmd()
      .arg("stages")
      .arg(&image)
      .args(["--output", "json"])
      .output()
      .unwrap();
    assert!(output.status.success());
    serde_json::from_slice::<serde_json::Value>(&output.stdout).unwrap()
  };

  let first = run();
  assert_eq!(first["image"], "backend");
  assert_eq!(first["stages"][0]["name"], "from");
  assert_eq!(first["stages"][1]["name"], "install");
  assert_eq!(first, run());
}

#[test]
fn stages_with_unbuilt_dependency_fail() {
  let env = TestEnv::new();
  let image = env.write_file(
    "image.json",
    r#"{
      "name": "backend",
      "from": "alpine:3.20",
      "dependencies": [{
        "image": "assets",
        "after": "install",
        "imports": [{ "type": "ImageName", "targetEnv": "ASSETS_IMAGE" }]
      }]
    }"#,
  );

  env
    .cmd()
    .arg("stages")
    .arg(&image)
    .assert()
    .failure()
    .stderr(predicate::str::contains("assets"));
}

#[test]
fn stages_of_a_dockerfile_image() {
  let env = TestEnv::new();
  env.write_file("ctx/Dockerfile", HELLO);
  let image = env.write_file(
    "image.json",
    &format!(
      r#"{{ "name": "web", "dockerfile": {{ "path": "Dockerfile", "context": "{}" }} }}"#,
      env.path("ctx").display()
    ),
  );

  env
    .cmd()
    .arg("stages")
    .arg(&image)
    .assert()
    .success()
    .stdout(predicate::str::contains("dockerfile"));
}
