//! dockerfile-digest command integration tests.

use predicates::prelude::*;

use super::common::TestEnv;

const HELLO: &str = "FROM alpine:latest\nRUN echo hello\n";
const HELLO_DIGEST: &str = "b9d5527ee7a7047747bce5fb5fd1d7ab2b687f141a91151620098b60c2ad0eae";

const BASE_FROM_ARG: &str = "ARG BASE_IMAGE=alpine:latest\n\nFROM ${BASE_IMAGE}\nRUN echo hello\n";
const UBUNTU_DIGEST: &str = "573c4bd0f7480e27c266d55d3a020c7ec4acaebebf897d29cad78fded3b725c7";

#[test]
fn dockerfile_digest_of_trivial_dockerfile() {
  let env = TestEnv::new();
  let dockerfile = env.write_file("Dockerfile", HELLO);

  env
    .cmd()
    .arg("dockerfile-digest")
    .arg(&dockerfile)
    .assert()
    .success()
    .stdout(predicate::str::contains(HELLO_DIGEST));
}

#[test]
fn dependency_args_select_the_base_image() {
  let env = TestEnv::new();
  let dockerfile = env.write_file("Dockerfile", BASE_FROM_ARG);
  let args = env.write_file("deps.json", r#"{"BASE_IMAGE": "ubuntu:latest"}"#);

  env
    .cmd()
    .arg("dockerfile-digest")
    .arg(&dockerfile)
    .arg("--dependency-args")
    .arg(&args)
    .assert()
    .success()
    .stdout(predicate::str::contains(UBUNTU_DIGEST));
}

#[test]
fn dependency_args_win_over_build_args() {
  let env = TestEnv::new();
  let dockerfile = env.write_file("Dockerfile", BASE_FROM_ARG);
  let args = env.write_file("deps.json", r#"{"BASE_IMAGE": "ubuntu:latest"}"#);

  env
    .cmd()
    .arg("dockerfile-digest")
    .arg(&dockerfile)
    .args(["--build-arg", "BASE_IMAGE=centos:latest"])
    .arg("--dependency-args")
    .arg(&args)
    .assert()
    .success()
    .stdout(predicate::str::contains(UBUNTU_DIGEST));
}

#[test]
fn undefined_base_argument_fails() {
  let env = TestEnv::new();
  let dockerfile = env.write_file("Dockerfile", "ARG BASE_NAME=alpine:latest\nFROM ${BASE_NAME1}\nRUN echo hello\n");

  env
    .cmd()
    .arg("dockerfile-digest")
    .arg(&dockerfile)
    .assert()
    .failure()
    .stderr(predicate::str::contains("invalid base image"));
}

#[test]
fn onbuild_triggers_change_the_digest() {
  let env = TestEnv::new();
  let dockerfile = env.write_file("Dockerfile", HELLO);
  let onbuild = env.write_file("onbuild.json", r#"{"alpine:latest": ["RUN echo triggered"]}"#);

  env
    .cmd()
    .arg("dockerfile-digest")
    .arg(&dockerfile)
    .arg("--onbuild")
    .arg(&onbuild)
    .assert()
    .success()
    .stdout(predicate::str::contains(HELLO_DIGEST).not());
}

#[test]
fn dockerfile_digest_json_output() {
  let env = TestEnv::new();
  let dockerfile = env.write_file("Dockerfile", HELLO);

  let output = env
    .cmd()
    .arg("dockerfile-digest")
    .arg(&dockerfile)
    .args(["--output", "json"])
    .output()
    .unwrap();
  assert!(output.status.success());

  let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(json["digest"], HELLO_DIGEST);
  assert_eq!(json["target"], 0);
  assert_eq!(json["dependencies"][0], "alpine:latest");
}

#[test]
fn unknown_target_fails() {
  let env = TestEnv::new();
  let dockerfile = env.write_file("Dockerfile", HELLO);

  env
    .cmd()
    .arg("dockerfile-digest")
    .arg(&dockerfile)
    .args(["--target", "release"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("release is not a valid target build stage"));
}
