mod dockerfile_digest;
mod git_mapping;
mod stages;

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;

pub use dockerfile_digest::{DockerfileDigestArgs, cmd_dockerfile_digest};
pub use git_mapping::{GitMappingArgs, cmd_git_mapping};
pub use stages::{StagesArgs, cmd_stages};

/// Parse a `KEY=VALUE` flag value.
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
  match s.split_once('=') {
    Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
    _ => Err(format!("expected KEY=VALUE, got '{}'", s)),
  }
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
  let content = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
  serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}
