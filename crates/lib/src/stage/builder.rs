//! Shell builder shared by the user stages.

use crate::config::{ShellConfig, ShellStageConfig};
use crate::util::hash::sha256_args;

use super::StageName;

/// Runs the configured shell commands of the user stages.
#[derive(Debug, Clone, Default)]
pub struct ShellBuilder {
  config: ShellConfig,
}

impl ShellBuilder {
  pub fn new(config: &ShellConfig) -> Self {
    Self { config: config.clone() }
  }

  fn stage_config(&self, name: StageName) -> Option<&ShellStageConfig> {
    match name {
      StageName::BeforeInstall => Some(&self.config.before_install),
      StageName::Install => Some(&self.config.install),
      StageName::BeforeSetup => Some(&self.config.before_setup),
      StageName::Setup => Some(&self.config.setup),
      _ => None,
    }
  }

  pub fn commands(&self, name: StageName) -> &[String] {
    self.stage_config(name).map(|c| c.commands.as_slice()).unwrap_or_default()
  }

  /// Checksum of the stage commands and cache versions, empty when the
  /// stage has neither.
  pub fn checksum(&self, name: StageName) -> String {
    let mut args: Vec<String> = self.commands(name).to_vec();
    if let Some(version) = self.version_checksum(name) {
      args.push(version);
    }
    if args.is_empty() {
      return String::new();
    }
    sha256_args(&args).0
  }

  fn version_checksum(&self, name: StageName) -> Option<String> {
    let stage_version = self.stage_config(name).and_then(|c| c.cache_version.as_deref());
    let versions: Vec<&str> = [stage_version, self.config.cache_version.as_deref()]
      .into_iter()
      .flatten()
      .filter(|v| !v.is_empty())
      .collect();
    if versions.is_empty() {
      return None;
    }
    Some(sha256_args(versions).0)
  }

  pub fn is_empty(&self, name: StageName) -> bool {
    self.checksum(name).is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn builder(install: &[&str], cache_version: Option<&str>) -> ShellBuilder {
    ShellBuilder::new(&ShellConfig {
      install: ShellStageConfig {
        commands: install.iter().map(|c| c.to_string()).collect(),
        cache_version: cache_version.map(str::to_string),
      },
      ..Default::default()
    })
  }

  #[test]
  fn stage_without_commands_is_empty() {
    let builder = builder(&[], None);
    assert!(builder.is_empty(StageName::Install));
    assert_eq!(builder.checksum(StageName::Install), "");
  }

  #[test]
  fn commands_define_checksum() {
    let builder = builder(&["make deps", "make"], None);
    assert_eq!(builder.checksum(StageName::Install), sha256_args(["make deps", "make"]).0);
    assert!(builder.is_empty(StageName::Setup));
  }

  #[test]
  fn cache_version_alone_makes_stage_non_empty() {
    let builder = builder(&[], Some("2"));
    assert!(!builder.is_empty(StageName::Install));
    assert_ne!(builder.checksum(StageName::Install), builder_checksum_with_version("3"));
  }

  fn builder_checksum_with_version(version: &str) -> String {
    builder(&[], Some(version)).checksum(StageName::Install)
  }

  #[test]
  fn global_cache_version_applies_to_configured_stages() {
    let mut config = ShellConfig::default();
    config.setup.commands = vec!["true".to_string()];
    let before = ShellBuilder::new(&config).checksum(StageName::Setup);
    config.cache_version = Some("v2".to_string());
    assert_ne!(ShellBuilder::new(&config).checksum(StageName::Setup), before);
  }
}
