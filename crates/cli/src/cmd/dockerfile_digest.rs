//! Implementation of the `stagecraft dockerfile-digest` command.
//!
//! Resolves the dependency list of a Dockerfile target and prints its digest.
//! OnBuild triggers of base images come from a JSON file instead of a
//! container runtime; bases missing from it are assumed to have none.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use tracing::debug;

use stagecraft_lib::config::EngineConfig;
use stagecraft_lib::dockerfile::{DirContext, DockerStages, Dockerfile, OfflineRegistry, OnBuildFetcher, StaticOnBuild};

use super::{parse_key_value, read_json};
use crate::output::{OutputFormat, print_info, print_json, print_stat, print_success};

#[derive(Args, Debug)]
pub struct DockerfileDigestArgs {
  /// Path to the Dockerfile
  pub dockerfile: PathBuf,

  /// Build context directory (default: the Dockerfile's directory)
  #[arg(long)]
  pub context: Option<PathBuf>,

  /// Target stage (default: the last stage)
  #[arg(long)]
  pub target: Option<String>,

  /// Build argument
  #[arg(long = "build-arg", value_name = "KEY=VALUE", value_parser = parse_key_value)]
  pub build_args: Vec<(String, String)>,

  /// JSON object of projected dependency arguments; these win over build args
  #[arg(long, value_name = "FILE")]
  pub dependency_args: Option<PathBuf>,

  /// Extra host entry, as passed to the builder
  #[arg(long = "add-host")]
  pub add_host: Vec<String>,

  /// Value folded into the target digest
  #[arg(long)]
  pub image_cache_version: Option<String>,

  /// JSON object mapping base image references to their OnBuild triggers
  #[arg(long, value_name = "FILE")]
  pub onbuild: Option<PathBuf>,

  #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
  pub output: OutputFormat,
}

fn context_dir(args: &DockerfileDigestArgs) -> PathBuf {
  match &args.context {
    Some(context) => context.clone(),
    None => args
      .dockerfile
      .parent()
      .filter(|p| !p.as_os_str().is_empty())
      .map(Path::to_path_buf)
      .unwrap_or_else(|| PathBuf::from(".")),
  }
}

pub fn cmd_dockerfile_digest(args: &DockerfileDigestArgs, verbose: bool) -> Result<()> {
  let dockerfile = Dockerfile::load(&args.dockerfile)
    .with_context(|| format!("Failed to load Dockerfile: {}", args.dockerfile.display()))?;

  let mut stages = DockerStages::new(dockerfile, args.target.as_deref())?
    .with_build_args(args.build_args.iter().cloned().collect())
    .with_add_host(args.add_host.clone())
    .with_image_cache_version(args.image_cache_version.clone());

  let dependency_args: BTreeMap<String, String> = match &args.dependency_args {
    Some(path) => read_json(path)?,
    None => BTreeMap::new(),
  };
  let onbuild: BTreeMap<String, Vec<String>> = match &args.onbuild {
    Some(path) => read_json(path)?,
    None => BTreeMap::new(),
  };

  let inspector = StaticOnBuild::new(onbuild);
  stages
    .fetch_onbuild(&OnBuildFetcher::new(&inspector, &OfflineRegistry), &dependency_args)
    .context("Failed to fetch base image OnBuild triggers")?;

  let context_dir = context_dir(args);
  let context_dir = dunce::canonicalize(&context_dir).unwrap_or(context_dir);
  debug!(context = %context_dir.display(), "using build context");
  let context = DirContext::new(&context_dir)
    .with_context(|| format!("Failed to open build context: {}", context_dir.display()))?;

  let config = EngineConfig {
    debug_dockerfile_dependencies: verbose,
    ..Default::default()
  };
  let resolved = stages.resolve(&config, &dependency_args, &context)?;

  if args.output.is_json() {
    return print_json(&resolved);
  }

  if verbose {
    print_info(&format!("Target stage: {}", resolved.target));
    for dependency in &resolved.dependencies {
      print_stat("dependency", dependency);
    }
  }
  print_success(&resolved.digest.0);
  Ok(())
}
