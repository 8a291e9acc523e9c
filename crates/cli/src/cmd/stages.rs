//! Implementation of the `stagecraft stages` command.
//!
//! Loads an image definition and prints the digest of every stage, computed
//! as for a build with nothing cached.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tracing::debug;

use stagecraft_lib::config::{EngineConfig, ImageConfig, ImportConfig};
use stagecraft_lib::dependency::IdentityMap;
use stagecraft_lib::git::{CachedRepo, GitDataManager, GitRepo, GixRepo};
use stagecraft_lib::git_mapping::GitMapping;
use stagecraft_lib::stage::{
  DockerfileStage, ImagePipeline, ImportChecksums, Stage, StageContext, StagePlan, stapel_stages,
};

use super::{parse_key_value, read_json};
use crate::output::{OutputFormat, print_json, print_stat, print_success, symbols, short_id};

#[derive(Args, Debug)]
pub struct StagesArgs {
  /// Path to the image definition (JSON)
  pub image: PathBuf,

  /// Repository the git mappings read from
  #[arg(long, default_value = ".")]
  pub repo: PathBuf,

  /// JSON object of finalized image identities, keyed by image name
  #[arg(long, value_name = "FILE")]
  pub identities: Option<PathBuf>,

  /// Source checksum of the files imported from an image
  #[arg(long = "import-checksum", value_name = "IMAGE=CHECKSUM", value_parser = parse_key_value)]
  pub import_checksums: Vec<(String, String)>,

  /// JSON engine configuration
  #[arg(long, value_name = "FILE")]
  pub config: Option<PathBuf>,

  #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
  pub output: OutputFormat,
}

/// Import checksums given per source image on the command line.
struct ChecksumsByImage(BTreeMap<String, String>);

impl ImportChecksums for ChecksumsByImage {
  fn checksum(&self, import: &ImportConfig) -> Result<String, String> {
    self
      .0
      .get(&import.image)
      .cloned()
      .ok_or_else(|| format!("pass --import-checksum {}=<checksum>", import.image))
  }
}

fn image_stages(image: &ImageConfig, args: &StagesArgs) -> Result<Vec<Box<dyn Stage>>> {
  if let Some(dockerfile) = &image.dockerfile {
    let stage: Box<dyn Stage> = Box::new(DockerfileStage::from_config(dockerfile)?);
    return Ok(vec![stage]);
  }

  let mut mappings = Vec::with_capacity(image.git.len());
  if !image.git.is_empty() {
    let repo: Arc<dyn GitRepo> = Arc::new(CachedRepo::new(
      GixRepo::open_local(&args.repo).with_context(|| format!("Failed to open repository: {}", args.repo.display()))?,
    ));
    for git in &image.git {
      mappings.push(GitMapping::from_config(repo.clone(), git)?);
    }
  }
  Ok(stapel_stages(image, mappings)?)
}

pub fn cmd_stages(args: &StagesArgs, verbose: bool) -> Result<()> {
  let image = ImageConfig::load(&args.image)?;
  let mut config: EngineConfig = match &args.config {
    Some(path) => read_json(path)?,
    None => EngineConfig::default(),
  };
  config.debug_dockerfile_dependencies |= verbose;

  let identities: IdentityMap = match &args.identities {
    Some(path) => read_json(path)?,
    None => IdentityMap::new(),
  };
  let imports = ChecksumsByImage(args.import_checksums.iter().cloned().collect());
  let git_data = GitDataManager::new(&config.scratch_root()).context("Failed to create scratch directory")?;

  let pipeline = ImagePipeline::new(image_stages(&image, args)?);
  debug!(image = %image.name, stages = pipeline.stages().len(), "assembled image stages");
  let ctx = StageContext {
    config: &config,
    git_data: &git_data,
    identities: &identities,
    imports: &imports,
  };
  let plans: Vec<StagePlan> = pipeline
    .digests(&ctx)
    .with_context(|| format!("Failed to compute stage digests of image '{}'", image.name))?;

  if args.output.is_json() {
    let json_output = serde_json::json!({ "image": image.name, "stages": plans });
    return print_json(&json_output);
  }

  print_success(&format!("Image {}: {} stage(s)", image.name, plans.len()));
  for plan in &plans {
    let digest = if verbose { plan.digest.as_str() } else { short_id(plan.digest.as_str()) };
    let marker = if plan.empty { symbols::MINUS } else { symbols::PLUS };
    print_stat(&format!("{} {}", marker, plan.name), digest);
  }
  Ok(())
}
