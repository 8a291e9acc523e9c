//! Implementation of the `stagecraft git-mapping` command.
//!
//! Prints what the engine knows about one git mapping of a local repository:
//! its identity, its labels, the commit it resolves to, and how it would be
//! applied on top of an image carrying the given previous labels.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;

use stagecraft_lib::config::{EngineConfig, GitMappingConfig};
use stagecraft_lib::git::{CachedRepo, GitDataManager, GitRepo, GixRepo};
use stagecraft_lib::git_mapping::{ApplyDecision, GitApplier, GitMapping};
use stagecraft_lib::image::BuiltImage;

use super::read_json;
use crate::output::{OutputFormat, format_bytes, print_info, print_json, print_stat, print_success, short_id};

#[derive(Args, Debug)]
pub struct GitMappingArgs {
  /// Path to the repository
  pub repo: PathBuf,

  /// Repository path to copy
  #[arg(long, default_value = "/")]
  pub add: String,

  /// Absolute destination inside the image
  #[arg(long)]
  pub to: String,

  /// Name distinguishing several mappings of one repository
  #[arg(long)]
  pub name: Option<String>,

  /// Include glob, relative to the added path
  #[arg(long = "include")]
  pub include_paths: Vec<String>,

  /// Exclude glob, relative to the added path
  #[arg(long = "exclude")]
  pub exclude_paths: Vec<String>,

  #[arg(long, conflicts_with_all = ["tag", "commit"])]
  pub branch: Option<String>,

  #[arg(long, conflicts_with = "commit")]
  pub tag: Option<String>,

  #[arg(long)]
  pub commit: Option<String>,

  /// JSON object of the labels of a previously built image
  #[arg(long, value_name = "FILE")]
  pub prev_labels: Option<PathBuf>,

  #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
  pub output: OutputFormat,
}

impl GitMappingArgs {
  fn config(&self) -> GitMappingConfig {
    GitMappingConfig {
      name: self.name.clone(),
      add: self.add.clone(),
      to: self.to.clone(),
      include_paths: self.include_paths.clone(),
      exclude_paths: self.exclude_paths.clone(),
      branch: self.branch.clone(),
      tag: self.tag.clone(),
      commit: self.commit.clone(),
      ..Default::default()
    }
  }
}

pub fn cmd_git_mapping(args: &GitMappingArgs) -> Result<()> {
  let repo: Arc<dyn GitRepo> = Arc::new(CachedRepo::new(
    GixRepo::open_local(&args.repo).with_context(|| format!("Failed to open repository: {}", args.repo.display()))?,
  ));
  let mapping = GitMapping::from_config(repo, &args.config())?;

  let commit = mapping.latest_commit().context("Failed to resolve the mapping commit")?;
  let archive_type = mapping.archive_type(&commit)?;
  let empty = mapping.is_empty()?;
  let labels = mapping.labels_for(&commit)?;

  let prev = match &args.prev_labels {
    Some(path) => {
      let labels: BTreeMap<String, String> = read_json(path)?;
      Some(BuiltImage {
        name: "previous".to_string(),
        labels,
        ..Default::default()
      })
    }
    None => None,
  };

  let engine = EngineConfig::default();
  let data = GitDataManager::new(&engine.scratch_root()).context("Failed to create scratch directory")?;
  let decision = GitApplier::new(&engine, &data).decide(&mapping, prev.as_ref())?;
  let patch_size = match &decision {
    ApplyDecision::Patch { from, .. } => Some(mapping.patch_size(from)?),
    _ => None,
  };

  if args.output.is_json() {
    let (from, to) = match &decision {
      ApplyDecision::Archive { commit } | ApplyDecision::NoOp { commit } => (None, commit.clone()),
      ApplyDecision::Patch { from, to } => (Some(from.clone()), to.clone()),
    };
    let json_output = serde_json::json!({
      "name": mapping.full_name(),
      "paramsHash": mapping.params_hash(),
      "commit": commit,
      "archiveType": archive_type.to_string(),
      "empty": empty,
      "labels": labels,
      "decision": { "kind": decision.kind(), "from": from, "to": to, "patchSize": patch_size },
    });
    return print_json(&json_output);
  }

  print_success(&format!("Git mapping {}", mapping.full_name()));
  print_stat("Params hash", &mapping.params_hash());
  print_stat("Commit", &commit);
  print_stat("Archive type", &archive_type.to_string());
  print_stat("Empty", &empty.to_string());
  for key in labels.keys() {
    print_stat("Label", key);
  }
  println!();

  match &decision {
    ApplyDecision::Archive { commit } => print_info(&format!("Apply: archive at {}", short_id(commit))),
    ApplyDecision::NoOp { commit } => print_info(&format!("Apply: nothing to do at {}", short_id(commit))),
    ApplyDecision::Patch { from, to } => print_info(&format!(
      "Apply: patch {}..{} ({})",
      short_id(from),
      short_id(to),
      format_bytes(patch_size.unwrap_or_default())
    )),
  }
  Ok(())
}
