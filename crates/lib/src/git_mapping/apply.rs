//! The git incremental applier.
//!
//! For each mapping the applier picks one of three transfers into the
//! working image:
//! - `Archive`: the full filtered tree at the latest commit. Mandatory when
//!   the previous image carries no commit label, when its recorded history is
//!   gone, or when the archive type changed.
//! - `Patch`: the diff between the recorded and the latest commit. Text diffs
//!   are applied as patches; binary diffs (or the `FilteredArchive` strategy)
//!   remove the changed paths and unpack an archive restricted to them.
//! - `NoOp`: the filtered diff is empty; only labels advance.

use std::collections::BTreeMap;

use tracing::{debug, info};

use super::{GitMapping, GitMappingError};
use crate::config::{EngineConfig, PatchStrategy};
use crate::git::{ArchiveOptions, GitDataManager, Patch, create_archive, project_path};
use crate::image::{ArchiveRequest, BuiltImage, PatchRequest, WorkingImage};

/// What the applier will do for one mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyDecision {
  Archive { commit: String },
  Patch { from: String, to: String },
  NoOp { commit: String },
}

impl ApplyDecision {
  pub fn kind(&self) -> &'static str {
    match self {
      Self::Archive { .. } => "archive",
      Self::Patch { .. } => "patch",
      Self::NoOp { .. } => "noop",
    }
  }
}

/// What the applier did for one mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOutcome {
  pub decision: ApplyDecision,
  /// Whether text patches were replaced by remove + filtered archive.
  pub used_filtered_archive: bool,
  pub labels: BTreeMap<String, String>,
}

pub struct GitApplier<'a> {
  config: &'a EngineConfig,
  data: &'a GitDataManager,
}

impl<'a> GitApplier<'a> {
  pub fn new(config: &'a EngineConfig, data: &'a GitDataManager) -> Self {
    Self { config, data }
  }

  /// Decide how `mapping` reaches its latest commit on top of `prev`.
  pub fn decide(&self, mapping: &GitMapping, prev: Option<&BuiltImage>) -> Result<ApplyDecision, GitMappingError> {
    let latest = mapping.latest_commit()?;

    let Some(prev) = prev else {
      return Ok(ApplyDecision::Archive { commit: latest });
    };
    let Some(info) = mapping.image_commit_info(prev) else {
      return Ok(ApplyDecision::Archive { commit: latest });
    };
    if mapping.should_be_reset(prev)? {
      info!(mapping = %mapping.full_name(), commit = %info.commit, "recorded commit is gone, archiving");
      return Ok(ApplyDecision::Archive { commit: latest });
    }
    let current_type = mapping.archive_type(&latest)?;
    if info.archive_type.is_some_and(|t| t != current_type) {
      debug!(mapping = %mapping.full_name(), "archive type changed, archiving");
      return Ok(ApplyDecision::Archive { commit: latest });
    }

    let base = mapping.base_commit_for_prev_built_image(prev)?;
    if base == latest || mapping.create_patch(&base, &latest, false)?.is_empty() {
      return Ok(ApplyDecision::NoOp { commit: latest });
    }
    Ok(ApplyDecision::Patch { from: base, to: latest })
  }

  /// Decide and perform the transfer, then record the new labels.
  pub fn apply(
    &self,
    mapping: &GitMapping,
    prev: Option<&BuiltImage>,
    image: &mut dyn WorkingImage,
  ) -> Result<ApplyOutcome, GitMappingError> {
    let decision = self.decide(mapping, prev)?;
    let mut used_filtered_archive = false;

    let commit = match &decision {
      ApplyDecision::Archive { commit } => {
        self.apply_archive(mapping, commit, image)?;
        commit.clone()
      }
      ApplyDecision::Patch { from, to } => {
        let patch = mapping.create_patch(from, to, false)?;
        used_filtered_archive = self.apply_patch(mapping, &patch, image)?;
        to.clone()
      }
      ApplyDecision::NoOp { commit } => commit.clone(),
    };

    let labels = mapping.labels_for(&commit)?;
    image.add_labels(&labels)?;

    debug!(
      mapping = %mapping.full_name(),
      decision = decision.kind(),
      commit,
      "applied git mapping"
    );

    Ok(ApplyOutcome {
      decision,
      used_filtered_archive,
      labels,
    })
  }

  /// Unpack the full filtered tree at `commit`.
  pub fn apply_archive(
    &self,
    mapping: &GitMapping,
    commit: &str,
    image: &mut dyn WorkingImage,
  ) -> Result<(), GitMappingError> {
    let scope = mapping.path_scope(commit)?;
    let renames = mapping.file_renames(commit)?;
    let matcher = mapping.path_matcher();
    let archive_type = mapping.archive_type(commit)?;

    let dest = self.data.new_file_path("archive", "tar");
    let archive = create_archive(
      mapping.repo(),
      &ArchiveOptions {
        commit,
        matcher: &matcher,
        scope: &scope,
        renames: &renames,
        only_paths: None,
      },
      &dest,
    )?;

    image.add_data_archive(&ArchiveRequest {
      archive: &archive.path,
      archive_type,
      to: mapping.to(),
      owner: mapping.owner(),
      group: mapping.group(),
    })?;
    Ok(())
  }

  /// Apply `patch`. Returns whether the filtered-archive path was taken.
  pub fn apply_patch(
    &self,
    mapping: &GitMapping,
    patch: &Patch,
    image: &mut dyn WorkingImage,
  ) -> Result<bool, GitMappingError> {
    if patch.is_empty() {
      return Ok(false);
    }

    let archive_type = mapping.archive_type(&patch.to_commit)?;
    let target_dir = mapping.target_dir(archive_type);

    let use_archive = self.config.patch_strategy == PatchStrategy::FilteredArchive || patch.has_binary();
    if !use_archive {
      let patch_file = self
        .data
        .write_file("patch", "diff", patch.text.as_bytes())
        .map_err(GitMappingError::Git)?;
      image.apply_patch(&PatchRequest {
        patch: &patch_file,
        to: &target_dir,
        owner: mapping.owner(),
        group: mapping.group(),
      })?;
      return Ok(false);
    }

    let scope = mapping.path_scope(&patch.to_commit)?;
    let renames = mapping.file_renames(&patch.to_commit)?;
    let from_scope = mapping.path_scope(&patch.from_commit)?;
    let from_renames = mapping.file_renames(&patch.from_commit)?;

    // Removed paths are projected with the layout they had at the base commit.
    let removed: Vec<String> = patch
      .paths
      .iter()
      .filter_map(|path| {
        if patch.paths_to_remove.contains(path) {
          project_path(&from_scope, &from_renames, path)
        } else {
          project_path(&scope, &renames, path)
        }
      })
      .filter(|p| !p.is_empty())
      .collect();
    image.remove_paths(&target_dir, &removed, true)?;

    let to_add = patch.paths_to_add();
    if !to_add.is_empty() {
      let matcher = mapping.path_matcher();
      let dest = self.data.new_file_path("patch-archive", "tar");
      let archive = create_archive(
        mapping.repo(),
        &ArchiveOptions {
          commit: &patch.to_commit,
          matcher: &matcher,
          scope: &scope,
          renames: &renames,
          only_paths: Some(&to_add),
        },
        &dest,
      )?;
      image.add_data_archive(&ArchiveRequest {
        archive: &archive.path,
        archive_type,
        to: mapping.to(),
        owner: mapping.owner(),
        group: mapping.group(),
      })?;
    }

    debug!(
      mapping = %mapping.full_name(),
      removed = removed.len(),
      added = to_add.len(),
      "applied patch as filtered archive"
    );
    Ok(true)
  }
}
