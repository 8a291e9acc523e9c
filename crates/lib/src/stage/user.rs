//! User stages: BeforeInstall, Install, BeforeSetup and Setup.
//!
//! Install, BeforeSetup and Setup also carry the image's git mappings: they
//! patch the mappings up to date before running their commands, and the
//! stage dependency globs configured for them fold into their digest.

use std::sync::Arc;

use tracing::debug;

use super::builder::ShellBuilder;
use super::git::GitMappings;
use super::{Stage, StageContext, StageError, StageName};
use crate::image::{BuiltImage, WorkingImage};
use crate::util::hash::sha256_args;

#[derive(Debug)]
pub struct UserStage {
  name: StageName,
  builder: Arc<ShellBuilder>,
  mappings: Option<Arc<GitMappings>>,
}

impl UserStage {
  pub fn new(name: StageName, builder: Arc<ShellBuilder>, mappings: Option<Arc<GitMappings>>) -> Self {
    Self {
      name,
      builder,
      mappings: mappings.filter(|m| !m.is_empty()),
    }
  }
}

impl Stage for UserStage {
  fn name(&self) -> StageName {
    self.name
  }

  fn dependencies(&self, _ctx: &StageContext<'_>, _prev_built: Option<&BuiltImage>) -> Result<String, StageError> {
    let checksum = self.builder.checksum(self.name);
    match &self.mappings {
      Some(mappings) => {
        let stage_dependencies = mappings.stage_dependencies_checksum(self.name)?;
        Ok(sha256_args([checksum, stage_dependencies]).0)
      }
      None => Ok(checksum),
    }
  }

  fn is_empty(&self, _ctx: &StageContext<'_>, _prev_built: Option<&BuiltImage>) -> Result<bool, StageError> {
    Ok(self.builder.is_empty(self.name))
  }

  fn should_be_reset(&self, built: &BuiltImage) -> Result<bool, StageError> {
    match &self.mappings {
      Some(mappings) => mappings.should_be_reset(built),
      None => Ok(false),
    }
  }

  fn prepare_image(
    &self,
    ctx: &StageContext<'_>,
    prev_built: Option<&BuiltImage>,
    image: &mut dyn WorkingImage,
  ) -> Result<(), StageError> {
    if let Some(mappings) = &self.mappings {
      mappings.apply(ctx, prev_built, image)?;
    }

    let commands = self.builder.commands(self.name);
    debug!(stage = %self.name, commands = commands.len(), "running user stage commands");
    if !commands.is_empty() {
      image.run_commands(commands)?;
    }
    Ok(())
  }
}
