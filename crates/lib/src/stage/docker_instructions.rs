//! Image config instructions applied last: volumes, ports, env, labels,
//! command, entrypoint, workdir, user and healthcheck.

use super::{Stage, StageContext, StageError, StageName};
use crate::config::DockerInstructionsConfig;
use crate::image::{BuiltImage, ConfigChange, WorkingImage};
use crate::util::hash::sha256_args;

#[derive(Debug, Clone)]
pub struct DockerInstructionsStage {
  instructions: DockerInstructionsConfig,
}

impl DockerInstructionsStage {
  pub fn new(instructions: DockerInstructionsConfig) -> Self {
    Self { instructions }
  }

  fn config_changes(&self) -> Vec<ConfigChange> {
    let i = &self.instructions;
    let mut changes = Vec::new();
    if !i.expose.is_empty() {
      changes.push(ConfigChange::Expose(i.expose.clone()));
    }
    if let Some(cmd) = &i.cmd {
      changes.push(ConfigChange::Cmd(cmd.clone()));
    }
    if let Some(entrypoint) = &i.entrypoint {
      changes.push(ConfigChange::Entrypoint(entrypoint.clone()));
    }
    if let Some(workdir) = &i.workdir {
      changes.push(ConfigChange::Workdir(workdir.clone()));
    }
    if let Some(user) = &i.user {
      changes.push(ConfigChange::User(user.clone()));
    }
    if let Some(health_check) = &i.health_check {
      changes.push(ConfigChange::HealthCheck(health_check.clone()));
    }
    changes
  }
}

impl Stage for DockerInstructionsStage {
  fn name(&self) -> StageName {
    StageName::DockerInstructions
  }

  fn dependencies(&self, _ctx: &StageContext<'_>, _prev_built: Option<&BuiltImage>) -> Result<String, StageError> {
    let i = &self.instructions;
    let mut args: Vec<String> = Vec::new();
    args.extend(i.volume.iter().cloned());
    args.extend(i.expose.iter().cloned());
    args.extend(i.env.iter().map(|(k, v)| format!("{}={}", k, v)));
    args.extend(i.label.iter().map(|(k, v)| format!("{}={}", k, v)));
    for value in [&i.cmd, &i.entrypoint, &i.workdir, &i.user, &i.health_check] {
      args.push(value.clone().unwrap_or_default());
    }
    Ok(sha256_args(&args).0)
  }

  fn prepare_image(
    &self,
    _ctx: &StageContext<'_>,
    _prev_built: Option<&BuiltImage>,
    image: &mut dyn WorkingImage,
  ) -> Result<(), StageError> {
    let i = &self.instructions;
    if !i.volume.is_empty() {
      image.add_volumes(&i.volume)?;
    }
    if !i.env.is_empty() {
      image.add_envs(&i.env)?;
    }
    if !i.label.is_empty() {
      image.add_labels(&i.label)?;
    }
    for change in self.config_changes() {
      image.apply_config(&change)?;
    }
    Ok(())
  }
}
