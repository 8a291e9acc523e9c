//! Digest-relevant dependencies of a Dockerfile target.
//!
//! `DockerStages` walks every stage of a parsed Dockerfile and collects, per
//! stage, the ordered list of resolved values that decide whether a cached
//! build of that stage can be reused:
//! - the `--add-host` entries and the resolved base image name
//! - the dependency lists of the base image's OnBuild triggers
//! - `ARG k=v` and `ENV k=v` for every resolved variable
//! - the instruction text of ADD and COPY, plus a build context checksum
//!   unless COPY reads from another stage or image
//! - the expanded text of every other instruction
//!
//! Lists of stages a stage builds on (`FROM <stage>`, `COPY --from`,
//! `RUN --mount=from=`) are appended afterwards, so changes ripple into
//! every stage that reads from them.
//!
//! Variable lookup inside a stage prefers stage ARGs over ENVs. ARG values
//! come from, in order: dependency projections, build args, the meta ARG
//! of the same name (for ARGs declared without a value), the declared
//! default.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, info};

use super::context::BuildContext;
use super::instruction::{Instruction, parse_instruction};
use super::onbuild::OnBuildFetcher;
use super::parser::Dockerfile;
use super::shlex::{Lexer, Variables};
use super::DockerfileError;
use crate::config::EngineConfig;
use crate::consts::SCRATCH_IMAGE;
use crate::util::hash::{Digest, sha256_args};

/// Where an instruction being resolved comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
  /// Written in the stage.
  Stage,
  /// Trigger declared by an ONBUILD of the stage; sees stage ENVs only and
  /// does not persist ARGs or ENVs.
  OnBuild,
  /// Trigger inherited from the base image; values are taken verbatim.
  BaseImageOnBuild,
}

#[derive(Debug, Default)]
struct StageScope {
  args: BTreeMap<String, String>,
  envs: BTreeMap<String, String>,
}

struct Inputs<'a> {
  meta_args: &'a BTreeMap<String, String>,
  dependency_args: &'a BTreeMap<String, String>,
  context: &'a dyn BuildContext,
}

/// Result of resolving a Dockerfile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedStages {
  /// Final dependency list of every stage.
  pub stages: Vec<Vec<String>>,
  pub target: usize,
  /// Target list with the image cache version appended when set.
  pub dependencies: Vec<String>,
  pub digest: Digest,
}

#[derive(Debug, Clone)]
pub struct DockerStages {
  dockerfile: Dockerfile,
  target: usize,
  build_args: BTreeMap<String, String>,
  add_host: Vec<String>,
  image_cache_version: Option<String>,
  /// OnBuild triggers per resolved base image name.
  onbuild: BTreeMap<String, Vec<String>>,
  lexer: Lexer,
}

impl DockerStages {
  pub fn new(dockerfile: Dockerfile, target: Option<&str>) -> Result<Self, DockerfileError> {
    let target = dockerfile.target_index(target)?;
    let lexer = Lexer::new(dockerfile.escape);
    Ok(Self {
      dockerfile,
      target,
      build_args: BTreeMap::new(),
      add_host: Vec::new(),
      image_cache_version: None,
      onbuild: BTreeMap::new(),
      lexer,
    })
  }

  pub fn with_build_args(mut self, build_args: BTreeMap<String, String>) -> Self {
    self.build_args = build_args;
    self
  }

  pub fn with_add_host(mut self, add_host: Vec<String>) -> Self {
    self.add_host = add_host;
    self
  }

  pub fn with_image_cache_version(mut self, version: Option<String>) -> Self {
    self.image_cache_version = version.filter(|v| !v.is_empty());
    self
  }

  /// Record the OnBuild triggers of a base image without fetching them.
  pub fn with_onbuild(mut self, base_image: &str, triggers: Vec<String>) -> Self {
    self.onbuild.insert(base_image.to_string(), triggers);
    self
  }

  pub fn dockerfile(&self) -> &Dockerfile {
    &self.dockerfile
  }

  pub fn target_index(&self) -> usize {
    self.target
  }

  pub fn onbuild_triggers(&self, base_image: &str) -> Option<&[String]> {
    self.onbuild.get(base_image).map(Vec::as_slice)
  }

  /// Resolve the meta ARGs in declaration order.
  pub fn resolve_meta_args(
    &self,
    dependency_args: &BTreeMap<String, String>,
  ) -> Result<BTreeMap<String, String>, DockerfileError> {
    let mut resolved = BTreeMap::new();

    for arg in &self.dockerfile.meta_args {
      for pair in &arg.args {
        let key = self.expand(&pair.key, &[&resolved])?;
        let value = match dependency_args.get(&key).or_else(|| self.build_args.get(&key)) {
          Some(value) => value.clone(),
          None => self.expand(pair.value.as_deref().unwrap_or_default(), &[&resolved])?,
        };
        resolved.insert(key, value);
      }
    }

    Ok(resolved)
  }

  /// Fetch the OnBuild triggers of every external base image not fetched yet.
  pub fn fetch_onbuild(
    &mut self,
    fetcher: &OnBuildFetcher<'_>,
    dependency_args: &BTreeMap<String, String>,
  ) -> Result<(), DockerfileError> {
    let meta_args = self.resolve_meta_args(dependency_args)?;

    for index in 0..self.dockerfile.stages.len() {
      if self.internal_base(index).is_some() {
        continue;
      }

      let base_name = self.resolve_base_name(index, &meta_args)?;
      if base_name == SCRATCH_IMAGE || self.onbuild.contains_key(&base_name) {
        continue;
      }

      let triggers = fetcher.fetch(&base_name)?;
      debug!(base_image = %base_name, triggers = triggers.len(), "fetched base image OnBuild triggers");
      self.onbuild.insert(base_name, triggers);
    }
    Ok(())
  }

  /// Compute the dependency lists and the target digest.
  pub fn resolve(
    &self,
    config: &EngineConfig,
    dependency_args: &BTreeMap<String, String>,
    context: &dyn BuildContext,
  ) -> Result<ResolvedStages, DockerfileError> {
    let meta_args = self.resolve_meta_args(dependency_args)?;
    let inputs = Inputs {
      meta_args: &meta_args,
      dependency_args,
      context,
    };

    let stages = &self.dockerfile.stages;
    let mut stage_deps: Vec<Vec<String>> = Vec::with_capacity(stages.len());
    let mut stage_onbuild_deps: Vec<Vec<String>> = Vec::with_capacity(stages.len());

    for (index, stage) in stages.iter().enumerate() {
      let mut scope = StageScope::default();
      let mut deps: Vec<String> = self.add_host.clone();
      let mut onbuild_deps = Vec::new();

      let base_name = self.resolve_base_name(index, &meta_args)?;
      deps.push(base_name.clone());

      if let Some(triggers) = self.onbuild.get(&base_name) {
        for trigger in triggers {
          let (_, trigger_deps) =
            self.onbuild_dependencies(&inputs, &mut scope, stage.line, trigger, Origin::BaseImageOnBuild)?;
          deps.extend(trigger_deps);
        }
      }

      for instruction in &stage.instructions {
        let (instruction_deps, instruction_onbuild) =
          self.instruction_dependencies(&inputs, &mut scope, stage.line, instruction, Origin::Stage)?;
        deps.extend(instruction_deps);
        onbuild_deps.extend(instruction_onbuild);
      }

      stage_deps.push(deps);
      stage_onbuild_deps.push(onbuild_deps);
    }

    for (index, stage) in stages.iter().enumerate() {
      if let Some(related) = self.internal_base(index) {
        let inherited = stage_deps[related].clone();
        stage_deps[index].extend(inherited);
        stage_deps[index].extend(stage_onbuild_deps[related].iter().cloned());
      }

      for instruction in &stage.instructions {
        let related: Vec<usize> = match instruction {
          Instruction::Copy(copy) => copy.from_stage.into_iter().collect(),
          Instruction::Run(run) => run.mounts.iter().filter_map(|m| m.from_stage).collect(),
          _ => Vec::new(),
        };
        for related in related {
          let inherited = stage_deps[related].clone();
          stage_deps[index].extend(inherited);
        }
      }
    }

    let mut dependencies = stage_deps[self.target].clone();
    if let Some(version) = &self.image_cache_version {
      dependencies.push(version.clone());
    }

    if config.debug_dockerfile_dependencies {
      info!(target = self.target, dependencies = ?dependencies, "dockerfile target dependencies");
    }

    let digest = sha256_args(&dependencies);
    Ok(ResolvedStages {
      stages: stage_deps,
      target: self.target,
      dependencies,
      digest,
    })
  }

  /// Index of the other stage the stage at `index` is built from.
  fn internal_base(&self, index: usize) -> Option<usize> {
    let stages = &self.dockerfile.stages;
    let base = stages[index].base_name.to_lowercase();
    stages
      .iter()
      .enumerate()
      .find(|(i, s)| *i != index && s.name.as_deref() == Some(base.as_str()))
      .map(|(i, _)| i)
  }

  fn resolve_base_name(&self, index: usize, meta_args: &BTreeMap<String, String>) -> Result<String, DockerfileError> {
    let expression = &self.dockerfile.stages[index].base_name;
    let resolved = self.expand(expression, &[meta_args])?;
    if resolved.is_empty() {
      return Err(DockerfileError::InvalidBaseImage {
        stage: index,
        expression: expression.clone(),
      });
    }
    Ok(resolved)
  }

  fn expand(&self, word: &str, layers: &[&BTreeMap<String, String>]) -> Result<String, DockerfileError> {
    self
      .lexer
      .process_word(word, &Variables::new(layers))
      .map_err(|source| DockerfileError::Shlex {
        word: word.to_string(),
        source,
      })
  }

  fn resolve_value(&self, scope: &StageScope, origin: Origin, value: &str) -> Result<String, DockerfileError> {
    match origin {
      Origin::BaseImageOnBuild => Ok(value.to_string()),
      Origin::OnBuild => self.expand(value, &[&scope.envs]),
      Origin::Stage => self.expand(value, &[&scope.args, &scope.envs]),
    }
  }

  fn resolve_stage_arg(
    &self,
    inputs: &Inputs<'_>,
    scope: &StageScope,
    key: &str,
    value: Option<&str>,
  ) -> Result<(String, String), DockerfileError> {
    let key = self.expand(key, &[&scope.args, &scope.envs])?;
    let value = value.unwrap_or_default();

    let resolved = if let Some(v) = inputs.dependency_args.get(&key) {
      v.clone()
    } else if let Some(v) = self.build_args.get(&key) {
      v.clone()
    } else if value.is_empty() {
      inputs.meta_args.get(&key).cloned().unwrap_or_default()
    } else {
      self.expand(value, &[&scope.args, &scope.envs])?
    };
    Ok((key, resolved))
  }

  /// Dependencies and OnBuild dependencies contributed by one instruction.
  fn instruction_dependencies(
    &self,
    inputs: &Inputs<'_>,
    scope: &mut StageScope,
    line: usize,
    instruction: &Instruction,
    origin: Origin,
  ) -> Result<(Vec<String>, Vec<String>), DockerfileError> {
    let mut deps = Vec::new();
    let mut onbuild_deps = Vec::new();

    match instruction {
      Instruction::Arg(arg) => {
        for pair in &arg.args {
          let (key, value) = if origin == Origin::Stage {
            let (key, value) = self.resolve_stage_arg(inputs, scope, &pair.key, pair.value.as_deref())?;
            scope.args.insert(key.clone(), value.clone());
            (key, value)
          } else {
            (
              self.resolve_value(scope, origin, &pair.key)?,
              self.resolve_value(scope, origin, pair.value.as_deref().unwrap_or_default())?,
            )
          };
          deps.push(format!("ARG {}={}", key, value));
        }
      }
      Instruction::Env(env) => {
        for pair in &env.vars {
          let key = self.resolve_value(scope, origin, &pair.key)?;
          let value = self.resolve_value(scope, origin, &pair.value)?;
          if origin == Origin::Stage {
            scope.envs.insert(key.clone(), value.clone());
          }
          deps.push(format!("ENV {}={}", key, value));
        }
      }
      Instruction::Add(add) => {
        deps.push(add.original.clone());
        let sources = self.resolve_sources(scope, origin, &add.sources)?;
        deps.push(inputs.context.files_checksum(&sources)?.0);
      }
      Instruction::Copy(copy) => {
        deps.push(copy.original.clone());
        if copy.from.is_none() {
          let sources = self.resolve_sources(scope, origin, &copy.sources)?;
          deps.push(inputs.context.files_checksum(&sources)?.0);
        }
      }
      Instruction::OnBuild(onbuild) => {
        let (expression_deps, trigger_deps) =
          self.onbuild_dependencies(inputs, scope, line, &onbuild.expression, Origin::OnBuild)?;
        deps.extend(expression_deps);
        onbuild_deps.extend(trigger_deps);
      }
      Instruction::Run(_) | Instruction::Generic(_) => {
        deps.push(self.resolve_value(scope, origin, instruction.original())?);
      }
    }

    Ok((deps, onbuild_deps))
  }

  /// Returns the trigger expression and the dependencies of the triggered
  /// instruction.
  fn onbuild_dependencies(
    &self,
    inputs: &Inputs<'_>,
    scope: &mut StageScope,
    line: usize,
    expression: &str,
    origin: Origin,
  ) -> Result<(Vec<String>, Vec<String>), DockerfileError> {
    let instruction = parse_instruction(line, expression, self.dockerfile.escape)?;
    let (trigger_deps, _) = self.instruction_dependencies(inputs, scope, line, &instruction, origin)?;
    Ok((vec![expression.to_string()], trigger_deps))
  }

  fn resolve_sources(&self, scope: &StageScope, origin: Origin, sources: &[String]) -> Result<Vec<String>, DockerfileError> {
    sources
      .iter()
      .map(|source| self.resolve_value(scope, origin, source))
      .collect()
  }
}
