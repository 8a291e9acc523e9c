//! Cross-image dependencies.
//!
//! A dependency names another image whose finalized build output feeds a
//! stage: its name, repository, tag, ID or content digest is projected into
//! an environment variable (builder stages) or a build argument (Dockerfile
//! stages).
//!
//! The identity of the target image comes from the orchestrator through
//! [`IdentityResolver`]. Asking for the identity of an image that has not
//! finished building is an error, never an empty value.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::DependencyConfig;
use crate::util::hash::sha256_args;

/// Which part of the target image identity a projection carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ProjectionType {
  ImageName,
  ImageRepo,
  ImageTag,
  #[serde(rename = "ImageID")]
  ImageId,
  ImageDigest,
}

impl ProjectionType {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::ImageName => "ImageName",
      Self::ImageRepo => "ImageRepo",
      Self::ImageTag => "ImageTag",
      Self::ImageId => "ImageID",
      Self::ImageDigest => "ImageDigest",
    }
  }
}

impl std::fmt::Display for ProjectionType {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Error)]
pub enum DependencyError {
  #[error("dependency image '{image}' is not built yet")]
  NotReady { image: String },

  #[error("invalid dependency: {0}")]
  Invalid(String),
}

/// One projected value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Projection {
  pub type_: ProjectionType,
  /// Environment variable or build argument receiving the value.
  pub target_env: String,
}

impl Projection {
  pub fn new(type_: ProjectionType, target_env: &str) -> Self {
    Self {
      type_,
      target_env: target_env.to_string(),
    }
  }

  /// Stable identity of the projection, independent of the projected value.
  pub fn id(&self) -> String {
    sha256_args(["Type", self.type_.as_str(), "TargetEnv", &self.target_env]).0
  }
}

/// A reference to another image's build output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
  pub image: String,
  /// Build stage of the target image; the last stage when unset.
  pub stage: Option<String>,
  pub projections: Vec<Projection>,
}

impl Dependency {
  pub fn new(image: &str) -> Self {
    Self {
      image: image.to_string(),
      stage: None,
      projections: Vec::new(),
    }
  }

  pub fn project(mut self, type_: ProjectionType, target_env: &str) -> Self {
    self.projections.push(Projection::new(type_, target_env));
    self
  }

  pub fn from_config(config: &DependencyConfig) -> Result<Self, DependencyError> {
    if config.image.is_empty() {
      return Err(DependencyError::Invalid("dependency image name is empty".to_string()));
    }
    let mut dependency = Self::new(&config.image);
    for import in &config.imports {
      if import.target_env.is_empty() {
        return Err(DependencyError::Invalid(format!(
          "projection {} of dependency '{}' has no target",
          import.type_, config.image
        )));
      }
      dependency.projections.push(Projection::new(import.type_, &import.target_env));
    }
    Ok(dependency)
  }
}

/// Finalized identity of a built image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ImageIdentity {
  /// Full reference, `repo:tag`.
  pub name: String,
  pub id: String,
  /// Content digest, `sha256:...`.
  pub digest: String,
  /// Id of the stage that finalized the image.
  pub stage_id: String,
}

impl ImageIdentity {
  pub fn value(&self, type_: ProjectionType) -> String {
    match type_ {
      ProjectionType::ImageName => self.name.clone(),
      ProjectionType::ImageRepo => parse_repository_and_tag(&self.name).0,
      ProjectionType::ImageTag => parse_repository_and_tag(&self.name).1,
      ProjectionType::ImageId => self.id.clone(),
      ProjectionType::ImageDigest => self.digest.clone(),
    }
  }
}

/// Source of finalized image identities.
pub trait IdentityResolver {
  /// Identity of `image` (optionally a specific `stage` of it), `None` while
  /// it is not built.
  fn identity(&self, image: &str, stage: Option<&str>) -> Option<ImageIdentity>;
}

/// Identities known up front, keyed by image name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityMap(pub BTreeMap<String, ImageIdentity>);

impl IdentityMap {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with(mut self, image: &str, identity: ImageIdentity) -> Self {
    self.0.insert(image.to_string(), identity);
    self
  }
}

impl IdentityResolver for IdentityMap {
  fn identity(&self, image: &str, _stage: Option<&str>) -> Option<ImageIdentity> {
    self.0.get(image).cloned()
  }
}

/// Split an image reference into repository and tag.
///
/// A trailing `@digest` is dropped first. The tag follows the last `:`,
/// unless that `:` belongs to a registry port (the remainder contains `/`).
/// References without a tag get `latest`.
pub fn parse_repository_and_tag(reference: &str) -> (String, String) {
  let reference = reference.split('@').next().unwrap_or(reference);
  match reference.rfind(':') {
    Some(i) if !reference[i + 1..].contains('/') => (reference[..i].to_string(), reference[i + 1..].to_string()),
    _ => (reference.to_string(), "latest".to_string()),
  }
}

fn sorted(dependencies: &[Dependency]) -> Vec<&Dependency> {
  let mut sorted: Vec<&Dependency> = dependencies.iter().collect();
  sorted.sort_by(|a, b| a.image.cmp(&b.image).then_with(|| a.stage.cmp(&b.stage)));
  sorted
}

fn sorted_projections(dependency: &Dependency) -> Vec<&Projection> {
  let mut projections: Vec<&Projection> = dependency.projections.iter().collect();
  projections.sort();
  projections
}

fn resolve(resolver: &dyn IdentityResolver, dependency: &Dependency) -> Result<ImageIdentity, DependencyError> {
  resolver
    .identity(&dependency.image, dependency.stage.as_deref())
    .ok_or_else(|| DependencyError::NotReady {
      image: dependency.image.clone(),
    })
}

/// Project `dependencies` into target variable values.
///
/// Dependencies are folded sorted by image name and projections by type, so
/// the result does not depend on declaration order.
pub fn project(
  dependencies: &[Dependency],
  resolver: &dyn IdentityResolver,
) -> Result<BTreeMap<String, String>, DependencyError> {
  let mut values = BTreeMap::new();
  for dependency in sorted(dependencies) {
    if dependency.projections.is_empty() {
      continue;
    }
    let identity = resolve(resolver, dependency)?;
    for projection in sorted_projections(dependency) {
      values.insert(projection.target_env.clone(), identity.value(projection.type_));
    }
  }
  Ok(values)
}

/// Digest arguments contributed by `dependencies`.
///
/// Only projected values take part: a target change that no projection
/// observes leaves the digest alone.
pub fn digest_args(dependencies: &[Dependency], resolver: &dyn IdentityResolver) -> Result<Vec<String>, DependencyError> {
  let mut args = Vec::new();
  for dependency in sorted(dependencies) {
    let identity = resolve(resolver, dependency)?;
    args.push("Dependency".to_string());
    args.push(dependency.image.clone());
    for projection in sorted_projections(dependency) {
      args.push("DependencyImport".to_string());
      args.push(projection.id());
      args.push(identity.value(projection.type_));
    }
  }
  Ok(args)
}

/// Stage ids of the resolved targets, for dependency labels.
pub fn stage_ids(dependencies: &[Dependency], resolver: &dyn IdentityResolver) -> Result<Vec<String>, DependencyError> {
  sorted(dependencies)
    .into_iter()
    .map(|d| resolve(resolver, d).map(|identity| identity.stage_id))
    .collect()
}
