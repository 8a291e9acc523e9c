//! OnBuild trigger lookup for base images.
//!
//! Triggers are read from the local image first. When the image is not
//! present locally the registry's image config is queried. A registry that
//! serves a manifest type the client cannot read forces a pull followed by
//! a second local inspection; every other registry failure is returned.

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors raised by a registry client.
#[derive(Debug, Error)]
pub enum RegistryError {
  #[error("unsupported MediaType: {0}")]
  UnsupportedMediaType(String),

  #[error("{0}")]
  Other(String),
}

impl RegistryError {
  pub fn is_unsupported_media_type(&self) -> bool {
    matches!(self, Self::UnsupportedMediaType(_)) || self.to_string().contains("unsupported MediaType")
  }
}

#[derive(Debug, Error)]
pub enum OnBuildError {
  #[error("failed to inspect image '{reference}': {message}")]
  Inspect { reference: String, message: String },

  #[error("failed to pull image '{reference}': {message}")]
  Pull { reference: String, message: String },

  #[error("get repo image {reference} config file failed: {source}")]
  Registry {
    reference: String,
    #[source]
    source: RegistryError,
  },

  #[error("image '{0}' is not available locally after pull")]
  MissingAfterPull(String),
}

/// Local image inspection (container runtime).
pub trait ImageInspector {
  /// OnBuild triggers of a local image, `None` when it is not present.
  fn inspect_onbuild(&self, reference: &str) -> Result<Option<Vec<String>>, OnBuildError>;

  fn pull(&self, reference: &str) -> Result<(), OnBuildError>;
}

/// Registry access to image configs.
pub trait RegistryClient {
  fn config_onbuild(&self, reference: &str) -> Result<Vec<String>, RegistryError>;
}

/// Fetches OnBuild triggers through the local → registry → pull fallback.
pub struct OnBuildFetcher<'a> {
  inspector: &'a dyn ImageInspector,
  registry: &'a dyn RegistryClient,
}

impl<'a> OnBuildFetcher<'a> {
  pub fn new(inspector: &'a dyn ImageInspector, registry: &'a dyn RegistryClient) -> Self {
    Self { inspector, registry }
  }

  pub fn fetch(&self, reference: &str) -> Result<Vec<String>, OnBuildError> {
    if let Some(triggers) = self.inspector.inspect_onbuild(reference)? {
      debug!(reference, triggers = triggers.len(), "found base image locally");
      return Ok(triggers);
    }

    match self.registry.config_onbuild(reference) {
      Ok(triggers) => {
        debug!(reference, triggers = triggers.len(), "read base image config from registry");
        Ok(triggers)
      }
      Err(e) if e.is_unsupported_media_type() => {
        warn!(
          reference,
          error = %e,
          "could not get base image manifest from local docker and from docker registry"
        );
        warn!(reference, "pulling the base image is necessary for calculating the digest correctly");
        info!(reference, "pulling base image");
        self.inspector.pull(reference)?;
        self
          .inspector
          .inspect_onbuild(reference)?
          .ok_or_else(|| OnBuildError::MissingAfterPull(reference.to_string()))
      }
      Err(source) => Err(OnBuildError::Registry {
        reference: reference.to_string(),
        source,
      }),
    }
  }
}

/// Triggers known ahead of time, keyed by image reference.
///
/// Serves as the local inspector when no container runtime is available.
/// Pulling is a no-op.
#[derive(Debug, Clone, Default)]
pub struct StaticOnBuild {
  images: BTreeMap<String, Vec<String>>,
}

impl StaticOnBuild {
  pub fn new(images: BTreeMap<String, Vec<String>>) -> Self {
    Self { images }
  }

  pub fn with(mut self, reference: &str, triggers: &[&str]) -> Self {
    self
      .images
      .insert(reference.to_string(), triggers.iter().map(|t| t.to_string()).collect());
    self
  }
}

impl ImageInspector for StaticOnBuild {
  fn inspect_onbuild(&self, reference: &str) -> Result<Option<Vec<String>>, OnBuildError> {
    Ok(self.images.get(reference).cloned())
  }

  fn pull(&self, _reference: &str) -> Result<(), OnBuildError> {
    Ok(())
  }
}

/// A registry that is never reached: every image has no triggers.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineRegistry;

impl RegistryClient for OfflineRegistry {
  fn config_onbuild(&self, reference: &str) -> Result<Vec<String>, RegistryError> {
    debug!(reference, "registry is offline, assuming no OnBuild triggers");
    Ok(Vec::new())
  }
}
