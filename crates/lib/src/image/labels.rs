//! Typed codecs for labels written into built images.
//!
//! Label values are decoded into typed structures as soon as they are read
//! and encoded only when written back.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::{MountConfig, MountSource};
use crate::consts::{
  DEPENDENCY_LABEL_PREFIX, IMPORT_LABEL_PREFIX, MOUNT_BUILD_DIR_LABEL, MOUNT_CUSTOM_DIR_LABEL_PREFIX,
  MOUNT_TMP_DIR_LABEL,
};
use crate::util::shell::slugify;

const MOUNT_POINT_SEPARATOR: char = ';';
const CUSTOM_DIR_SLASH_ESCAPE: &str = "--";

/// Mount points grouped by source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountPoints(pub BTreeMap<MountSource, BTreeSet<String>>);

impl MountPoints {
  pub fn from_configs(mounts: &[MountConfig]) -> Self {
    let mut points = Self::default();
    for mount in mounts {
      points.add(mount.from.clone(), &mount.to);
    }
    points
  }

  /// Decode mount labels. Unrelated labels are ignored.
  pub fn from_labels(labels: &BTreeMap<String, String>) -> Self {
    let mut points = Self::default();
    for (key, value) in labels {
      let source = if key == MOUNT_TMP_DIR_LABEL {
        MountSource::TmpDir
      } else if key == MOUNT_BUILD_DIR_LABEL {
        MountSource::BuildDir
      } else if let Some(escaped) = key.strip_prefix(MOUNT_CUSTOM_DIR_LABEL_PREFIX) {
        MountSource::Custom(unescape_custom_dir(escaped))
      } else {
        continue;
      };

      for point in value.split(MOUNT_POINT_SEPARATOR).filter(|p| !p.is_empty()) {
        points.add(source.clone(), point);
      }
    }
    points
  }

  pub fn add(&mut self, source: MountSource, point: &str) {
    self.0.entry(source).or_default().insert(point.to_string());
  }

  pub fn merge(&mut self, other: &MountPoints) {
    for (source, points) in &other.0 {
      self.0.entry(source.clone()).or_default().extend(points.iter().cloned());
    }
  }

  pub fn is_empty(&self) -> bool {
    self.0.values().all(BTreeSet::is_empty)
  }

  /// Every mount point, sorted.
  pub fn volumes(&self) -> Vec<String> {
    let all: BTreeSet<&String> = self.0.values().flatten().collect();
    all.into_iter().cloned().collect()
  }

  pub fn to_labels(&self) -> BTreeMap<String, String> {
    self
      .0
      .iter()
      .filter(|(_, points)| !points.is_empty())
      .map(|(source, points)| {
        let value = points.iter().cloned().collect::<Vec<_>>().join(";");
        (mount_label_key(source), value)
      })
      .collect()
  }
}

pub fn mount_label_key(source: &MountSource) -> String {
  match source {
    MountSource::TmpDir => MOUNT_TMP_DIR_LABEL.to_string(),
    MountSource::BuildDir => MOUNT_BUILD_DIR_LABEL.to_string(),
    MountSource::Custom(from) => format!("{}{}", MOUNT_CUSTOM_DIR_LABEL_PREFIX, escape_custom_dir(from)),
  }
}

fn escape_custom_dir(path: &str) -> String {
  path.replace('/', CUSTOM_DIR_SLASH_ESCAPE)
}

fn unescape_custom_dir(escaped: &str) -> String {
  escaped.replace(CUSTOM_DIR_SLASH_ESCAPE, "/")
}

/// Label recording the checksum of an import's source content.
pub fn import_label_key(import_id: &str) -> String {
  format!("{}{}", IMPORT_LABEL_PREFIX, slugify(import_id))
}

/// Label recording which image a dependency stage resolved against.
pub fn dependency_label_key(stage_id: &str) -> String {
  format!("{}{}", DEPENDENCY_LABEL_PREFIX, stage_id)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn custom_mount_key_escapes_slashes() {
    let key = mount_label_key(&MountSource::Custom("/srv/cache".to_string()));
    assert_eq!(key, "werf-mount-custom-dir---srv--cache");
  }

  #[test]
  fn labels_decode_into_typed_points() {
    let mut labels = BTreeMap::new();
    labels.insert(MOUNT_TMP_DIR_LABEL.to_string(), "/tmp/a;/tmp/b".to_string());
    labels.insert("werf-mount-custom-dir---srv--cache".to_string(), "/cache".to_string());
    labels.insert("unrelated".to_string(), "x".to_string());

    let points = MountPoints::from_labels(&labels);
    assert_eq!(points.0.len(), 2);
    assert!(points.0[&MountSource::TmpDir].contains("/tmp/b"));
    assert!(points.0[&MountSource::Custom("/srv/cache".to_string())].contains("/cache"));
  }

  #[test]
  fn encode_decode_is_stable() {
    let mut points = MountPoints::default();
    points.add(MountSource::BuildDir, "/build");
    points.add(MountSource::TmpDir, "/b");
    points.add(MountSource::TmpDir, "/a");
    points.add(MountSource::Custom("/host/dir".to_string()), "/in");

    let labels = points.to_labels();
    assert_eq!(labels[MOUNT_TMP_DIR_LABEL], "/a;/b");
    assert_eq!(MountPoints::from_labels(&labels), points);
  }

  #[test]
  fn merge_unions_points() {
    let mut previous = MountPoints::default();
    previous.add(MountSource::TmpDir, "/a");
    let mut configured = MountPoints::default();
    configured.add(MountSource::TmpDir, "/b");
    configured.add(MountSource::BuildDir, "/c");

    previous.merge(&configured);
    assert_eq!(previous.volumes(), vec!["/a", "/b", "/c"]);
  }

  #[test]
  fn import_label_is_slugified() {
    assert_eq!(import_label_key("assets"), "werf-import-assets");
    assert!(import_label_key("Assets/Build").starts_with("werf-import-assets-build-"));
  }
}
