//! Include/exclude path filtering.
//!
//! Paths are repository-relative, `/`-separated and never start with `/`. A
//! path matches when it lies under the base path and its remainder:
//! - matches at least one include pattern (or no includes are configured)
//! - matches no exclude pattern
//!
//! A pattern matches a path when the path equals the pattern, lies under it
//! as a directory prefix, or matches it (or `<pattern>/**/*`) as a glob.

use glob::{MatchOptions, Pattern};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PathMatcherError {
  #[error("invalid path pattern '{pattern}': {source}")]
  InvalidPattern {
    pattern: String,
    #[source]
    source: glob::PatternError,
  },
}

const MATCH_OPTIONS: MatchOptions = MatchOptions {
  case_sensitive: true,
  require_literal_separator: true,
  require_literal_leading_dot: false,
};

#[derive(Debug, Clone)]
struct CompiledPattern {
  raw: String,
  exact: Pattern,
  subtree: Pattern,
}

impl CompiledPattern {
  fn new(raw: &str) -> Result<Self, PathMatcherError> {
    let raw = normalize_path(raw);
    let compile = |p: &str| {
      Pattern::new(p).map_err(|source| PathMatcherError::InvalidPattern {
        pattern: raw.clone(),
        source,
      })
    };
    let exact = compile(&raw)?;
    let subtree = if raw.is_empty() {
      compile("**/*")?
    } else {
      compile(&format!("{}/**/*", raw))?
    };
    Ok(Self { raw, exact, subtree })
  }

  fn matches(&self, rel_path: &str) -> bool {
    if self.raw.is_empty() || is_subpath(&self.raw, rel_path) {
      return true;
    }
    self.exact.matches_with(rel_path, MATCH_OPTIONS) || self.subtree.matches_with(rel_path, MATCH_OPTIONS)
  }
}

/// Filters repository paths by a base path and include/exclude globs.
#[derive(Debug, Clone)]
pub struct PathMatcher {
  base_path: String,
  include: Vec<CompiledPattern>,
  exclude: Vec<CompiledPattern>,
}

impl PathMatcher {
  pub fn new<S: AsRef<str>>(base_path: &str, include: &[S], exclude: &[S]) -> Result<Self, PathMatcherError> {
    let compile = |patterns: &[S]| {
      patterns
        .iter()
        .map(|p| CompiledPattern::new(p.as_ref()))
        .collect::<Result<Vec<_>, _>>()
    };

    Ok(Self {
      base_path: normalize_path(base_path),
      include: compile(include)?,
      exclude: compile(exclude)?,
    })
  }

  /// A matcher that accepts everything under `base_path`.
  pub fn under(base_path: &str) -> Self {
    Self {
      base_path: normalize_path(base_path),
      include: Vec::new(),
      exclude: Vec::new(),
    }
  }

  pub fn base_path(&self) -> &str {
    &self.base_path
  }

  pub fn include_paths(&self) -> Vec<&str> {
    self.include.iter().map(|p| p.raw.as_str()).collect()
  }

  pub fn exclude_paths(&self) -> Vec<&str> {
    self.exclude.iter().map(|p| p.raw.as_str()).collect()
  }

  /// Path relative to the base path, or `None` when `path` lies outside it.
  pub fn relative_to_base<'a>(&self, path: &'a str) -> Option<&'a str> {
    if self.base_path.is_empty() {
      return Some(path);
    }
    if path == self.base_path {
      return Some("");
    }
    path
      .strip_prefix(self.base_path.as_str())
      .and_then(|rest| rest.strip_prefix('/'))
  }

  pub fn is_path_matched(&self, path: &str) -> bool {
    let path = normalize_path(path);
    let Some(rel_path) = self.relative_to_base(&path) else {
      return false;
    };

    let included = self.include.is_empty() || self.include.iter().any(|p| p.matches(rel_path));
    included && !self.exclude.iter().any(|p| !p.raw.is_empty() && p.matches(rel_path))
  }

  /// Whether `dir` may contain matched paths.
  pub fn should_go_through(&self, dir: &str) -> bool {
    let dir = normalize_path(dir);
    if dir.is_empty() || is_subpath(&dir, &self.base_path) {
      return true;
    }
    let Some(rel_dir) = self.relative_to_base(&dir) else {
      return false;
    };
    if self.exclude.iter().any(|p| !p.raw.is_empty() && p.matches(rel_dir)) {
      return false;
    }
    self.include.is_empty()
      || self
        .include
        .iter()
        .any(|p| p.matches(rel_dir) || is_subpath(rel_dir, &p.raw) || p.raw.contains(['*', '?', '[']))
  }
}

/// Clean a path into the repository-relative form: no leading or trailing
/// `/`, no `.` components, `.` itself becomes the empty string.
pub fn normalize_path(path: &str) -> String {
  let mut parts: Vec<&str> = Vec::new();
  for part in path.split('/') {
    match part {
      "" | "." => {}
      ".." => {
        parts.pop();
      }
      other => parts.push(other),
    }
  }
  parts.join("/")
}

/// Whether `path` equals `dir` or lies under it.
pub fn is_subpath(dir: &str, path: &str) -> bool {
  if dir.is_empty() {
    return true;
  }
  path == dir || (path.starts_with(dir) && path.as_bytes().get(dir.len()) == Some(&b'/'))
}

/// Whether `path` matches the glob `pattern` with literal separators.
pub fn glob_matches(pattern: &str, path: &str) -> Result<bool, PathMatcherError> {
  let compiled = Pattern::new(pattern).map_err(|source| PathMatcherError::InvalidPattern {
    pattern: pattern.to_string(),
    source,
  })?;
  Ok(compiled.matches_with(path, MATCH_OPTIONS))
}
