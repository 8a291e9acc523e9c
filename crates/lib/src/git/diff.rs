//! Structured patches between two commits.
//!
//! A `Patch` carries both the unified diff text (what gets applied to text
//! files and what the patch size heuristic measures) and the structured path
//! lists the applier needs when the diff cannot be applied textually:
//! - `paths`: every changed repository path
//! - `paths_to_remove`: paths deleted at the target commit
//! - `binary_paths`: changed paths whose content is binary, a symlink or a
//!   submodule pointer
//!
//! `apply_unified_diff` applies the text form to a directory. It accepts the
//! subset of the unified format `create_patch` writes.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use thiserror::Error;
use tracing::debug;

use super::{EntryMode, GitError, GitRepo, TreeEntry, is_binary, list_entries, project_path};
use crate::path_matcher::PathMatcher;

const DEFAULT_CONTEXT_LINES: usize = 3;
const NO_NEWLINE_MARKER: &str = "\\ No newline at end of file";
const BINARY_LINE_WIDTH: usize = 64;

/// What goes into a patch.
#[derive(Debug, Clone)]
pub struct PatchOptions<'a> {
  pub from_commit: &'a str,
  pub to_commit: &'a str,
  pub matcher: &'a PathMatcher,
  /// Patch paths are relative to this repository directory.
  pub scope: &'a str,
  /// Repository path to patch path overrides.
  pub renames: &'a BTreeMap<String, String>,
  /// Context lines around each change; `None` includes whole files.
  pub context_lines: Option<usize>,
  /// Embed binary content instead of a "Binary files differ" line.
  pub with_binary: bool,
}

impl<'a> PatchOptions<'a> {
  pub fn new(
    from_commit: &'a str,
    to_commit: &'a str,
    matcher: &'a PathMatcher,
    scope: &'a str,
    renames: &'a BTreeMap<String, String>,
  ) -> Self {
    Self {
      from_commit,
      to_commit,
      matcher,
      scope,
      renames,
      context_lines: Some(DEFAULT_CONTEXT_LINES),
      with_binary: false,
    }
  }
}

/// Difference between two commits of a filtered tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Patch {
  pub from_commit: String,
  pub to_commit: String,
  pub paths: Vec<String>,
  pub paths_to_remove: Vec<String>,
  pub binary_paths: Vec<String>,
  /// Unified diff, paths relative to the patch scope.
  pub text: String,
}

impl Patch {
  pub fn is_empty(&self) -> bool {
    self.paths.is_empty()
  }

  pub fn has_binary(&self) -> bool {
    !self.binary_paths.is_empty()
  }

  /// Size of the diff text in bytes.
  pub fn size(&self) -> u64 {
    self.text.len() as u64
  }

  /// Changed paths that still exist at the target commit.
  pub fn paths_to_add(&self) -> BTreeSet<String> {
    let removed: BTreeSet<&String> = self.paths_to_remove.iter().collect();
    self.paths.iter().filter(|p| !removed.contains(p)).cloned().collect()
  }
}

/// Compute the filtered difference between `options.from_commit` and
/// `options.to_commit`.
pub fn create_patch(repo: &dyn GitRepo, options: &PatchOptions<'_>) -> Result<Patch, GitError> {
  let mut patch = Patch {
    from_commit: options.from_commit.to_string(),
    to_commit: options.to_commit.to_string(),
    ..Default::default()
  };

  if options.from_commit == options.to_commit {
    return Ok(patch);
  }

  let index = |entries: Vec<TreeEntry>| -> BTreeMap<String, TreeEntry> {
    entries.into_iter().map(|e| (e.path.clone(), e)).collect()
  };
  let from = index(list_entries(repo, options.from_commit, options.matcher)?);
  let to = index(list_entries(repo, options.to_commit, options.matcher)?);

  let all_paths: BTreeSet<&String> = from.keys().chain(to.keys()).collect();

  for path in all_paths {
    let old = from.get(path);
    let new = to.get(path);
    if matches!((old, new), (Some(a), Some(b)) if a.oid == b.oid && a.mode == b.mode) {
      continue;
    }

    let Some(display) = project_path(options.scope, options.renames, path) else {
      continue;
    };

    let old_content = read_content(repo, old)?;
    let new_content = read_content(repo, new)?;

    let binary = [old, new].iter().flatten().any(|e| !e.mode.is_blob())
      || old_content.as_deref().is_some_and(is_binary)
      || new_content.as_deref().is_some_and(is_binary);

    patch.paths.push(path.clone());
    if new.is_none() {
      patch.paths_to_remove.push(path.clone());
    }

    write_file_header(&mut patch.text, &display, old, new);

    if binary {
      patch.binary_paths.push(path.clone());
      write_binary_section(&mut patch.text, &display, old, new, new_content.as_deref(), options.with_binary);
      continue;
    }

    let old_text = text_of(old_content.as_deref());
    let new_text = text_of(new_content.as_deref());
    if old_text == new_text {
      continue;
    }

    let old_name = if old.is_some() { format!("a/{}", display) } else { "/dev/null".to_string() };
    let new_name = if new.is_some() { format!("b/{}", display) } else { "/dev/null".to_string() };
    patch.text.push_str(&format!("--- {}\n+++ {}\n", old_name, new_name));
    write_hunks(&mut patch.text, &old_text, &new_text, options.context_lines);
  }

  debug!(
    from = options.from_commit,
    to = options.to_commit,
    paths = patch.paths.len(),
    binary = patch.binary_paths.len(),
    "created patch"
  );

  Ok(patch)
}

fn read_content(repo: &dyn GitRepo, entry: Option<&TreeEntry>) -> Result<Option<Vec<u8>>, GitError> {
  match entry {
    Some(e) if e.mode != EntryMode::Commit => Ok(Some(repo.read_blob(&e.oid)?)),
    _ => Ok(None),
  }
}

fn text_of(content: Option<&[u8]>) -> String {
  content
    .map(|c| String::from_utf8_lossy(c).into_owned())
    .unwrap_or_default()
}

fn write_file_header(out: &mut String, path: &str, old: Option<&TreeEntry>, new: Option<&TreeEntry>) {
  out.push_str(&format!("diff --git a/{} b/{}\n", path, path));
  match (old, new) {
    (None, Some(b)) => out.push_str(&format!("new file mode {}\n", b.mode.as_octal())),
    (Some(a), None) => out.push_str(&format!("deleted file mode {}\n", a.mode.as_octal())),
    (Some(a), Some(b)) if a.mode != b.mode => {
      out.push_str(&format!("old mode {}\nnew mode {}\n", a.mode.as_octal(), b.mode.as_octal()));
    }
    _ => {}
  }
}

fn write_binary_section(
  out: &mut String,
  path: &str,
  old: Option<&TreeEntry>,
  new: Option<&TreeEntry>,
  new_content: Option<&[u8]>,
  with_binary: bool,
) {
  if with_binary {
    let data = new_content.unwrap_or_default();
    out.push_str(&format!("GIT binary patch\nliteral {}\n", data.len()));
    let encoded = hex::encode(data);
    for chunk in encoded.as_bytes().chunks(BINARY_LINE_WIDTH) {
      out.push_str(&String::from_utf8_lossy(chunk));
      out.push('\n');
    }
    out.push('\n');
    return;
  }

  let old_name = if old.is_some() { format!("a/{}", path) } else { "/dev/null".to_string() };
  let new_name = if new.is_some() { format!("b/{}", path) } else { "/dev/null".to_string() };
  out.push_str(&format!("Binary files {} and {} differ\n", old_name, new_name));
}

/// Split text into lines that keep their terminating `\n`.
fn split_lines(text: &str) -> Vec<&str> {
  text.split_inclusive('\n').collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
  Equal(usize, usize),
  Delete(usize),
  Insert(usize),
}

/// Edit distance past which a range is replaced wholesale instead of being
/// searched further.
const MAX_EDIT_COST: isize = 4096;

/// Shortest edit script between `a` and `b`.
///
/// Myers' algorithm in linear space: each range is split where the forward
/// and backward searches meet, and both halves are diffed recursively.
/// Ranges further apart than `MAX_EDIT_COST` become a plain delete + insert,
/// so unrelated rewrites cost O((N+M) * MAX_EDIT_COST) time at most.
fn myers<T: PartialEq>(a: &[T], b: &[T]) -> Vec<Op> {
  let mut ops = Vec::with_capacity(a.len().max(b.len()));
  diff_range(a, b, 0, 0, &mut ops);
  ops
}

fn diff_range<T: PartialEq>(a: &[T], b: &[T], a_base: usize, b_base: usize, ops: &mut Vec<Op>) {
  let prefix = a.iter().zip(b).take_while(|(x, y)| x == y).count();
  ops.extend((0..prefix).map(|i| Op::Equal(a_base + i, b_base + i)));

  let (a, b) = (&a[prefix..], &b[prefix..]);
  let suffix = a.iter().rev().zip(b.iter().rev()).take_while(|(x, y)| x == y).count();
  let (a, b) = (&a[..a.len() - suffix], &b[..b.len() - suffix]);
  let (a_base, b_base) = (a_base + prefix, b_base + prefix);

  let split = if a.is_empty() || b.is_empty() {
    None
  } else {
    bisect(a, b).filter(|&(x, y)| (x, y) != (0, 0) && (x, y) != (a.len(), b.len()))
  };
  match split {
    Some((x, y)) => {
      diff_range(&a[..x], &b[..y], a_base, b_base, ops);
      diff_range(&a[x..], &b[y..], a_base + x, b_base + y, ops);
    }
    None => {
      ops.extend((0..a.len()).map(|i| Op::Delete(a_base + i)));
      ops.extend((0..b.len()).map(|j| Op::Insert(b_base + j)));
    }
  }

  ops.extend((0..suffix).map(|i| Op::Equal(a_base + a.len() + i, b_base + b.len() + i)));
}

/// Point where a shortest forward path and a shortest backward path over
/// `a`/`b` meet, `None` when they do not meet within `MAX_EDIT_COST`.
fn bisect<T: PartialEq>(a: &[T], b: &[T]) -> Option<(usize, usize)> {
  let n = a.len() as isize;
  let m = b.len() as isize;
  let bound = ((n + m + 1) / 2).min(MAX_EDIT_COST);
  let offset = bound;
  let width = 2 * bound + 2;
  let mut forward = vec![-1isize; width as usize];
  let mut backward = vec![-1isize; width as usize];
  forward[(offset + 1) as usize] = 0;
  backward[(offset + 1) as usize] = 0;

  let delta = n - m;
  // With an odd delta the paths meet while extending forward.
  let front = delta % 2 != 0;
  let in_range = |k: isize| (0..width).contains(&k);
  let (mut k1_start, mut k1_end, mut k2_start, mut k2_end) = (0isize, 0isize, 0isize, 0isize);

  for d in 0..bound {
    let mut k1 = -d + k1_start;
    while k1 <= d - k1_end {
      let k1_offset = (offset + k1) as usize;
      let mut x1 = if k1 == -d || (k1 != d && forward[k1_offset - 1] < forward[k1_offset + 1]) {
        forward[k1_offset + 1]
      } else {
        forward[k1_offset - 1] + 1
      };
      let mut y1 = x1 - k1;
      while x1 < n && y1 < m && a[x1 as usize] == b[y1 as usize] {
        x1 += 1;
        y1 += 1;
      }
      forward[k1_offset] = x1;
      if x1 > n {
        k1_end += 2;
      } else if y1 > m {
        k1_start += 2;
      } else if front {
        let k2_offset = offset + delta - k1;
        if in_range(k2_offset) && backward[k2_offset as usize] != -1 && x1 >= n - backward[k2_offset as usize] {
          return Some((x1 as usize, y1 as usize));
        }
      }
      k1 += 2;
    }

    let mut k2 = -d + k2_start;
    while k2 <= d - k2_end {
      let k2_offset = (offset + k2) as usize;
      let mut x2 = if k2 == -d || (k2 != d && backward[k2_offset - 1] < backward[k2_offset + 1]) {
        backward[k2_offset + 1]
      } else {
        backward[k2_offset - 1] + 1
      };
      let mut y2 = x2 - k2;
      while x2 < n && y2 < m && a[(n - x2 - 1) as usize] == b[(m - y2 - 1) as usize] {
        x2 += 1;
        y2 += 1;
      }
      backward[k2_offset] = x2;
      if x2 > n {
        k2_end += 2;
      } else if y2 > m {
        k2_start += 2;
      } else if !front {
        let k1_offset = offset + delta - k2;
        if in_range(k1_offset) && forward[k1_offset as usize] != -1 {
          let x1 = forward[k1_offset as usize];
          let y1 = offset + x1 - k1_offset;
          if x1 >= n - x2 {
            return Some((x1 as usize, y1 as usize));
          }
        }
      }
      k2 += 2;
    }
  }

  None
}

fn push_diff_line(out: &mut String, prefix: char, line: &str) {
  out.push(prefix);
  match line.strip_suffix('\n') {
    Some(content) => {
      out.push_str(content);
      out.push('\n');
    }
    None => {
      out.push_str(line);
      out.push('\n');
      out.push_str(NO_NEWLINE_MARKER);
      out.push('\n');
    }
  }
}

fn hunk_range(start: usize, len: usize) -> String {
  // A zero-length range names the line before the change.
  let start = if len == 0 { start } else { start + 1 };
  if len == 1 { start.to_string() } else { format!("{},{}", start, len) }
}

fn write_hunks(out: &mut String, old_text: &str, new_text: &str, context: Option<usize>) {
  let a = split_lines(old_text);
  let b = split_lines(new_text);
  let ops = myers(&a, &b);

  let changes: Vec<usize> = ops
    .iter()
    .enumerate()
    .filter(|(_, op)| !matches!(op, Op::Equal(..)))
    .map(|(i, _)| i)
    .collect();
  if changes.is_empty() {
    return;
  }

  // Group change indices into op ranges, merging when contexts overlap.
  let mut groups: Vec<(usize, usize)> = Vec::new();
  match context {
    None => groups.push((0, ops.len())),
    Some(ctx) => {
      for &i in &changes {
        let start = i.saturating_sub(ctx);
        let end = (i + 1 + ctx).min(ops.len());
        match groups.last_mut() {
          Some(last) if start <= last.1 => last.1 = last.1.max(end),
          _ => groups.push((start, end)),
        }
      }
    }
  }

  // Old/new line positions at each op index.
  let mut positions = Vec::with_capacity(ops.len() + 1);
  let (mut ai, mut bi) = (0usize, 0usize);
  for op in &ops {
    positions.push((ai, bi));
    match op {
      Op::Equal(..) => {
        ai += 1;
        bi += 1;
      }
      Op::Delete(_) => ai += 1,
      Op::Insert(_) => bi += 1,
    }
  }
  positions.push((ai, bi));

  for (start, end) in groups {
    let (a_start, b_start) = positions[start];
    let (a_end, b_end) = positions[end];
    out.push_str(&format!(
      "@@ -{} +{} @@\n",
      hunk_range(a_start, a_end - a_start),
      hunk_range(b_start, b_end - b_start)
    ));
    for op in &ops[start..end] {
      match *op {
        Op::Equal(i, _) => push_diff_line(out, ' ', a[i]),
        Op::Delete(i) => push_diff_line(out, '-', a[i]),
        Op::Insert(j) => push_diff_line(out, '+', b[j]),
      }
    }
  }
}

/// Errors raised while applying a unified diff.
#[derive(Debug, Error)]
pub enum DiffError {
  #[error("malformed patch at line {line}: {message}")]
  Malformed { line: usize, message: String },

  #[error("patch does not apply to '{path}': {message}")]
  Mismatch { path: String, message: String },

  #[error("binary patch for '{0}' cannot be applied as text")]
  Binary(String),

  #[error("i/o error on '{path}': {source}")]
  Io {
    path: String,
    #[source]
    source: std::io::Error,
  },
}

#[derive(Debug, Default)]
struct FilePatch {
  path: String,
  added: bool,
  deleted: bool,
  binary: bool,
  new_mode: Option<String>,
  hunks: Vec<Hunk>,
}

#[derive(Debug, Default)]
struct Hunk {
  old_start: usize,
  old_len: usize,
  lines: Vec<(char, String)>,
}

fn parse_range(text: &str, line: usize) -> Result<(usize, usize), DiffError> {
  let malformed = || DiffError::Malformed {
    line,
    message: format!("bad hunk range '{}'", text),
  };
  let (start, len) = match text.split_once(',') {
    Some((s, l)) => (s, l),
    None => (text, "1"),
  };
  Ok((
    start.parse().map_err(|_| malformed())?,
    len.parse().map_err(|_| malformed())?,
  ))
}

fn parse_unified_diff(text: &str) -> Result<Vec<FilePatch>, DiffError> {
  let mut files: Vec<FilePatch> = Vec::new();
  // Old and new lines still expected by the current hunk.
  let mut remaining = (0usize, 0usize);

  for (i, raw) in text.split_inclusive('\n').enumerate() {
    let lineno = i + 1;
    let line = raw.strip_suffix('\n').unwrap_or(raw);

    if line == NO_NEWLINE_MARKER {
      if let Some((_, content)) = files
        .last_mut()
        .and_then(|f| f.hunks.last_mut())
        .and_then(|h| h.lines.last_mut())
      {
        content.pop();
      }
      continue;
    }

    if remaining != (0, 0) {
      let Some(hunk) = files.last_mut().and_then(|f| f.hunks.last_mut()) else {
        return Err(DiffError::Malformed {
          line: lineno,
          message: "hunk line outside of a hunk".to_string(),
        });
      };
      let mut chars = line.chars();
      let tag = chars.next().unwrap_or(' ');
      match tag {
        ' ' => {
          remaining.0 = remaining.0.saturating_sub(1);
          remaining.1 = remaining.1.saturating_sub(1);
        }
        '-' => remaining.0 = remaining.0.saturating_sub(1),
        '+' => remaining.1 = remaining.1.saturating_sub(1),
        _ => {
          return Err(DiffError::Malformed {
            line: lineno,
            message: format!("unexpected hunk line '{}'", line),
          });
        }
      }
      hunk.lines.push((tag, format!("{}\n", chars.as_str())));
      continue;
    }

    if let Some(rest) = line.strip_prefix("diff --git ") {
      let path = rest
        .rsplit_once(" b/")
        .map(|(_, p)| p.to_string())
        .ok_or_else(|| DiffError::Malformed {
          line: lineno,
          message: "missing b/ path".to_string(),
        })?;
      files.push(FilePatch {
        path,
        ..Default::default()
      });
      continue;
    }

    let Some(file) = files.last_mut() else {
      return Err(DiffError::Malformed {
        line: lineno,
        message: "content before first file header".to_string(),
      });
    };

    if file.binary {
      continue;
    }

    if let Some(mode) = line.strip_prefix("new file mode ") {
      file.added = true;
      file.new_mode = Some(mode.to_string());
    } else if line.starts_with("deleted file mode ") {
      file.deleted = true;
    } else if let Some(mode) = line.strip_prefix("new mode ") {
      file.new_mode = Some(mode.to_string());
    } else if line.starts_with("old mode ") || line.starts_with("--- ") || line.starts_with("+++ ") {
      continue;
    } else if line.starts_with("Binary files ") || line == "GIT binary patch" {
      file.binary = true;
    } else if let Some(rest) = line.strip_prefix("@@ -") {
      let ranges = rest.split(" @@").next().unwrap_or_default();
      let (old, new) = ranges.split_once(" +").ok_or_else(|| DiffError::Malformed {
        line: lineno,
        message: "bad hunk header".to_string(),
      })?;
      let (old_start, old_len) = parse_range(old, lineno)?;
      let (_, new_len) = parse_range(new, lineno)?;
      remaining = (old_len, new_len);
      file.hunks.push(Hunk {
        old_start,
        old_len,
        lines: Vec::new(),
      });
    } else {
      return Err(DiffError::Malformed {
        line: lineno,
        message: format!("unexpected line '{}'", line),
      });
    }
  }

  Ok(files)
}

fn io_error(path: &Path) -> impl Fn(std::io::Error) -> DiffError + '_ {
  move |source| DiffError::Io {
    path: path.display().to_string(),
    source,
  }
}

/// Remove now-empty parent directories of `path`, stopping at `root`.
pub fn prune_empty_parents(root: &Path, path: &Path) {
  let mut current = path.parent();
  while let Some(dir) = current {
    if dir == root || !dir.starts_with(root) {
      break;
    }
    if fs::remove_dir(dir).is_err() {
      break;
    }
    current = dir.parent();
  }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: &str) -> Result<(), DiffError> {
  use std::os::unix::fs::PermissionsExt;
  let bits = if mode == "100755" { 0o755 } else { 0o644 };
  fs::set_permissions(path, fs::Permissions::from_mode(bits)).map_err(io_error(path))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: &str) -> Result<(), DiffError> {
  Ok(())
}

fn apply_hunks(path: &str, original: &str, hunks: &[Hunk]) -> Result<String, DiffError> {
  let lines = split_lines(original);
  let mut out = String::with_capacity(original.len());
  let mut cursor = 0usize;

  for hunk in hunks {
    let position = if hunk.old_len == 0 {
      hunk.old_start
    } else {
      hunk.old_start.saturating_sub(1)
    };
    if position < cursor || position > lines.len() {
      return Err(DiffError::Mismatch {
        path: path.to_string(),
        message: format!("hunk at line {} is out of range", hunk.old_start),
      });
    }
    for line in &lines[cursor..position] {
      out.push_str(line);
    }
    cursor = position;

    for (tag, content) in &hunk.lines {
      match tag {
        '+' => out.push_str(content),
        _ => {
          let Some(existing) = lines.get(cursor) else {
            return Err(DiffError::Mismatch {
              path: path.to_string(),
              message: "patch runs past end of file".to_string(),
            });
          };
          if existing != content {
            return Err(DiffError::Mismatch {
              path: path.to_string(),
              message: format!("line {} differs", cursor + 1),
            });
          }
          if *tag == ' ' {
            out.push_str(existing);
          }
          cursor += 1;
        }
      }
    }
  }

  for line in &lines[cursor..] {
    out.push_str(line);
  }
  Ok(out)
}

/// Apply a unified diff produced by `create_patch` to the directory `root`.
///
/// Deleted files take their empty parent directories with them. Returns the
/// patched paths.
pub fn apply_unified_diff(root: &Path, text: &str) -> Result<Vec<String>, DiffError> {
  let files = parse_unified_diff(text)?;
  if let Some(file) = files.iter().find(|f| f.binary) {
    return Err(DiffError::Binary(file.path.clone()));
  }
  let mut applied = Vec::with_capacity(files.len());

  // Deletions first: a path may turn from a directory into a file.
  let (deleted, changed): (Vec<FilePatch>, Vec<FilePatch>) = files.into_iter().partition(|f| f.deleted);

  for file in deleted {
    let target = root.join(&file.path);
    fs::remove_file(&target).map_err(io_error(&target))?;
    prune_empty_parents(root, &target);
    applied.push(file.path);
  }

  for file in changed {
    let target = root.join(&file.path);
    let original = if file.added {
      String::new()
    } else {
      fs::read_to_string(&target).map_err(io_error(&target))?
    };
    let patched = apply_hunks(&file.path, &original, &file.hunks)?;

    if let Some(parent) = target.parent() {
      fs::create_dir_all(parent).map_err(io_error(parent))?;
    }
    fs::write(&target, patched).map_err(io_error(&target))?;
    if let Some(mode) = &file.new_mode {
      set_mode(&target, mode)?;
    }
    applied.push(file.path);
  }

  Ok(applied)
}
