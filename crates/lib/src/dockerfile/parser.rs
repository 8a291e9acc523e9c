//! Dockerfile parser.
//!
//! Parses a Dockerfile into meta ARGs (declared before the first FROM) and
//! an ordered list of build stages. Supports:
//! - the `# escape=` parser directive
//! - line continuations and full-line comments
//! - `FROM [--platform=<p>] <image> [AS <name>]`
//! - stage references in `COPY --from` and `RUN --mount=from=`, resolved to
//!   stage indices once every stage is known
//!
//! Heredocs are not supported.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::DockerfileError;
use super::instruction::{ArgInstruction, Instruction, parse_instruction, split_keyword, split_words};
use super::shlex::DEFAULT_ESCAPE_TOKEN;

/// A single build stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerStage {
  /// Base image expression as written, possibly referencing meta ARGs.
  pub base_name: String,
  /// Stage name from `AS <name>`, lower-cased.
  pub name: Option<String>,
  pub platform: Option<String>,
  /// Line of the FROM instruction.
  pub line: usize,
  pub instructions: Vec<Instruction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dockerfile {
  pub escape: char,
  pub meta_args: Vec<ArgInstruction>,
  pub stages: Vec<DockerStage>,
}

impl Dockerfile {
  pub fn parse(content: &str) -> Result<Self, DockerfileError> {
    let (escape, lines) = preprocess(content);

    let mut meta_args = Vec::new();
    let mut stages: Vec<DockerStage> = Vec::new();

    for (line_no, line) in lines {
      let (keyword, rest) = split_keyword(&line);

      if keyword == "FROM" {
        stages.push(parse_from(line_no, rest, escape)?);
        continue;
      }

      let instruction = parse_instruction(line_no, &line, escape)?;
      match stages.last_mut() {
        Some(stage) => stage.instructions.push(instruction),
        None => match instruction {
          Instruction::Arg(arg) => meta_args.push(arg),
          other => {
            return Err(DockerfileError::Parse {
              line: line_no,
              message: format!("{} instruction before the first FROM", other.keyword()),
            });
          }
        },
      }
    }

    if stages.is_empty() {
      return Err(DockerfileError::Parse {
        line: 0,
        message: "file with no instructions: expected at least one FROM".to_string(),
      });
    }

    let mut dockerfile = Self {
      escape,
      meta_args,
      stages,
    };
    dockerfile.resolve_stage_references();
    Ok(dockerfile)
  }

  pub fn load(path: &Path) -> Result<Self, DockerfileError> {
    let content = fs::read_to_string(path).map_err(|source| DockerfileError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    Self::parse(&content)
  }

  /// Index of the stage called `name` (case-insensitive).
  pub fn stage_index(&self, name: &str) -> Option<usize> {
    let name = name.to_lowercase();
    self.stages.iter().position(|s| s.name.as_deref() == Some(name.as_str()))
  }

  /// Index of the build target: the named stage, or the last one.
  pub fn target_index(&self, target: Option<&str>) -> Result<usize, DockerfileError> {
    match target.filter(|t| !t.is_empty()) {
      None => Ok(self.stages.len() - 1),
      Some(target) => self
        .stage_index(target)
        .ok_or_else(|| DockerfileError::UnknownTarget(target.to_string())),
    }
  }

  fn resolve_stage_references(&mut self) {
    let name_to_index: BTreeMap<String, usize> = self
      .stages
      .iter()
      .enumerate()
      .filter_map(|(i, s)| s.name.clone().map(|n| (n, i)))
      .collect();
    let count = self.stages.len();

    let lookup = |from: &str| -> Option<usize> {
      let from = from.to_lowercase();
      if let Some(index) = name_to_index.get(&from) {
        return Some(*index);
      }
      from.parse::<usize>().ok().filter(|i| *i < count)
    };

    for stage in &mut self.stages {
      for instruction in &mut stage.instructions {
        match instruction {
          Instruction::Copy(copy) => {
            copy.from_stage = copy.from.as_deref().and_then(lookup);
          }
          Instruction::Run(run) => {
            for mount in &mut run.mounts {
              mount.from_stage = mount.from.as_deref().and_then(lookup);
            }
          }
          _ => {}
        }
      }
    }
  }
}

fn parse_from(line_no: usize, rest: &str, escape: char) -> Result<DockerStage, DockerfileError> {
  let mut words = split_words(rest, escape).into_iter().peekable();
  let mut platform = None;

  while let Some(word) = words.next_if(|w| w.starts_with("--")) {
    match word.trim_start_matches("--").split_once('=') {
      Some(("platform", value)) => platform = Some(value.to_string()),
      _ => {
        return Err(DockerfileError::Parse {
          line: line_no,
          message: format!("unknown flag in FROM: {}", word),
        });
      }
    }
  }

  let words: Vec<String> = words.collect();
  let (base_name, name) = match words.as_slice() {
    [base] => (base.clone(), None),
    [base, as_kw, name] if as_kw.eq_ignore_ascii_case("as") => (base.clone(), Some(name.to_lowercase())),
    _ => {
      return Err(DockerfileError::Parse {
        line: line_no,
        message: "FROM requires either one or three arguments".to_string(),
      });
    }
  };

  Ok(DockerStage {
    base_name,
    name,
    platform,
    line: line_no,
    instructions: Vec::new(),
  })
}

/// Read the escape directive and turn physical lines into logical ones.
///
/// Each logical line carries the number of its first physical line.
fn preprocess(content: &str) -> (char, Vec<(usize, String)>) {
  let mut escape = DEFAULT_ESCAPE_TOKEN;
  let mut in_directives = true;
  let mut lines = Vec::new();
  let mut current: Option<(usize, String)> = None;

  for (idx, raw) in content.lines().enumerate() {
    let line_no = idx + 1;
    let trimmed = raw.trim();

    if in_directives {
      if let Some(value) = directive_value(trimmed, "escape") {
        if let Some(c) = value.chars().next() {
          escape = c;
        }
        continue;
      }
      if !trimmed.is_empty() || current.is_some() {
        in_directives = false;
      }
    }

    if trimmed.starts_with('#') {
      continue;
    }
    if trimmed.is_empty() && current.is_none() {
      continue;
    }

    let without_newline = raw.trim_end();
    let (text, continues) = match without_newline.strip_suffix(escape) {
      Some(text) => (text, true),
      None => (without_newline, false),
    };

    let (start, mut joined) = current.take().unwrap_or((line_no, String::new()));
    joined.push_str(text);
    if continues {
      current = Some((start, joined));
    } else if !joined.trim().is_empty() {
      lines.push((start, joined.trim().to_string()));
    }
  }

  if let Some((start, joined)) = current {
    if !joined.trim().is_empty() {
      lines.push((start, joined.trim().to_string()));
    }
  }

  (escape, lines)
}

fn directive_value<'a>(line: &'a str, name: &str) -> Option<&'a str> {
  let body = line.strip_prefix('#')?.trim();
  let (key, value) = body.split_once('=')?;
  key.trim().eq_ignore_ascii_case(name).then(|| value.trim())
}
