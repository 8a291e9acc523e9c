//! Parsed Dockerfile instructions.
//!
//! Instructions form a closed sum type. Every variant keeps the original
//! instruction text, which is what ADD, COPY and generic instructions
//! contribute to the dependency list. Values are kept raw (quotes and
//! variable references intact); expansion happens during resolution.

use serde::{Deserialize, Serialize};

use super::DockerfileError;

/// Keywords accepted as [`Instruction::Generic`].
const GENERIC_KEYWORDS: &[&str] = &[
  "CMD",
  "ENTRYPOINT",
  "EXPOSE",
  "HEALTHCHECK",
  "LABEL",
  "MAINTAINER",
  "SHELL",
  "STOPSIGNAL",
  "USER",
  "VOLUME",
  "WORKDIR",
];

/// `key[=value]` pair of an ARG instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgPair {
  pub key: String,
  pub value: Option<String>,
}

/// `key=value` pair of an ENV instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvPair {
  pub key: String,
  pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgInstruction {
  pub original: String,
  pub args: Vec<ArgPair>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvInstruction {
  pub original: String,
  pub vars: Vec<EnvPair>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddInstruction {
  pub original: String,
  pub sources: Vec<String>,
  pub dest: String,
  pub chown: Option<String>,
  pub chmod: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyInstruction {
  pub original: String,
  pub sources: Vec<String>,
  pub dest: String,
  /// Raw `--from` value: a stage name, a stage index or an image.
  pub from: Option<String>,
  /// Index of the stage `from` refers to, filled in once all stages are known.
  pub from_stage: Option<usize>,
  pub chown: Option<String>,
  pub chmod: Option<String>,
}

/// One `--mount` of a RUN instruction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMount {
  /// Mount type, `bind` when not given.
  pub kind: String,
  pub from: Option<String>,
  pub from_stage: Option<usize>,
  pub source: Option<String>,
  pub target: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunInstruction {
  pub original: String,
  pub mounts: Vec<RunMount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnBuildInstruction {
  pub original: String,
  /// The triggered instruction text, e.g. `COPY . /app`.
  pub expression: String,
}

/// Any instruction whose only digest contribution is its expanded text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenericInstruction {
  pub original: String,
  pub keyword: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instruction {
  Arg(ArgInstruction),
  Env(EnvInstruction),
  Add(AddInstruction),
  Copy(CopyInstruction),
  Run(RunInstruction),
  OnBuild(OnBuildInstruction),
  Generic(GenericInstruction),
}

impl Instruction {
  /// Instruction text as written (continuations joined, surrounding
  /// whitespace trimmed).
  pub fn original(&self) -> &str {
    match self {
      Self::Arg(i) => &i.original,
      Self::Env(i) => &i.original,
      Self::Add(i) => &i.original,
      Self::Copy(i) => &i.original,
      Self::Run(i) => &i.original,
      Self::OnBuild(i) => &i.original,
      Self::Generic(i) => &i.original,
    }
  }

  pub fn keyword(&self) -> &str {
    match self {
      Self::Arg(_) => "ARG",
      Self::Env(_) => "ENV",
      Self::Add(_) => "ADD",
      Self::Copy(_) => "COPY",
      Self::Run(_) => "RUN",
      Self::OnBuild(_) => "ONBUILD",
      Self::Generic(i) => &i.keyword,
    }
  }
}

/// Split a logical line into its upper-cased keyword and the remainder.
pub fn split_keyword(line: &str) -> (String, &str) {
  let line = line.trim();
  match line.find(char::is_whitespace) {
    Some(i) => (line[..i].to_uppercase(), line[i..].trim_start()),
    None => (line.to_uppercase(), ""),
  }
}

/// Parse one logical instruction line. FROM is handled by the parser.
pub fn parse_instruction(line_no: usize, line: &str, escape: char) -> Result<Instruction, DockerfileError> {
  let original = line.trim().to_string();
  let (keyword, rest) = split_keyword(&original);
  let err = |message: String| DockerfileError::Parse { line: line_no, message };

  match keyword.as_str() {
    "ARG" => {
      let args = parse_arg_pairs(rest, escape).map_err(err)?;
      Ok(Instruction::Arg(ArgInstruction { original, args }))
    }
    "ENV" => {
      let vars = parse_env_pairs(rest, escape).map_err(err)?;
      Ok(Instruction::Env(EnvInstruction { original, vars }))
    }
    "ADD" => {
      let (flags, mut paths) = split_flags(rest, escape);
      let dest = take_dest(&mut paths, "ADD").map_err(err)?;
      Ok(Instruction::Add(AddInstruction {
        sources: paths,
        dest,
        chown: flag_value(&flags, "chown"),
        chmod: flag_value(&flags, "chmod"),
        original,
      }))
    }
    "COPY" => {
      let (flags, mut paths) = split_flags(rest, escape);
      let dest = take_dest(&mut paths, "COPY").map_err(err)?;
      Ok(Instruction::Copy(CopyInstruction {
        sources: paths,
        dest,
        from: flag_value(&flags, "from"),
        from_stage: None,
        chown: flag_value(&flags, "chown"),
        chmod: flag_value(&flags, "chmod"),
        original,
      }))
    }
    "RUN" => {
      let (flags, _) = split_flags(rest, escape);
      let mounts = flags
        .iter()
        .filter(|(name, _)| name == "mount")
        .map(|(_, value)| parse_mount(value.as_deref().unwrap_or_default()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(err)?;
      Ok(Instruction::Run(RunInstruction { original, mounts }))
    }
    "ONBUILD" => {
      let expression = rest.trim().to_string();
      let (inner, _) = split_keyword(&expression);
      match inner.as_str() {
        "" => Err(err("ONBUILD requires an instruction".to_string())),
        "ONBUILD" => Err(err("chaining ONBUILD via `ONBUILD ONBUILD` isn't allowed".to_string())),
        "FROM" | "MAINTAINER" => Err(err(format!("{} isn't allowed as an ONBUILD trigger", inner))),
        _ => Ok(Instruction::OnBuild(OnBuildInstruction { original, expression })),
      }
    }
    "FROM" => Err(err("FROM is not an instruction of a stage".to_string())),
    kw if GENERIC_KEYWORDS.contains(&kw) => Ok(Instruction::Generic(GenericInstruction {
      keyword: keyword.clone(),
      original,
    })),
    _ => Err(err(format!("unknown instruction: {}", keyword))),
  }
}

/// Split on unquoted whitespace. Quotes and escapes stay in the words.
pub fn split_words(s: &str, escape: char) -> Vec<String> {
  let mut words = Vec::new();
  let mut current = String::new();
  let mut quote: Option<char> = None;
  let mut chars = s.chars();

  while let Some(c) = chars.next() {
    match quote {
      Some(q) => {
        current.push(c);
        if c == escape && q == '"' {
          if let Some(next) = chars.next() {
            current.push(next);
          }
        } else if c == q {
          quote = None;
        }
      }
      None if c == escape => {
        current.push(c);
        if let Some(next) = chars.next() {
          current.push(next);
        }
      }
      None if c == '"' || c == '\'' => {
        quote = Some(c);
        current.push(c);
      }
      None if c.is_whitespace() => {
        if !current.is_empty() {
          words.push(std::mem::take(&mut current));
        }
      }
      None => current.push(c),
    }
  }
  if !current.is_empty() {
    words.push(current);
  }
  words
}

/// Split `--name[=value]` flags from the front of an instruction's arguments.
///
/// The remainder is either a JSON array of strings or whitespace-separated
/// words.
fn split_flags(rest: &str, escape: char) -> (Vec<(String, Option<String>)>, Vec<String>) {
  let mut flags = Vec::new();
  let mut rest = rest.trim_start();

  while let Some(after) = rest.strip_prefix("--") {
    let end = after.find(char::is_whitespace).unwrap_or(after.len());
    let flag = &after[..end];
    match flag.split_once('=') {
      Some((name, value)) => flags.push((name.to_lowercase(), Some(value.to_string()))),
      None => flags.push((flag.to_lowercase(), None)),
    }
    rest = after[end..].trim_start();
  }

  if rest.starts_with('[') {
    if let Ok(items) = serde_json::from_str::<Vec<String>>(rest) {
      return (flags, items);
    }
  }
  (flags, split_words(rest, escape))
}

fn flag_value(flags: &[(String, Option<String>)], name: &str) -> Option<String> {
  flags
    .iter()
    .rev()
    .find(|(flag, _)| flag == name)
    .and_then(|(_, value)| value.clone())
}

fn take_dest(paths: &mut Vec<String>, keyword: &str) -> Result<String, String> {
  if paths.len() < 2 {
    return Err(format!("{} requires at least two arguments", keyword));
  }
  paths
    .pop()
    .ok_or_else(|| format!("{} requires a destination", keyword))
}

fn parse_mount(spec: &str) -> Result<RunMount, String> {
  let mut mount = RunMount {
    kind: "bind".to_string(),
    ..Default::default()
  };

  for field in spec.split(',').map(str::trim).filter(|f| !f.is_empty()) {
    let (key, value) = match field.split_once('=') {
      Some((k, v)) => (k.to_lowercase(), v.to_string()),
      None => (field.to_lowercase(), String::new()),
    };
    match key.as_str() {
      "type" => mount.kind = value,
      "from" => mount.from = Some(value),
      "source" | "src" => mount.source = Some(value),
      "target" | "dst" | "destination" => mount.target = Some(value),
      _ => {}
    }
  }

  if mount.kind.is_empty() {
    return Err(format!("invalid mount '{}': empty type", spec));
  }
  Ok(mount)
}

fn parse_arg_pairs(rest: &str, escape: char) -> Result<Vec<ArgPair>, String> {
  let words = split_words(rest, escape);
  if words.is_empty() {
    return Err("ARG requires at least one argument".to_string());
  }
  words
    .into_iter()
    .map(|word| match word.split_once('=') {
      Some((key, value)) if !key.is_empty() => Ok(ArgPair {
        key: key.to_string(),
        value: Some(value.to_string()),
      }),
      Some(_) => Err(format!("ARG names can not be blank: '{}'", word)),
      None => Ok(ArgPair { key: word, value: None }),
    })
    .collect()
}

fn parse_env_pairs(rest: &str, escape: char) -> Result<Vec<EnvPair>, String> {
  let words = split_words(rest, escape);
  let Some(first) = words.first() else {
    return Err("ENV requires at least one argument".to_string());
  };

  // Legacy `ENV key value with spaces` form.
  if !first.contains('=') {
    let value = rest.trim_start()[first.len()..].trim().to_string();
    if value.is_empty() {
      return Err(format!("ENV {} requires a value", first));
    }
    return Ok(vec![EnvPair {
      key: first.clone(),
      value,
    }]);
  }

  words
    .into_iter()
    .map(|word| match word.split_once('=') {
      Some((key, value)) if !key.is_empty() => Ok(EnvPair {
        key: key.to_string(),
        value: value.to_string(),
      }),
      _ => Err(format!("ENV names can not be blank: '{}'", word)),
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn parse(line: &str) -> Instruction {
    parse_instruction(1, line, '\\').unwrap()
  }

  #[test]
  fn splits_words_respecting_quotes() {
    assert_eq!(
      split_words(r#"a "b c" 'd e' f\ g"#, '\\'),
      vec!["a", "\"b c\"", "'d e'", "f\\ g"]
    );
  }

  #[test]
  fn parses_arg_pairs() {
    let Instruction::Arg(arg) = parse("ARG A B=2 C=\"x y\"") else {
      panic!("expected ARG");
    };
    assert_eq!(arg.args.len(), 3);
    assert_eq!(arg.args[0].value, None);
    assert_eq!(arg.args[1].value.as_deref(), Some("2"));
    assert_eq!(arg.args[2].value.as_deref(), Some("\"x y\""));
  }

  #[test]
  fn parses_env_forms() {
    let Instruction::Env(env) = parse("ENV PATH=/bin:$PATH HOME=/root") else {
      panic!("expected ENV");
    };
    assert_eq!(env.vars[0].key, "PATH");
    assert_eq!(env.vars[1].value, "/root");

    let Instruction::Env(env) = parse("ENV GREETING hello world") else {
      panic!("expected ENV");
    };
    assert_eq!(
      env.vars,
      vec![EnvPair {
        key: "GREETING".to_string(),
        value: "hello world".to_string()
      }]
    );
  }

  #[test]
  fn parses_copy_flags_and_json_form() {
    let Instruction::Copy(copy) = parse("COPY --from=Builder --chown=app:app /out/bin ./lib /usr/local/") else {
      panic!("expected COPY");
    };
    assert_eq!(copy.from.as_deref(), Some("Builder"));
    assert_eq!(copy.chown.as_deref(), Some("app:app"));
    assert_eq!(copy.sources, vec!["/out/bin", "./lib"]);
    assert_eq!(copy.dest, "/usr/local/");

    let Instruction::Copy(copy) = parse(r#"COPY ["a b.txt", "/dst/"]"#) else {
      panic!("expected COPY");
    };
    assert_eq!(copy.sources, vec!["a b.txt"]);
    assert_eq!(copy.from, None);
  }

  #[test]
  fn parses_run_mounts() {
    let Instruction::Run(run) =
      parse("RUN --mount=type=cache,target=/root/.cache --mount=from=deps,source=/out,target=/in make")
    else {
      panic!("expected RUN");
    };
    assert_eq!(run.mounts.len(), 2);
    assert_eq!(run.mounts[0].kind, "cache");
    assert_eq!(run.mounts[1].kind, "bind");
    assert_eq!(run.mounts[1].from.as_deref(), Some("deps"));
  }

  #[test]
  fn keeps_original_text() {
    let instruction = parse("  copy . /app  ");
    assert_eq!(instruction.original(), "copy . /app");
    assert_eq!(instruction.keyword(), "COPY");
  }

  #[test]
  fn onbuild_rejects_chaining() {
    assert!(matches!(
      parse("ONBUILD COPY . /app"),
      Instruction::OnBuild(OnBuildInstruction { ref expression, .. }) if expression == "COPY . /app"
    ));
    assert!(parse_instruction(3, "ONBUILD ONBUILD RUN x", '\\').is_err());
  }

  #[test]
  fn unknown_instruction_is_an_error() {
    let err = parse_instruction(7, "FROBNICATE x", '\\').unwrap_err();
    assert!(matches!(err, DockerfileError::Parse { line: 7, .. }));
  }

  #[test]
  fn generic_instructions_keep_keyword() {
    let instruction = parse("workdir /app");
    assert_eq!(instruction.keyword(), "WORKDIR");
    assert!(matches!(instruction, Instruction::Generic(_)));
  }
}
