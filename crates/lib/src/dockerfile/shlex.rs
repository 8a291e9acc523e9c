//! Shell-word expansion for Dockerfile values.
//!
//! Processes one word the way a Dockerfile frontend does before using an
//! instruction's value: quotes are removed, the escape token protects the
//! next character and variables are substituted. Whitespace is kept, so a
//! whole instruction line can be processed as a single word.
//!
//! Supported substitutions: `$VAR`, `${VAR}`, `${VAR:-word}`, `${VAR-word}`,
//! `${VAR:+word}`, `${VAR+word}`, `${VAR:?message}` and `${VAR?message}`.

use std::collections::BTreeMap;

use thiserror::Error;

pub const DEFAULT_ESCAPE_TOKEN: char = '\\';

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShlexError {
  #[error("unexpected end of statement while looking for matching {0}")]
  Unterminated(char),

  #[error("unsupported modifier ({modifier}) in substitution of '{name}'")]
  UnsupportedModifier { name: String, modifier: char },

  #[error("missing ':' or '}}' in substitution of '{0}'")]
  BadSubstitution(String),

  #[error("{name}: {message}")]
  Required { name: String, message: String },
}

/// Ordered variable layers; the first layer defining a name wins.
#[derive(Debug, Clone, Default)]
pub struct Variables<'a> {
  layers: Vec<&'a BTreeMap<String, String>>,
}

impl<'a> Variables<'a> {
  pub fn new(layers: &[&'a BTreeMap<String, String>]) -> Self {
    Self {
      layers: layers.to_vec(),
    }
  }

  pub fn get(&self, name: &str) -> Option<&'a str> {
    self
      .layers
      .iter()
      .find_map(|layer| layer.get(name).map(String::as_str))
  }
}

#[derive(Debug, Clone, Copy)]
pub struct Lexer {
  escape: char,
}

impl Default for Lexer {
  fn default() -> Self {
    Self::new(DEFAULT_ESCAPE_TOKEN)
  }
}

impl Lexer {
  pub fn new(escape: char) -> Self {
    Self { escape }
  }

  pub fn escape(&self) -> char {
    self.escape
  }

  /// Expand `word` against `vars`.
  pub fn process_word(&self, word: &str, vars: &Variables<'_>) -> Result<String, ShlexError> {
    let mut scanner = Scanner {
      chars: word.chars().collect(),
      pos: 0,
      escape: self.escape,
      vars,
    };
    scanner.process_until(None)
  }
}

struct Scanner<'v, 'a> {
  chars: Vec<char>,
  pos: usize,
  escape: char,
  vars: &'v Variables<'a>,
}

impl Scanner<'_, '_> {
  fn peek(&self) -> Option<char> {
    self.chars.get(self.pos).copied()
  }

  fn next(&mut self) -> Option<char> {
    let ch = self.peek();
    if ch.is_some() {
      self.pos += 1;
    }
    ch
  }

  /// Process until `stop` (consumed) or end of input.
  fn process_until(&mut self, stop: Option<char>) -> Result<String, ShlexError> {
    let mut out = String::new();
    loop {
      let Some(ch) = self.peek() else {
        return match stop {
          Some(stop) => Err(ShlexError::Unterminated(stop)),
          None => Ok(out),
        };
      };
      if Some(ch) == stop {
        self.pos += 1;
        return Ok(out);
      }

      match ch {
        '\'' => out.push_str(&self.single_quoted()?),
        '"' => out.push_str(&self.double_quoted()?),
        '$' => out.push_str(&self.dollar()?),
        c if c == self.escape => {
          self.pos += 1;
          if let Some(escaped) = self.next() {
            out.push(escaped);
          }
        }
        c => {
          self.pos += 1;
          out.push(c);
        }
      }
    }
  }

  fn single_quoted(&mut self) -> Result<String, ShlexError> {
    self.pos += 1;
    let mut out = String::new();
    loop {
      match self.next() {
        None => return Err(ShlexError::Unterminated('\'')),
        Some('\'') => return Ok(out),
        Some(c) => out.push(c),
      }
    }
  }

  fn double_quoted(&mut self) -> Result<String, ShlexError> {
    self.pos += 1;
    let mut out = String::new();
    loop {
      match self.peek() {
        None => return Err(ShlexError::Unterminated('"')),
        Some('"') => {
          self.pos += 1;
          return Ok(out);
        }
        Some('$') => out.push_str(&self.dollar()?),
        Some(c) if c == self.escape => {
          self.pos += 1;
          match self.peek() {
            Some(next) if next == '"' || next == '$' || next == self.escape => {
              self.pos += 1;
              out.push(next);
            }
            _ => out.push(c),
          }
        }
        Some(c) => {
          self.pos += 1;
          out.push(c);
        }
      }
    }
  }

  fn name(&mut self) -> String {
    let mut name = String::new();
    while let Some(c) = self.peek() {
      if c.is_ascii_alphanumeric() || c == '_' {
        name.push(c);
        self.pos += 1;
      } else {
        break;
      }
    }
    name
  }

  fn dollar(&mut self) -> Result<String, ShlexError> {
    self.pos += 1;

    if self.peek() != Some('{') {
      let name = self.name();
      if name.is_empty() {
        return Ok("$".to_string());
      }
      return Ok(self.vars.get(&name).unwrap_or_default().to_string());
    }

    self.pos += 1;
    let name = self.name();
    let value = self.vars.get(&name);

    match self.next() {
      Some('}') => Ok(value.unwrap_or_default().to_string()),
      Some(':') => {
        let modifier = self.next().ok_or(ShlexError::Unterminated('}'))?;
        let word = self.process_until(Some('}'))?;
        let set_and_non_empty = value.is_some_and(|v| !v.is_empty());
        match modifier {
          '-' => Ok(if set_and_non_empty { value.unwrap_or_default().to_string() } else { word }),
          '+' => Ok(if set_and_non_empty { word } else { String::new() }),
          '?' if set_and_non_empty => Ok(value.unwrap_or_default().to_string()),
          '?' => Err(ShlexError::Required {
            name,
            message: required_message(word),
          }),
          other => Err(ShlexError::UnsupportedModifier { name, modifier: other }),
        }
      }
      Some(modifier @ ('-' | '+' | '?')) => {
        let word = self.process_until(Some('}'))?;
        match (modifier, value) {
          ('-', Some(v)) => Ok(v.to_string()),
          ('-', None) => Ok(word),
          ('+', Some(_)) => Ok(word),
          ('+', None) => Ok(String::new()),
          ('?', Some(v)) => Ok(v.to_string()),
          _ => Err(ShlexError::Required {
            name,
            message: required_message(word),
          }),
        }
      }
      None => Err(ShlexError::Unterminated('}')),
      Some(_) => Err(ShlexError::BadSubstitution(name)),
    }
  }
}

fn required_message(word: String) -> String {
  if word.is_empty() {
    "is not allowed to be unset".to_string()
  } else {
    word
  }
}
