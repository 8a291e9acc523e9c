//! Shell quoting and label-safe slugs.

use crate::util::hash::hash_bytes;

const SHELL_SAFE_PUNCTUATION: &str = "_@%+=:,./-";

const SLUG_MAX_LEN: usize = 63;
const SLUG_HASH_LEN: usize = 8;

/// Quote `arg` for a POSIX shell if it contains anything outside the safe set.
pub fn quote_shell_arg(arg: &str) -> String {
  if arg.is_empty() {
    return "''".to_string();
  }

  let is_safe = |c: char| c.is_alphanumeric() || SHELL_SAFE_PUNCTUATION.contains(c);
  if !arg.chars().all(is_safe) {
    return format!("'{}'", arg.replace('\'', "'\"'\"'"));
  }

  arg.to_string()
}

/// Turn arbitrary text into a label-safe slug.
///
/// Text that already is a valid slug is returned unchanged. Anything else is
/// lowercased, collapsed to `[a-z0-9-]` and suffixed with a short hash of the
/// original text so distinct inputs never share a slug.
pub fn slugify(data: &str) -> String {
  let mut cleaned = String::with_capacity(data.len());
  for c in data.to_lowercase().chars() {
    if c.is_ascii_lowercase() || c.is_ascii_digit() {
      cleaned.push(c);
    } else if !cleaned.ends_with('-') {
      cleaned.push('-');
    }
  }
  let cleaned = cleaned.trim_matches('-').to_string();

  if cleaned == data && data.len() <= SLUG_MAX_LEN {
    return cleaned;
  }

  let hash = hash_bytes(data.as_bytes());
  let max_prefix = SLUG_MAX_LEN - SLUG_HASH_LEN - 1;
  let prefix: String = cleaned.chars().take(max_prefix).collect();
  let prefix = prefix.trim_end_matches('-');

  if prefix.is_empty() {
    hash.0[..SLUG_HASH_LEN].to_string()
  } else {
    format!("{}-{}", prefix, &hash.0[..SLUG_HASH_LEN])
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn safe_args_are_left_alone() {
    assert_eq!(quote_shell_arg("/app/src"), "/app/src");
    assert_eq!(quote_shell_arg("a@b%c+d=e:f,g.h/i-j"), "a@b%c+d=e:f,g.h/i-j");
  }

  #[test]
  fn empty_arg_is_quoted() {
    assert_eq!(quote_shell_arg(""), "''");
  }

  #[test]
  fn unsafe_args_are_single_quoted() {
    assert_eq!(quote_shell_arg("my dir"), "'my dir'");
    assert_eq!(quote_shell_arg("it's"), "'it'\"'\"'s'");
  }

  #[test]
  fn valid_slug_is_unchanged() {
    assert_eq!(slugify("backend-assets"), "backend-assets");
  }

  #[test]
  fn slug_is_cleaned_and_hashed() {
    let slug = slugify("/App/Assets");
    assert!(slug.starts_with("app-assets-"));
    assert_eq!(slug.len(), "app-assets-".len() + 8);
    assert_ne!(slugify("/App/Assets"), slugify("/app/assets"));
  }

  #[test]
  fn long_slug_is_limited() {
    let slug = slugify(&"x".repeat(200));
    assert!(slug.len() <= 63);
  }
}
