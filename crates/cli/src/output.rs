//! CLI output formatting utilities.
//!
//! Provides consistent formatting for terminal output: colored status
//! messages, short hashes and human-readable patch sizes.

use anyhow::Context;
use clap::ValueEnum;
use owo_colors::{OwoColorize, Stream};

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
  #[default]
  Text,
  Json,
}

impl OutputFormat {
  pub fn is_json(self) -> bool {
    matches!(self, OutputFormat::Json)
  }
}

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const INFO: &str = "•";
  pub const PLUS: &str = "+";
  pub const MINUS: &str = "-";
}

/// Abbreviate a commit id, stage digest or image id for display.
///
/// A `sha256:` prefix is dropped before the id is cut to twelve characters.
pub fn short_id(id: &str) -> &str {
  let id = id.strip_prefix("sha256:").unwrap_or(id);
  id.get(..12).unwrap_or(id)
}

/// Human-readable patch size.
pub fn format_bytes(bytes: u64) -> String {
  const UNITS: [&str; 3] = ["KB", "MB", "GB"];

  if bytes < 1024 {
    return format!("{} B", bytes);
  }
  let mut value = bytes as f64 / 1024.0;
  let mut unit = UNITS[0];
  for next in &UNITS[1..] {
    if value < 1024.0 {
      break;
    }
    value /= 1024.0;
    unit = next;
  }
  format!("{:.1} {}", value, unit)
}

pub fn print_success(message: &str) {
  println!(
    "{} {}",
    symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
    message
  );
}

pub fn print_info(message: &str) {
  println!(
    "{} {}",
    symbols::INFO.if_supports_color(Stream::Stdout, |s| s.blue()),
    message
  );
}

pub fn print_stat(label: &str, value: &str) {
  println!(
    "  {}: {}",
    label.if_supports_color(Stream::Stdout, |s| s.dimmed()),
    value
  );
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{}", json);
  Ok(())
}
