mod cmd;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cmd::{DockerfileDigestArgs, GitMappingArgs, StagesArgs};

/// stagecraft - incremental image stage digests
#[derive(Parser)]
#[command(name = "stagecraft")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Compute the digest of a Dockerfile target
  DockerfileDigest(DockerfileDigestArgs),

  /// Inspect a git mapping and how it would be applied
  GitMapping(GitMappingArgs),

  /// Compute every stage digest of an image definition
  Stages(StagesArgs),
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "warn" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  match cli.command {
    Commands::DockerfileDigest(args) => cmd::cmd_dockerfile_digest(&args, cli.verbose),
    Commands::GitMapping(args) => cmd::cmd_git_mapping(&args),
    Commands::Stages(args) => cmd::cmd_stages(&args, cli.verbose),
  }
}
