//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Kiln - Multi-stage container build pipeline
///
/// Builds dependency-isolated stages from a pinned lock artifact with
/// content-addressed layer caching.
#[derive(Parser, Debug)]
#[command(name = "kiln")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Project directory (defaults to current directory)
    #[arg(short, long, global = true, env = "KILN_PROJECT")]
    pub project: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build one or more stages and their dependencies
    Build(BuildArgs),

    /// Show the execution plan for a stage without building
    Plan(PlanArgs),

    /// Initialize a project-local kiln.toml config
    Init(InitArgs),

    /// Manage the layer cache
    Cache(CacheArgs),

    /// List recorded build artifacts
    Artifacts(ArtifactsArgs),

    /// Show configuration
    Config(ConfigArgs),
}

/// Arguments for the build command
#[derive(Parser, Debug)]
pub struct BuildArgs {
    /// Target stages to build
    #[arg(required_unless_present = "all")]
    pub stages: Vec<String>,

    /// Build every declared stage
    #[arg(long, conflicts_with = "stages")]
    pub all: bool,

    /// Disable the layer cache for this run
    #[arg(long)]
    pub no_cache: bool,

    /// Installer override (KEY=VALUE), e.g. index=/path/to/index
    #[arg(long = "build-arg", value_parser = parse_build_arg)]
    pub build_args: Vec<(String, String)>,
}

/// Arguments for the plan command
#[derive(Parser, Debug)]
pub struct PlanArgs {
    /// Target stage
    pub stage: String,
}

/// Arguments for the init command
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Overwrite existing kiln.toml
    #[arg(short, long)]
    pub force: bool,

    /// Target directory (defaults to current directory)
    #[arg(long)]
    pub path: Option<PathBuf>,
}

/// Arguments for the cache command
#[derive(Parser, Debug)]
pub struct CacheArgs {
    /// Subcommand for cache
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// List cached layers
    List {
        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Remove every cached layer
    Clear {
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

/// Arguments for the artifacts command
#[derive(Parser, Debug)]
pub struct ArtifactsArgs {
    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,
}

/// Output format for list commands
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Simple text (one per line)
    Plain,
}

/// Parse a build arg in KEY=VALUE format
fn parse_build_arg(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE format: no '=' found in '{s}'"))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}
