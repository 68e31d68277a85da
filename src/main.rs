//! Kiln - Multi-stage container build pipeline
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use kiln::cli::{Cli, Commands};
use kiln::config::{ConfigManager, CONFIG_FILE};
use kiln::error::{KilnError, KilnResult};
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> KilnResult<()> {
    let cli = Cli::parse();

    // Init command doesn't need config loading
    if let Commands::Init(args) = cli.command {
        init_logging(cli.verbose, "text");
        return kiln::cli::commands::init(args).await;
    }

    // Locate the project config, walking up from the starting directory
    let start = match cli.project {
        Some(dir) => dir,
        None => std::env::current_dir()
            .map_err(|e| KilnError::io("getting current directory", e))?,
    };
    let config_path = ConfigManager::find_project_config(&start)
        .ok_or_else(|| KilnError::ConfigNotFound(start.join(CONFIG_FILE)))?;

    let project_dir = config_path
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| start.clone());
    let manager = ConfigManager::with_path(config_path);
    let config = manager.load().await?;

    init_logging(cli.verbose, &config.general.log_format);
    debug!("Using config: {}", manager.path().display());

    // Dispatch to command
    match cli.command {
        Commands::Init(_) => unreachable!("Init handled above"),
        Commands::Build(args) => kiln::cli::commands::build(args, &config, &project_dir).await,
        Commands::Plan(args) => kiln::cli::commands::plan(args, &config).await,
        Commands::Cache(args) => kiln::cli::commands::cache(args, &config).await,
        Commands::Artifacts(args) => kiln::cli::commands::artifacts(args, &project_dir).await,
        Commands::Config(args) => kiln::cli::commands::config(args, &config, &manager).await,
    }
}

/// Initialize logging: 0 = warn (progress output only), 1 = info, 2+ = debug
fn init_logging(verbose: u8, format: &str) {
    let directive = match verbose {
        0 => "kiln=warn",
        1 => "kiln=info",
        _ => "kiln=debug",
    };

    if format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(EnvFilter::new(directive))
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new(directive))
            .with_target(false)
            .without_time()
            .init();
    }
}
