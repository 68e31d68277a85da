//! Config command - show configuration

use crate::cli::args::{ConfigAction, ConfigArgs};
use crate::config::{ConfigManager, PipelineConfig};
use crate::error::KilnResult;

/// Execute the config command
pub async fn execute(
    args: ConfigArgs,
    config: &PipelineConfig,
    manager: &ConfigManager,
) -> KilnResult<()> {
    match args.action {
        None | Some(ConfigAction::Show) => show_config(config)?,
        Some(ConfigAction::Path) => println!("{}", manager.path().display()),
    }
    Ok(())
}

fn show_config(config: &PipelineConfig) -> KilnResult<()> {
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
