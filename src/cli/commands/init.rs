//! Init command - create a project-local kiln.toml

use crate::cli::args::InitArgs;
use crate::config::{ConfigManager, PipelineConfig};
use crate::error::{KilnError, KilnResult};
use crate::ui::{self, UiContext};

/// Execute the init command
pub async fn execute(args: InitArgs) -> KilnResult<()> {
    let ctx = UiContext::detect();

    let dir = match args.path {
        Some(path) => path,
        None => std::env::current_dir()
            .map_err(|e| KilnError::io("getting current directory", e))?,
    };

    let manager = ConfigManager::for_project(&dir);
    if manager.path().exists() && !args.force {
        ui::step_warn_hint(
            &ctx,
            &format!("Config already exists at {}", manager.path().display()),
            "Use --force to overwrite",
        );
        return Ok(());
    }

    manager.save(&PipelineConfig::default()).await?;
    ui::step_ok_detail(
        &ctx,
        "Pipeline initialized",
        &manager.path().display().to_string(),
    );
    ui::remark(&ctx, "Declare your stages in kiln.toml, then run: kiln build production");
    Ok(())
}
