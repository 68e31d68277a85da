//! Cache command - inspect and prune the layer cache

use crate::cache::LayerCache;
use crate::cli::args::{CacheAction, CacheArgs, OutputFormat};
use crate::config::{ConfigManager, PipelineConfig};
use crate::error::KilnResult;
use crate::ui::{self, TaskSpinner, UiContext};

/// Execute the cache command
pub async fn execute(args: CacheArgs, config: &PipelineConfig) -> KilnResult<()> {
    let cache_root = config
        .cache
        .dir
        .clone()
        .unwrap_or_else(ConfigManager::default_cache_dir);
    let cache = LayerCache::open(&cache_root).await?;

    match args.action {
        CacheAction::List { format } => list(&cache, format),
        CacheAction::Clear { yes } => clear(&cache, yes).await,
    }
}

fn list(cache: &LayerCache, format: OutputFormat) -> KilnResult<()> {
    let entries = cache.list();

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        OutputFormat::Plain => {
            for entry in entries {
                println!("{}", entry.key);
            }
        }
        OutputFormat::Table => {
            let ctx = UiContext::detect();
            if entries.is_empty() {
                ui::remark(&ctx, "Cache is empty");
                return Ok(());
            }
            ui::section(&ctx, &format!("{} cached layers", entries.len()));
            for entry in entries {
                ui::key_value(
                    &ctx,
                    entry.key.short(),
                    &format!(
                        "{}/{}  {}",
                        entry.stage,
                        entry.step,
                        entry.created_at.format("%Y-%m-%d %H:%M")
                    ),
                );
            }
        }
    }
    Ok(())
}

async fn clear(cache: &LayerCache, yes: bool) -> KilnResult<()> {
    let ctx = UiContext::detect().with_auto_yes(yes);
    let count = cache.list().len();

    if count == 0 {
        ui::remark(&ctx, "Cache is already empty");
        return Ok(());
    }

    let confirmed = ui::confirm(&ctx, &format!("Remove {} cached layers?", count), false).await?;
    if !confirmed {
        ui::remark(&ctx, "Aborted");
        return Ok(());
    }

    let mut spinner = TaskSpinner::new(&ctx);
    spinner.start("Clearing cache...");
    match cache.clear().await {
        Ok(removed) => {
            spinner.stop(&format!("Removed {} cached layers", removed));
            Ok(())
        }
        Err(e) => {
            spinner.stop_error("Failed to clear cache");
            Err(e)
        }
    }
}
