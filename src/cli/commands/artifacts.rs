//! Artifacts command - list recorded build artifacts

use crate::artifact::Artifact;
use crate::cli::args::{ArtifactsArgs, OutputFormat};
use crate::error::KilnResult;
use crate::ui::{self, UiContext};
use std::path::Path;

/// Execute the artifacts command
pub async fn execute(args: ArtifactsArgs, project_dir: &Path) -> KilnResult<()> {
    let work_dir = project_dir.join(".kiln");
    let artifacts = Artifact::list(&work_dir).await?;

    match args.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&artifacts)?);
        }
        OutputFormat::Plain => {
            for artifact in artifacts {
                println!("{}", artifact.image_ref);
            }
        }
        OutputFormat::Table => {
            let ctx = UiContext::detect();
            if artifacts.is_empty() {
                ui::remark(&ctx, "No artifacts recorded; run: kiln build");
                return Ok(());
            }
            ui::section(&ctx, &format!("{} artifacts", artifacts.len()));
            for artifact in artifacts {
                let mut detail = artifact.image_ref.clone();
                if let Some(runtime) = &artifact.runtime {
                    detail.push_str(&format!(
                        "  port {}, health {}",
                        runtime.port, runtime.health.path
                    ));
                    if let Some(user) = &runtime.user {
                        detail.push_str(&format!(", user {}", user));
                    }
                }
                ui::key_value(&ctx, &artifact.stage, &detail);
            }
        }
    }
    Ok(())
}
