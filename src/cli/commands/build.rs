//! Build command - run the pipeline for the target stages

use crate::cli::args::BuildArgs;
use crate::config::PipelineConfig;
use crate::error::KilnResult;
use crate::pipeline::{BuildOptions, Pipeline, StageSummary};
use crate::stage::StageKind;
use crate::ui::{self, StageProgress, UiContext};
use std::path::Path;

/// Execute the build command
pub async fn execute(args: BuildArgs, config: &PipelineConfig, project_dir: &Path) -> KilnResult<()> {
    let ctx = UiContext::detect();
    ui::intro(&ctx, "Kiln Build");

    let options = BuildOptions {
        no_cache: args.no_cache,
        build_args: args.build_args.into_iter().collect(),
    };
    let pipeline = Pipeline::new(project_dir.to_path_buf(), config.clone(), options).await?;

    let targets: Vec<String> = if args.all {
        pipeline
            .graph()
            .stage_ids()
            .iter()
            .map(|s| s.to_string())
            .collect()
    } else {
        args.stages
    };

    let plan = pipeline.graph().execution_order_many(&targets)?;
    let plan_ids: Vec<&str> = plan.iter().map(|s| s.id.as_str()).collect();
    ui::step_info(&ctx, &format!("Plan: {}", plan_ids.join(" -> ")));

    let progress = StageProgress::new(&ctx, plan.len() as u64);
    let result = pipeline
        .run_with_progress(&targets, |summary| {
            progress.stage_done(&summary.stage, summary.fully_cached());
        })
        .await;
    progress.finish();

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            ui::outro_error(&ctx, "Build failed");
            return Err(e);
        }
    };

    for stage in &report.stages {
        ui::step_ok_detail(&ctx, &stage.stage, &summary_detail(stage));
    }

    if report.fully_cached() {
        ui::outro_success(&ctx, "Build complete (all stages from cache)");
    } else {
        ui::outro_success(&ctx, "Build complete");
    }
    Ok(())
}

fn summary_detail(stage: &StageSummary) -> String {
    let mut detail = format!(
        "{}/{} steps cached, {}",
        stage.cached_steps, stage.total_steps, stage.image_ref
    );
    if stage.kind == StageKind::Test {
        detail.push_str(&format!(", {} gates passed", stage.gates_passed));
    }
    detail
}
