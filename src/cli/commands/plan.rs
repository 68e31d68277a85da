//! Plan command - show the execution order for a stage

use crate::cli::args::PlanArgs;
use crate::config::PipelineConfig;
use crate::error::KilnResult;
use crate::stage::{StageGraph, StageKind};
use crate::ui::{self, UiContext};

/// Execute the plan command
pub async fn execute(args: PlanArgs, config: &PipelineConfig) -> KilnResult<()> {
    let ctx = UiContext::detect();
    let graph = StageGraph::from_config(config)?;
    let order = graph.execution_order(&args.stage)?;

    ui::section(&ctx, &format!("Plan for '{}'", args.stage));
    for (i, spec) in order.iter().enumerate() {
        let mut detail = format!("{} scope, base {}", spec.kind.scope(), spec.base);
        if let Some(parent) = &spec.parent {
            detail.push_str(&format!(", extends {}", parent));
        }
        if let Some(source) = &spec.copy_from {
            detail.push_str(&format!(", copies from {}", source));
        }
        if spec.kind == StageKind::Test {
            detail.push_str(", gated");
        }
        ui::key_value(&ctx, &format!("{}. {}", i + 1, spec.id), &detail);
    }
    Ok(())
}
