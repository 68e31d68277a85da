//! Pipeline orchestration
//!
//! Resolves the target stages to a dependency-ordered plan, then executes
//! it level by level: stages with no unmet dependencies run concurrently,
//! each against the shared layer cache. Test stages run their gates after
//! reaching ready; production stages are assembled from their referenced
//! stage instead of built. The first failure aborts the run with the
//! failing stage and step identified.

use crate::artifact::{Artifact, RuntimeMetadata};
use crate::assemble::ImageAssembler;
use crate::audit::BuildLog;
use crate::cache::LayerCache;
use crate::config::schema::ProjectConfig;
use crate::config::{ConfigManager, PipelineConfig};
use crate::error::{KilnError, KilnResult};
use crate::gate::GateRunner;
use crate::input;
use crate::installer::{DependencyInstaller, IndexInstaller};
use crate::stage::builder::{StageBuilder, StageReport, StageStatus, StepOutcome};
use crate::stage::graph::{StageGraph, StageKind, StageSpec};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info};

/// Per-invocation build options
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Disable layer cache reads and writes for this run
    pub no_cache: bool,
    /// Opaque key/value overrides passed through to the installer
    pub build_args: HashMap<String, String>,
}

/// One row of the pipeline result
#[derive(Debug, Clone)]
pub struct StageSummary {
    pub stage: String,
    pub kind: StageKind,
    pub cached_steps: usize,
    pub total_steps: usize,
    pub gates_passed: usize,
    pub image_ref: String,
}

impl StageSummary {
    pub fn fully_cached(&self) -> bool {
        self.total_steps > 0 && self.cached_steps == self.total_steps
    }
}

/// Result of a successful pipeline run, in execution order
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub stages: Vec<StageSummary>,
}

impl PipelineReport {
    /// True when every stage replayed entirely from cache
    pub fn fully_cached(&self) -> bool {
        !self.stages.is_empty() && self.stages.iter().all(|s| s.fully_cached())
    }
}

/// Executes a resolved stage graph against the layer cache
pub struct Pipeline {
    project_dir: PathBuf,
    work_dir: PathBuf,
    project: ProjectConfig,
    graph: StageGraph,
    cache: Arc<LayerCache>,
    cache_enabled: bool,
    installer: Arc<dyn DependencyInstaller>,
    installer_fingerprint: String,
    log: Arc<BuildLog>,
}

impl Pipeline {
    /// Resolve config and options into a runnable pipeline
    pub async fn new(
        project_dir: PathBuf,
        config: PipelineConfig,
        options: BuildOptions,
    ) -> KilnResult<Self> {
        let graph = StageGraph::from_config(&config)?;
        let work_dir = project_dir.join(".kiln");

        let cache_root = config
            .cache
            .dir
            .clone()
            .unwrap_or_else(ConfigManager::default_cache_dir);
        let cache = Arc::new(LayerCache::open(&cache_root).await?);
        let cache_enabled = config.cache.enabled && !options.no_cache;

        let index_dir = if config.registry.index.is_absolute() {
            config.registry.index.clone()
        } else {
            project_dir.join(&config.registry.index)
        };
        // Overrides may redirect the index; the fingerprint must reflect
        // the effective location so redirected runs never share keys.
        let effective_index = options
            .build_args
            .get("index")
            .map(PathBuf::from)
            .unwrap_or_else(|| index_dir.clone());
        let installer = IndexInstaller::new(index_dir).with_overrides(options.build_args);
        let installer_fingerprint = input::hash_bytes(
            format!(
                "{}\n{}",
                effective_index.display(),
                installer.overrides_hash()
            )
            .as_bytes(),
        );

        let log = Arc::new(BuildLog::new(&config, &work_dir));

        Ok(Self {
            project_dir,
            work_dir,
            project: config.project.clone(),
            graph,
            cache,
            cache_enabled,
            installer: Arc::new(installer),
            installer_fingerprint,
            log,
        })
    }

    pub fn graph(&self) -> &StageGraph {
        &self.graph
    }

    pub fn work_dir(&self) -> &PathBuf {
        &self.work_dir
    }

    /// Build the target stages and everything they depend on.
    ///
    /// Independent stages within the same dependency level run
    /// concurrently. The first failing stage aborts the run.
    pub async fn run(&self, targets: &[String]) -> KilnResult<PipelineReport> {
        self.run_with_progress(targets, |_| {}).await
    }

    /// Like `run`, invoking `on_stage` as each stage completes
    pub async fn run_with_progress<F>(
        &self,
        targets: &[String],
        on_stage: F,
    ) -> KilnResult<PipelineReport>
    where
        F: Fn(&StageSummary),
    {
        let plan: Vec<StageSpec> = self
            .graph
            .execution_order_many(targets)?
            .into_iter()
            .cloned()
            .collect();
        let plan_order: Vec<String> = plan.iter().map(|s| s.id.clone()).collect();

        info!("Pipeline plan: {}", plan_order.join(" -> "));
        self.log
            .log("pipeline.started", &serde_json::json!({ "plan": plan_order }))
            .await;

        let mut completed: HashMap<String, StageReport> = HashMap::new();
        let mut summaries: Vec<StageSummary> = Vec::new();

        for level in plan_levels(plan) {
            let mut set = JoinSet::new();
            for spec in level {
                let parent = spec
                    .dependency()
                    .and_then(|dep| completed.get(dep))
                    .cloned();
                set.spawn(run_stage(self.stage_context(spec, parent)));
            }

            while let Some(joined) = set.join_next().await {
                let result = joined
                    .map_err(|e| KilnError::Internal(format!("stage task failed: {}", e)))?;
                match result {
                    Ok((summary, report)) => {
                        on_stage(&summary);
                        completed.insert(summary.stage.clone(), report);
                        summaries.push(summary);
                    }
                    Err(e) => {
                        self.log
                            .log(
                                "pipeline.failed",
                                &serde_json::json!({ "error": e.to_string() }),
                            )
                            .await;
                        return Err(e);
                    }
                }
            }
        }

        summaries.sort_by_key(|s| plan_order.iter().position(|id| id == &s.stage));
        self.log
            .log(
                "pipeline.completed",
                &serde_json::json!({ "stages": summaries.len() }),
            )
            .await;
        Ok(PipelineReport { stages: summaries })
    }

    fn stage_context(&self, spec: StageSpec, parent: Option<StageReport>) -> StageContext {
        StageContext {
            spec,
            parent,
            project_dir: self.project_dir.clone(),
            work_dir: self.work_dir.clone(),
            project: self.project.clone(),
            cache: Arc::clone(&self.cache),
            cache_enabled: self.cache_enabled,
            installer: Arc::clone(&self.installer),
            installer_fingerprint: self.installer_fingerprint.clone(),
            log: Arc::clone(&self.log),
        }
    }
}

/// Everything one stage task needs, owned so tasks can run concurrently
struct StageContext {
    spec: StageSpec,
    parent: Option<StageReport>,
    project_dir: PathBuf,
    work_dir: PathBuf,
    project: ProjectConfig,
    cache: Arc<LayerCache>,
    cache_enabled: bool,
    installer: Arc<dyn DependencyInstaller>,
    installer_fingerprint: String,
    log: Arc<BuildLog>,
}

async fn run_stage(ctx: StageContext) -> KilnResult<(StageSummary, StageReport)> {
    ctx.log
        .log(
            "stage.started",
            &serde_json::json!({ "stage": ctx.spec.id, "kind": ctx.spec.kind.to_string() }),
        )
        .await;

    let result = execute_stage(&ctx).await;
    match &result {
        Ok((summary, _)) => {
            ctx.log
                .log(
                    "stage.ready",
                    &serde_json::json!({
                        "stage": summary.stage,
                        "cached_steps": summary.cached_steps,
                        "total_steps": summary.total_steps,
                        "image_ref": summary.image_ref,
                    }),
                )
                .await;
        }
        Err(e) => {
            ctx.log
                .log(
                    "stage.failed",
                    &serde_json::json!({ "stage": ctx.spec.id, "error": e.to_string() }),
                )
                .await;
        }
    }
    result
}

async fn execute_stage(ctx: &StageContext) -> KilnResult<(StageSummary, StageReport)> {
    if ctx.spec.kind == StageKind::Production {
        return assemble_stage(ctx).await;
    }

    let builder = StageBuilder::new(
        ctx.project_dir.clone(),
        ctx.work_dir.clone(),
        ctx.project.clone(),
        Arc::clone(&ctx.cache),
        ctx.cache_enabled,
        Arc::clone(&ctx.installer),
        ctx.installer_fingerprint.clone(),
    );
    let report = builder.build(&ctx.spec, ctx.parent.as_ref()).await?;

    let mut gates_passed = 0;
    if let Some(gates) = &ctx.spec.gates {
        debug!("Running gates for stage '{}'", ctx.spec.id);
        let gate_report = GateRunner::new(report.paths.clone())
            .run(gates)
            .await
            .map_err(|e| KilnError::step_failed(&ctx.spec.id, "gates", e))?;
        gates_passed = gate_report.passed.len();
        ctx.log
            .log(
                "stage.gates",
                &serde_json::json!({ "stage": ctx.spec.id, "passed": gates_passed }),
            )
            .await;
    }

    let final_key = report
        .final_key
        .clone()
        .ok_or_else(|| KilnError::Internal(format!("stage '{}' has no final key", ctx.spec.id)))?;
    let image_ref = format!(
        "kiln-{}-{}:{}",
        ctx.project.name,
        ctx.spec.id,
        final_key.short()
    );
    Artifact::new(ctx.spec.id.clone(), image_ref.clone(), final_key, None)
        .save(&ctx.work_dir)
        .await?;

    let summary = StageSummary {
        stage: ctx.spec.id.clone(),
        kind: ctx.spec.kind,
        cached_steps: report.cached_steps(),
        total_steps: report.steps.len(),
        gates_passed,
        image_ref,
    };
    Ok((summary, report))
}

async fn assemble_stage(ctx: &StageContext) -> KilnResult<(StageSummary, StageReport)> {
    let source = ctx.parent.as_ref().ok_or_else(|| {
        KilnError::Internal(format!(
            "production stage '{}' scheduled before its source",
            ctx.spec.id
        ))
    })?;

    let assembler = ImageAssembler::new(
        ctx.work_dir.clone(),
        ctx.project.name.clone(),
        Arc::clone(&ctx.cache),
        ctx.cache_enabled,
    );
    let assembly = assembler
        .assemble(&ctx.spec, source)
        .await
        .map_err(|e| KilnError::step_failed(&ctx.spec.id, "assemble", e))?;

    let runtime = ctx.spec.image.as_ref().map(|image| RuntimeMetadata {
        user: image.user.clone(),
        entrypoint: image.entrypoint.clone(),
        port: image.port,
        health: image.healthcheck.clone(),
    });
    Artifact::new(
        ctx.spec.id.clone(),
        assembly.image_ref.clone(),
        assembly.key.clone(),
        runtime,
    )
    .save(&ctx.work_dir)
    .await?;

    let report = StageReport {
        stage: ctx.spec.id.clone(),
        status: StageStatus::Ready,
        steps: vec![StepOutcome {
            step: "assemble",
            key: assembly.key.clone(),
            cache_hit: assembly.cache_hit,
        }],
        final_key: Some(assembly.key),
        paths: crate::stage::builder::StagePaths::new(&ctx.work_dir, &ctx.spec.id),
    };
    let summary = StageSummary {
        stage: ctx.spec.id.clone(),
        kind: ctx.spec.kind,
        cached_steps: if assembly.cache_hit { 1 } else { 0 },
        total_steps: 1,
        gates_passed: 0,
        image_ref: assembly.image_ref,
    };
    Ok((summary, report))
}

/// Group a dependency-ordered plan into levels that can run concurrently
fn plan_levels(plan: Vec<StageSpec>) -> Vec<Vec<StageSpec>> {
    let mut depth: HashMap<String, usize> = HashMap::new();
    let mut levels: Vec<Vec<StageSpec>> = Vec::new();

    for spec in plan {
        let d = spec
            .dependency()
            .and_then(|dep| depth.get(dep))
            .map(|d| d + 1)
            .unwrap_or(0);
        depth.insert(spec.id.clone(), d);
        if levels.len() <= d {
            levels.resize_with(d + 1, Vec::new);
        }
        levels[d].push(spec);
    }
    levels
}
