//! Stage builder state machine
//!
//! A stage advances through a fixed step sequence, deriving one chained
//! cache key per step. A hit restores the cached layer and skips the
//! work; a miss executes the step and publishes the resulting layer. The
//! first failing step aborts the stage; later steps never run.

use crate::cache::{CacheKey, LayerCache};
use crate::config::schema::ProjectConfig;
use crate::error::{KilnError, KilnResult};
use crate::input::{self, InputSet};
use crate::installer::DependencyInstaller;
use crate::lock::LockManifest;
use crate::stage::graph::{StageKind, StageSpec};
use crate::stage::step::Step;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Observable stage state. `Failed` is terminal; every other non-`Ready`
/// state names the step currently executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    Pending,
    CopyingInputs,
    InstallingDeps,
    CopyingSource,
    InstallingProject,
    Ready,
    Failed,
}

impl StageStatus {
    fn for_step(step: Step) -> Self {
        match step {
            Step::CopyInputs => Self::CopyingInputs,
            Step::InstallDeps => Self::InstallingDeps,
            Step::CopySource => Self::CopyingSource,
            Step::InstallProject => Self::InstallingProject,
        }
    }
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::CopyingInputs => "copying-inputs",
            Self::InstallingDeps => "installing-deps",
            Self::CopyingSource => "copying-source",
            Self::InstallingProject => "installing-project",
            Self::Ready => "ready",
            Self::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// On-disk layout of one materialized stage
#[derive(Debug, Clone)]
pub struct StagePaths {
    root: PathBuf,
}

impl StagePaths {
    pub fn new(work_dir: &Path, stage: &str) -> Self {
        Self {
            root: work_dir.join("stages").join(stage),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Workspace holding copied inputs and source, project-relative
    pub fn app(&self) -> PathBuf {
        self.root.join("app")
    }

    /// Materialized dependency environment
    pub fn env(&self) -> PathBuf {
        self.root.join("env")
    }
}

/// Result of one step: its derived key and whether the cache supplied it
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub step: &'static str,
    pub key: CacheKey,
    pub cache_hit: bool,
}

/// Result of building one stage to `Ready`
#[derive(Debug, Clone)]
pub struct StageReport {
    pub stage: String,
    pub status: StageStatus,
    pub steps: Vec<StepOutcome>,
    /// Key of the last completed step; seeds dependent stages' chains
    pub final_key: Option<CacheKey>,
    pub paths: StagePaths,
}

impl StageReport {
    /// True when every step replayed from cache
    pub fn fully_cached(&self) -> bool {
        !self.steps.is_empty() && self.steps.iter().all(|s| s.cache_hit)
    }

    pub fn cached_steps(&self) -> usize {
        self.steps.iter().filter(|s| s.cache_hit).count()
    }
}

/// Executes the step sequence for one stage
pub struct StageBuilder {
    project_dir: PathBuf,
    work_dir: PathBuf,
    project: ProjectConfig,
    cache: Arc<LayerCache>,
    cache_enabled: bool,
    installer: Arc<dyn DependencyInstaller>,
    /// Identifies the installer configuration (index location and
    /// invocation overrides) inside install-deps cache keys
    installer_fingerprint: String,
}

impl StageBuilder {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        project_dir: PathBuf,
        work_dir: PathBuf,
        project: ProjectConfig,
        cache: Arc<LayerCache>,
        cache_enabled: bool,
        installer: Arc<dyn DependencyInstaller>,
        installer_fingerprint: String,
    ) -> Self {
        Self {
            project_dir,
            work_dir,
            project,
            cache,
            cache_enabled,
            installer,
            installer_fingerprint,
        }
    }

    /// Build `spec` to `Ready`, replaying cached layers where keys match.
    ///
    /// `parent` must already be `Ready`; its final key seeds this stage's
    /// key chain and its environment is copied as the install-deps base.
    pub async fn build(
        &self,
        spec: &StageSpec,
        parent: Option<&StageReport>,
    ) -> KilnResult<StageReport> {
        if spec.kind == StageKind::Production {
            return Err(KilnError::Internal(format!(
                "stage '{}' is production; it is assembled, not built",
                spec.id
            )));
        }

        let paths = StagePaths::new(&self.work_dir, &spec.id);
        self.reset_stage_dir(&paths).await?;

        let mut report = StageReport {
            stage: spec.id.clone(),
            status: StageStatus::Pending,
            steps: Vec::new(),
            final_key: parent.and_then(|p| p.final_key.clone()),
            paths: paths.clone(),
        };

        info!("Building stage '{}' ({})", spec.id, spec.kind);
        for step in Step::SEQUENCE {
            report.status = StageStatus::for_step(step);
            debug!("Stage '{}' -> {}", spec.id, report.status);

            let outcome = self
                .run_step(spec, parent, &paths, step, report.final_key.as_ref())
                .await
                .map_err(|e| KilnError::step_failed(&spec.id, step.name(), e))?;

            report.final_key = Some(outcome.key.clone());
            report.steps.push(outcome);
        }

        report.status = StageStatus::Ready;
        info!(
            "Stage '{}' ready ({}/{} steps from cache)",
            spec.id,
            report.cached_steps(),
            report.steps.len()
        );
        Ok(report)
    }

    /// Each run materializes the stage from scratch, so stale files from
    /// a previous run can never leak into layers or gates.
    async fn reset_stage_dir(&self, paths: &StagePaths) -> KilnResult<()> {
        if paths.root().exists() {
            tokio::fs::remove_dir_all(paths.root())
                .await
                .map_err(|e| KilnError::io("clearing stage directory", e))?;
        }
        tokio::fs::create_dir_all(paths.app())
            .await
            .map_err(|e| KilnError::io("creating stage workspace", e))?;
        tokio::fs::create_dir_all(paths.env())
            .await
            .map_err(|e| KilnError::io("creating stage environment", e))?;
        Ok(())
    }

    async fn run_step(
        &self,
        spec: &StageSpec,
        parent: Option<&StageReport>,
        paths: &StagePaths,
        step: Step,
        prev: Option<&CacheKey>,
    ) -> KilnResult<StepOutcome> {
        let key = self.derive_key(spec, step, prev).await?;
        let target = self.target_dir(paths, step);

        if self.cache_enabled {
            if let Some(entry) = self.cache.get(&key) {
                debug!(
                    "Cache hit for {}/{} ({})",
                    spec.id,
                    step,
                    entry.key.short()
                );
                input::copy_tree(&self.cache.layer_dir(&key), &target).await?;
                return Ok(StepOutcome {
                    step: step.name(),
                    key,
                    cache_hit: true,
                });
            }
        }

        self.execute_step(spec, parent, paths, step).await?;

        if self.cache_enabled {
            let staged = self.cache.new_staging_dir().await?;
            input::copy_tree(&target, &staged).await?;
            self.cache
                .put(key.clone(), &spec.id, step.name(), &staged)
                .await?;
        }

        Ok(StepOutcome {
            step: step.name(),
            key,
            cache_hit: false,
        })
    }

    /// Chain the step's key from the previous key plus everything the
    /// step's output depends on.
    async fn derive_key(
        &self,
        spec: &StageSpec,
        step: Step,
        prev: Option<&CacheKey>,
    ) -> KilnResult<CacheKey> {
        let (descriptor, hashes) = match step {
            Step::CopyInputs => {
                let inputs = self.gather_inputs(spec).await?;
                (
                    format!("copy-inputs base={}", spec.base),
                    vec![inputs.combined_hash()],
                )
            }
            Step::InstallDeps => (
                format!(
                    "install-deps scope={} installer={}",
                    spec.kind.scope(),
                    self.installer_fingerprint
                ),
                vec![],
            ),
            Step::CopySource => {
                let source = InputSet::gather(&self.project_dir, &self.project.source).await?;
                ("copy-source".to_string(), vec![source.combined_hash()])
            }
            Step::InstallProject => (
                format!(
                    "install-project cmd={}",
                    self.project.install_cmd.as_deref().unwrap_or("")
                ),
                vec![],
            ),
        };
        Ok(CacheKey::derive(&spec.id, prev, &descriptor, &hashes))
    }

    /// The directory a step writes, and therefore what its layer snapshots
    fn target_dir(&self, paths: &StagePaths, step: Step) -> PathBuf {
        match step {
            Step::CopyInputs | Step::CopySource => paths.app(),
            Step::InstallDeps | Step::InstallProject => paths.env(),
        }
    }

    /// Lock artifact always; test inputs only for full-scope stages, so
    /// production-scoped workspaces never see them.
    async fn gather_inputs(&self, spec: &StageSpec) -> KilnResult<InputSet> {
        let mut declared = vec![self.project.lock.clone()];
        if spec.kind.scope().includes_dev() {
            declared.extend(self.project.test_inputs.iter().cloned());
        }
        InputSet::gather(&self.project_dir, &declared).await
    }

    async fn execute_step(
        &self,
        spec: &StageSpec,
        parent: Option<&StageReport>,
        paths: &StagePaths,
        step: Step,
    ) -> KilnResult<()> {
        match step {
            Step::CopyInputs => {
                let inputs = self.gather_inputs(spec).await?;
                inputs.copy_into(&self.project_dir, &paths.app()).await
            }
            Step::InstallDeps => {
                if let Some(parent) = parent {
                    // Inherit the parent's environment as the base layer
                    input::copy_tree(&parent.paths.env(), &paths.env()).await?;
                }
                let lock_path = paths.app().join(&self.project.lock);
                let lock = LockManifest::from_file(&lock_path).await?;
                self.installer
                    .install(&lock, spec.kind.scope(), &paths.env())
                    .await?;
                Ok(())
            }
            Step::CopySource => {
                let source = InputSet::gather(&self.project_dir, &self.project.source).await?;
                source.copy_into(&self.project_dir, &paths.app()).await
            }
            Step::InstallProject => self.install_project(paths).await,
        }
    }

    /// Install the project itself into the environment: source tree under
    /// `env/app`, a project manifest, and the optional install command.
    async fn install_project(&self, paths: &StagePaths) -> KilnResult<()> {
        let app_dest = paths.env().join("app");
        input::copy_tree(&paths.app(), &app_dest).await?;

        let manifest = serde_json::to_string_pretty(&serde_json::json!({
            "name": self.project.name,
        }))?;
        tokio::fs::write(paths.env().join("project.json"), manifest)
            .await
            .map_err(|e| KilnError::io("writing project manifest", e))?;

        if let Some(cmd) = &self.project.install_cmd {
            let output = tokio::process::Command::new("sh")
                .arg("-c")
                .arg(cmd)
                .current_dir(paths.app())
                .env("KILN_ENV_DIR", paths.env())
                .output()
                .await
                .map_err(|e| KilnError::CommandFailed {
                    command: cmd.clone(),
                    source: e,
                })?;
            if !output.status.success() {
                return Err(KilnError::User(format!(
                    "Install command '{}' exited with {}",
                    cmd, output.status
                )));
            }
        }
        Ok(())
    }
}
