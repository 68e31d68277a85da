//! Stage DAG resolution
//!
//! Stages are declared in config and resolved into an explicit directed
//! graph before execution: tagged kind variants, parent references for
//! inheritance, and copy_from references for by-reference artifact reuse
//! (production). A build invocation names one target stage; the resolver
//! returns the target's full dependency chain in execution order.

use crate::config::schema::{GatesConfig, PipelineConfig, StageConfig, StageKindConfig};
use crate::error::{KilnError, KilnResult};
use crate::health::HealthCheckSpec;
use crate::installer::DependencyScope;
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Stage kind, driving dependency scope and gate/assembly behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Build,
    Test,
    Development,
    Production,
}

impl StageKind {
    /// Dependency scope installed for this kind
    pub fn scope(&self) -> DependencyScope {
        match self {
            Self::Build | Self::Production => DependencyScope::ProductionOnly,
            Self::Test | Self::Development => DependencyScope::Full,
        }
    }

    /// Default privilege policy; overridable per stage
    pub fn default_privileged(&self) -> bool {
        matches!(self, Self::Development)
    }

    fn from_config(kind: StageKindConfig) -> Self {
        match kind {
            StageKindConfig::Build => Self::Build,
            StageKindConfig::Test => Self::Test,
            StageKindConfig::Development => Self::Development,
            StageKindConfig::Production => Self::Production,
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Build => write!(f, "build"),
            Self::Test => write!(f, "test"),
            Self::Development => write!(f, "development"),
            Self::Production => write!(f, "production"),
        }
    }
}

/// Runtime image declaration for a production stage
#[derive(Debug, Clone)]
pub struct ImageSpec {
    /// Minimal runtime base, distinct from the builder's base
    pub base: String,
    /// Identity owning the image's filesystem paths
    pub user: Option<String>,
    /// Process entrypoint command
    pub entrypoint: Vec<String>,
    /// Exposed network port
    pub port: u16,
    /// Health probe contract recorded as artifact metadata
    pub healthcheck: HealthCheckSpec,
}

impl ImageSpec {
    /// Stable hash of the image declaration, for the assembly cache key
    pub fn descriptor_hash(&self) -> String {
        let descriptor = format!(
            "{}\n{}\n{}\n{}\n{:?}",
            self.base,
            self.user.as_deref().unwrap_or(""),
            self.entrypoint.join(" "),
            self.port,
            self.healthcheck
        );
        crate::input::hash_bytes(descriptor.as_bytes())
    }
}

/// A resolved stage descriptor
#[derive(Debug, Clone)]
pub struct StageSpec {
    pub id: String,
    pub kind: StageKind,
    pub base: String,
    /// Stage whose ready output this stage extends
    pub parent: Option<String>,
    /// Stage whose environment and source are copied by reference
    pub copy_from: Option<String>,
    pub privileged: bool,
    pub gates: Option<GatesConfig>,
    pub image: Option<ImageSpec>,
}

impl StageSpec {
    /// The stage this one depends on, if any
    pub fn dependency(&self) -> Option<&str> {
        self.parent.as_deref().or(self.copy_from.as_deref())
    }
}

/// Validated stage DAG
pub struct StageGraph {
    stages: BTreeMap<String, StageSpec>,
}

impl StageGraph {
    /// Resolve and validate the stage table from config
    pub fn from_config(config: &PipelineConfig) -> KilnResult<Self> {
        let mut stages = BTreeMap::new();

        for (id, decl) in &config.stages {
            validate_stage_id(id)?;
            stages.insert(id.clone(), resolve_stage(id, decl)?);
        }

        let graph = Self { stages };
        graph.validate_references()?;
        graph.validate_acyclic()?;
        Ok(graph)
    }

    /// Look up a stage by id
    pub fn get(&self, id: &str) -> KilnResult<&StageSpec> {
        self.stages
            .get(id)
            .ok_or_else(|| KilnError::StageNotFound(id.to_string()))
    }

    /// All stage ids in declaration order
    pub fn stage_ids(&self) -> Vec<&str> {
        self.stages.keys().map(String::as_str).collect()
    }

    /// The target stage's full dependency chain, dependencies first
    pub fn execution_order(&self, target: &str) -> KilnResult<Vec<&StageSpec>> {
        let mut order = Vec::new();
        let mut seen = HashSet::new();
        self.visit(target, &mut seen, &mut order)?;
        Ok(order)
    }

    /// Execution order for several targets, shared dependencies deduplicated
    pub fn execution_order_many(&self, targets: &[String]) -> KilnResult<Vec<&StageSpec>> {
        let mut order = Vec::new();
        let mut seen = HashSet::new();
        for target in targets {
            self.visit(target, &mut seen, &mut order)?;
        }
        Ok(order)
    }

    fn visit<'a>(
        &'a self,
        id: &str,
        seen: &mut HashSet<String>,
        order: &mut Vec<&'a StageSpec>,
    ) -> KilnResult<()> {
        if seen.contains(id) {
            return Ok(());
        }
        let spec = self.get(id)?;
        if let Some(dep) = spec.dependency() {
            self.visit(dep, seen, order)?;
        }
        seen.insert(id.to_string());
        order.push(spec);
        Ok(())
    }

    fn validate_references(&self) -> KilnResult<()> {
        for spec in self.stages.values() {
            if let Some(dep) = spec.dependency() {
                let Some(target) = self.stages.get(dep) else {
                    return Err(KilnError::StageInvalid {
                        stage: spec.id.clone(),
                        reason: format!("references unknown stage '{}'", dep),
                    });
                };
                // A runtime image must never carry dev-scope content
                if spec.kind == StageKind::Production
                    && target.kind.scope() == DependencyScope::Full
                {
                    return Err(KilnError::StageInvalid {
                        stage: spec.id.clone(),
                        reason: format!(
                            "copy_from targets '{}', which installs development dependencies",
                            dep
                        ),
                    });
                }
            }
        }
        Ok(())
    }

    fn validate_acyclic(&self) -> KilnResult<()> {
        for start in self.stages.keys() {
            let mut current = self.stages.get(start);
            let mut hops = 0;
            while let Some(spec) = current {
                hops += 1;
                if hops > self.stages.len() {
                    return Err(KilnError::StageCycle(start.clone()));
                }
                current = spec.dependency().and_then(|d| self.stages.get(d));
            }
        }
        Ok(())
    }
}

/// Stage ids become directory and image names; keep them path-safe.
fn validate_stage_id(id: &str) -> KilnResult<()> {
    if id.is_empty() {
        return Err(KilnError::User("Stage id cannot be empty".to_string()));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(KilnError::User(format!(
            "Invalid stage id '{}': must contain only alphanumeric characters, hyphens, or underscores",
            id
        )));
    }
    Ok(())
}

fn resolve_stage(id: &str, decl: &StageConfig) -> KilnResult<StageSpec> {
    let kind = StageKind::from_config(decl.kind);

    if decl.parent.is_some() && decl.copy_from.is_some() {
        return Err(KilnError::StageInvalid {
            stage: id.to_string(),
            reason: "declares both parent and copy_from".to_string(),
        });
    }
    if decl.gates.is_some() && kind != StageKind::Test {
        return Err(KilnError::StageInvalid {
            stage: id.to_string(),
            reason: "gates are only valid on test stages".to_string(),
        });
    }

    let image = if kind == StageKind::Production {
        if decl.parent.is_some() {
            return Err(KilnError::StageInvalid {
                stage: id.to_string(),
                reason: "production stages copy by reference; use copy_from, not parent"
                    .to_string(),
            });
        }
        if decl.copy_from.is_none() {
            return Err(KilnError::StageInvalid {
                stage: id.to_string(),
                reason: "production stages must declare copy_from".to_string(),
            });
        }
        let port = decl.port.ok_or_else(|| KilnError::StageInvalid {
            stage: id.to_string(),
            reason: "production stages must declare an exposed port".to_string(),
        })?;
        if decl.entrypoint.is_empty() {
            return Err(KilnError::StageInvalid {
                stage: id.to_string(),
                reason: "production stages must declare an entrypoint".to_string(),
            });
        }
        Some(ImageSpec {
            base: decl.base.clone(),
            user: decl.user.clone(),
            entrypoint: decl.entrypoint.clone(),
            port,
            healthcheck: decl.healthcheck.clone().unwrap_or_default(),
        })
    } else {
        None
    };

    Ok(StageSpec {
        id: id.to_string(),
        kind,
        base: decl.base.clone(),
        parent: decl.parent.clone(),
        copy_from: decl.copy_from.clone(),
        privileged: decl.privileged.unwrap_or_else(|| kind.default_privileged()),
        gates: decl.gates.clone(),
        image,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;

    fn default_graph() -> StageGraph {
        StageGraph::from_config(&PipelineConfig::default()).unwrap()
    }

    #[test]
    fn default_pipeline_resolves() {
        let graph = default_graph();
        assert_eq!(graph.stage_ids().len(), 4);
        assert_eq!(graph.get("builder").unwrap().kind, StageKind::Build);
    }

    #[test]
    fn scope_per_kind() {
        assert_eq!(StageKind::Build.scope(), DependencyScope::ProductionOnly);
        assert_eq!(StageKind::Production.scope(), DependencyScope::ProductionOnly);
        assert_eq!(StageKind::Test.scope(), DependencyScope::Full);
        assert_eq!(StageKind::Development.scope(), DependencyScope::Full);
    }

    #[test]
    fn privilege_defaults() {
        let graph = default_graph();
        assert!(graph.get("development").unwrap().privileged);
        assert!(!graph.get("production").unwrap().privileged);
        assert!(!graph.get("builder").unwrap().privileged);
    }

    #[test]
    fn execution_order_resolves_parent_chain() {
        let graph = default_graph();
        let order: Vec<_> = graph
            .execution_order("test")
            .unwrap()
            .iter()
            .map(|s| s.id.clone())
            .collect();
        assert_eq!(order, vec!["builder", "test"]);
    }

    #[test]
    fn execution_order_production_pulls_copy_from() {
        let graph = default_graph();
        let order: Vec<_> = graph
            .execution_order("production")
            .unwrap()
            .iter()
            .map(|s| s.id.clone())
            .collect();
        assert_eq!(order, vec!["builder", "production"]);
    }

    #[test]
    fn execution_order_many_dedupes_shared_parent() {
        let graph = default_graph();
        let order: Vec<_> = graph
            .execution_order_many(&["test".to_string(), "development".to_string()])
            .unwrap()
            .iter()
            .map(|s| s.id.clone())
            .collect();
        assert_eq!(order, vec!["builder", "test", "development"]);
    }

    #[test]
    fn unknown_target_errors() {
        let graph = default_graph();
        assert!(matches!(
            graph.execution_order("release"),
            Err(KilnError::StageNotFound(_))
        ));
    }

    #[test]
    fn unknown_parent_reference_errors() {
        let toml = r#"
            [stages.test]
            kind = "test"
            parent = "ghost"
        "#;
        let config: PipelineConfig = toml::from_str(toml).unwrap();
        assert!(matches!(
            StageGraph::from_config(&config),
            Err(KilnError::StageInvalid { .. })
        ));
    }

    #[test]
    fn cycle_detected() {
        let toml = r#"
            [stages.a]
            kind = "build"
            parent = "b"

            [stages.b]
            kind = "build"
            parent = "a"
        "#;
        let config: PipelineConfig = toml::from_str(toml).unwrap();
        assert!(matches!(
            StageGraph::from_config(&config),
            Err(KilnError::StageCycle(_))
        ));
    }

    #[test]
    fn production_requires_copy_from_port_entrypoint() {
        let toml = r#"
            [stages.production]
            kind = "production"
        "#;
        let config: PipelineConfig = toml::from_str(toml).unwrap();
        assert!(matches!(
            StageGraph::from_config(&config),
            Err(KilnError::StageInvalid { .. })
        ));
    }

    #[test]
    fn gates_rejected_outside_test_stage() {
        let toml = r#"
            [stages.builder]
            kind = "build"
            [stages.builder.gates]
            lint = "ruff check ."
        "#;
        let config: PipelineConfig = toml::from_str(toml).unwrap();
        assert!(matches!(
            StageGraph::from_config(&config),
            Err(KilnError::StageInvalid { .. })
        ));
    }

    #[test]
    fn production_cannot_copy_from_full_scope_stage() {
        let toml = r#"
            [stages.builder]
            kind = "build"

            [stages.test]
            kind = "test"
            parent = "builder"

            [stages.production]
            kind = "production"
            copy_from = "test"
            user = "app"
            entrypoint = ["python", "-m", "app"]
            port = 8000
        "#;
        let config: PipelineConfig = toml::from_str(toml).unwrap();
        assert!(matches!(
            StageGraph::from_config(&config),
            Err(KilnError::StageInvalid { .. })
        ));
    }

    #[test]
    fn invalid_stage_id_rejected() {
        let toml = r#"
            [stages."../evil"]
            kind = "build"
        "#;
        let config: PipelineConfig = toml::from_str(toml).unwrap();
        assert!(matches!(
            StageGraph::from_config(&config),
            Err(KilnError::User(_))
        ));
    }

    #[test]
    fn image_spec_hash_changes_with_port() {
        let mut spec = ImageSpec {
            base: "python:3.12-alpine".to_string(),
            user: Some("app".to_string()),
            entrypoint: vec!["python".to_string()],
            port: 8000,
            healthcheck: HealthCheckSpec::default(),
        };
        let before = spec.descriptor_hash();
        spec.port = 9000;
        assert_ne!(before, spec.descriptor_hash());
    }
}
