//! Pipeline configuration schema
//!
//! The pipeline is declared in a project-local `kiln.toml`.

use crate::health::HealthCheckSpec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// General settings
    pub general: GeneralConfig,

    /// Project inputs
    pub project: ProjectConfig,

    /// Package index settings
    pub registry: RegistryConfig,

    /// Layer cache settings
    pub cache: CacheConfig,

    /// Stage declarations, keyed by stage id
    pub stages: BTreeMap<String, StageConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            project: ProjectConfig::default(),
            registry: RegistryConfig::default(),
            cache: CacheConfig::default(),
            stages: default_stages(),
        }
    }
}

/// The canonical four-stage pipeline: builder shared by test and
/// development, production assembled by reference from builder.
fn default_stages() -> BTreeMap<String, StageConfig> {
    let mut stages = BTreeMap::new();

    stages.insert(
        "builder".to_string(),
        StageConfig {
            kind: StageKindConfig::Build,
            base: "python:3.12-slim".to_string(),
            ..StageConfig::default()
        },
    );
    stages.insert(
        "test".to_string(),
        StageConfig {
            kind: StageKindConfig::Test,
            parent: Some("builder".to_string()),
            gates: Some(GatesConfig::default()),
            ..StageConfig::default()
        },
    );
    stages.insert(
        "development".to_string(),
        StageConfig {
            kind: StageKindConfig::Development,
            parent: Some("builder".to_string()),
            // Deliberate operational trade-off: dev runs privileged for
            // convenience, production never does. Configurable, not fixed.
            privileged: Some(true),
            ..StageConfig::default()
        },
    );
    stages.insert(
        "production".to_string(),
        StageConfig {
            kind: StageKindConfig::Production,
            base: "python:3.12-alpine".to_string(),
            copy_from: Some("builder".to_string()),
            user: Some("app".to_string()),
            entrypoint: vec!["python".to_string(), "-m".to_string(), "app".to_string()],
            port: Some(8000),
            healthcheck: Some(HealthCheckSpec::default()),
            ..StageConfig::default()
        },
    );

    stages
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,

    /// Enable the JSON-lines build event log
    pub event_log: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
            event_log: true,
        }
    }
}

/// Project inputs: what gets copied into stages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Project name, used in image references
    pub name: String,

    /// Lock artifact path, relative to the project directory
    pub lock: String,

    /// Source paths copied by every stage
    pub source: Vec<String>,

    /// Test/dev-only input paths (full-scope stages only)
    pub test_inputs: Vec<String>,

    /// Optional command run by the project-install step
    pub install_cmd: Option<String>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: "app".to_string(),
            lock: "deps.lock".to_string(),
            source: vec!["src".to_string()],
            test_inputs: vec!["tests".to_string()],
            install_cmd: None,
        }
    }
}

/// Package index settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Package index directory, relative to the project directory unless
    /// absolute. Overridable per invocation with `--build-arg index=...`.
    pub index: PathBuf,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            index: PathBuf::from("index"),
        }
    }
}

/// Layer cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable layer caching (default: true)
    pub enabled: bool,

    /// Cache directory override; defaults to the global state directory
    pub dir: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
        }
    }
}

/// Stage kind tag, mirrored by `stage::graph::StageKind`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKindConfig {
    Build,
    Test,
    Development,
    Production,
}

/// One stage declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    /// Stage kind
    pub kind: StageKindConfig,

    /// External base image reference
    pub base: String,

    /// Parent stage whose ready output this stage extends
    pub parent: Option<String>,

    /// Stage whose materialized environment and source are copied by
    /// reference (production only; no inheritance)
    pub copy_from: Option<String>,

    /// Run as a privileged identity. Defaults per kind: true for
    /// development, false otherwise.
    pub privileged: Option<bool>,

    /// Gate commands (test stages only)
    pub gates: Option<GatesConfig>,

    /// Non-privileged identity owning the runtime image paths
    pub user: Option<String>,

    /// Process entrypoint command (production)
    pub entrypoint: Vec<String>,

    /// Exposed network port (production)
    pub port: Option<u16>,

    /// Health probe contract (production)
    pub healthcheck: Option<HealthCheckSpec>,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            kind: StageKindConfig::Build,
            base: "python:3.12-slim".to_string(),
            parent: None,
            copy_from: None,
            privileged: None,
            gates: None,
            user: None,
            entrypoint: vec![],
            port: None,
            healthcheck: None,
        }
    }
}

/// Gate commands run in fixed order: lint, typecheck, test.
/// Cheap static checks run before the expensive suite.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatesConfig {
    pub lint: Option<String>,
    pub typecheck: Option<String>,
    pub test: Option<String>,
}

impl Default for GatesConfig {
    fn default() -> Self {
        Self {
            lint: Some("ruff check .".to_string()),
            typecheck: Some("mypy .".to_string()),
            test: Some("pytest -q".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = PipelineConfig::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(toml.contains("[project]"));
        assert!(toml.contains("[stages.builder]"));
        assert!(toml.contains("[stages.production]"));
    }

    #[test]
    fn config_deserializes_empty() {
        let config: PipelineConfig = toml::from_str("").unwrap();
        assert_eq!(config.project.lock, "deps.lock");
        assert_eq!(config.stages.len(), 4);
    }

    #[test]
    fn config_deserializes_partial() {
        let toml = r#"
            [project]
            name = "api"
        "#;
        let config: PipelineConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.project.name, "api");
        assert_eq!(config.project.source, vec!["src"]); // default preserved
    }

    #[test]
    fn default_stage_kinds() {
        let config = PipelineConfig::default();
        assert_eq!(config.stages["builder"].kind, StageKindConfig::Build);
        assert_eq!(
            config.stages["test"].parent.as_deref(),
            Some("builder")
        );
        assert_eq!(
            config.stages["production"].copy_from.as_deref(),
            Some("builder")
        );
        assert_eq!(config.stages["development"].privileged, Some(true));
    }

    #[test]
    fn explicit_stage_table_replaces_defaults() {
        let toml = r#"
            [stages.builder]
            kind = "build"
            base = "node:22-slim"
        "#;
        let config: PipelineConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.stages.len(), 1);
        assert_eq!(config.stages["builder"].base, "node:22-slim");
    }
}
