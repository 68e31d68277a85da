//! Configuration management for Kiln

pub mod schema;

pub use schema::PipelineConfig;

use crate::error::{KilnError, KilnResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Project-local pipeline config file name
pub const CONFIG_FILE: &str = "kiln.toml";

/// Configuration manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a config manager for a project directory
    pub fn for_project(project_dir: &Path) -> Self {
        Self {
            config_path: project_dir.join(CONFIG_FILE),
        }
    }

    /// Create a config manager with an explicit config path
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the global state directory path
    pub fn state_dir() -> PathBuf {
        dirs::state_dir()
            .or_else(dirs::data_local_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("kiln")
    }

    /// Default layer cache directory (shared across projects)
    pub fn default_cache_dir() -> PathBuf {
        Self::state_dir().join("cache")
    }

    /// Walk up from `start` to find the nearest kiln.toml
    pub fn find_project_config(start: &Path) -> Option<PathBuf> {
        let mut current = Some(start);
        while let Some(dir) = current {
            let candidate = dir.join(CONFIG_FILE);
            if candidate.is_file() {
                return Some(candidate);
            }
            current = dir.parent();
        }
        None
    }

    /// Load the pipeline configuration. Missing config is an error: a
    /// build needs an explicit pipeline declaration.
    pub async fn load(&self) -> KilnResult<PipelineConfig> {
        if !self.config_path.exists() {
            return Err(KilnError::ConfigNotFound(self.config_path.clone()));
        }

        let content = fs::read_to_string(&self.config_path).await.map_err(|e| {
            KilnError::io(
                format!("reading config from {}", self.config_path.display()),
                e,
            )
        })?;

        debug!("Loaded config from {}", self.config_path.display());
        toml::from_str(&content).map_err(|e| KilnError::ConfigInvalid {
            path: self.config_path.clone(),
            reason: e.to_string(),
        })
    }

    /// Save configuration to file
    pub async fn save(&self, config: &PipelineConfig) -> KilnResult<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| KilnError::io("creating config directory", e))?;
        }

        let content = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, content).await.map_err(|e| {
            KilnError::io(
                format!("writing config to {}", self.config_path.display()),
                e,
            )
        })?;

        info!("Configuration saved to {}", self.config_path.display());
        Ok(())
    }

    /// Get the config file path
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}
