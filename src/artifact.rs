//! Build artifact records
//!
//! Every stage that reaches `Ready` leaves one artifact record under
//! `.kiln/artifacts/`. Production artifacts additionally carry the
//! runtime metadata an orchestrator consumes: user, entrypoint, exposed
//! port, and the health probe contract.

use crate::cache::CacheKey;
use crate::error::{KilnError, KilnResult};
use crate::health::HealthCheckSpec;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use uuid::Uuid;

/// Runtime surface of a production artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeMetadata {
    /// Non-privileged identity the image runs as
    pub user: Option<String>,

    /// Process entrypoint command
    pub entrypoint: Vec<String>,

    /// Single exposed port
    pub port: u16,

    /// Health probe parameters
    pub health: HealthCheckSpec,
}

/// Artifact record for one ready stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    /// Unique artifact ID
    pub id: Uuid,

    /// Stage that produced this artifact
    pub stage: String,

    /// Image reference, content-addressed by the stage's final key
    pub image_ref: String,

    /// Final cache key of the producing stage
    pub cache_key: CacheKey,

    /// When the artifact was recorded
    pub created_at: DateTime<Utc>,

    /// Runtime metadata, present for production artifacts only
    pub runtime: Option<RuntimeMetadata>,
}

impl Artifact {
    pub fn new(
        stage: String,
        image_ref: String,
        cache_key: CacheKey,
        runtime: Option<RuntimeMetadata>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            stage,
            image_ref,
            cache_key,
            created_at: Utc::now(),
            runtime,
        }
    }

    fn dir(work_dir: &Path) -> PathBuf {
        work_dir.join("artifacts")
    }

    /// Artifact record path for a stage
    pub fn file_path(work_dir: &Path, stage: &str) -> PathBuf {
        Self::dir(work_dir).join(format!("{}.json", stage))
    }

    /// Load a stage's artifact record, if one exists
    pub async fn load(work_dir: &Path, stage: &str) -> KilnResult<Option<Self>> {
        let path = Self::file_path(work_dir, stage);
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)
            .await
            .map_err(|e| KilnError::io(format!("reading artifact record {}", path.display()), e))?;

        let artifact: Artifact = serde_json::from_str(&content)?;
        Ok(Some(artifact))
    }

    /// Save the artifact record, replacing any previous one for the stage
    pub async fn save(&self, work_dir: &Path) -> KilnResult<()> {
        let path = Self::file_path(work_dir, &self.stage);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| KilnError::io("creating artifacts directory", e))?;
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(&path, content)
            .await
            .map_err(|e| KilnError::io(format!("writing artifact record {}", path.display()), e))?;

        Ok(())
    }

    /// All recorded artifacts, sorted by stage name
    pub async fn list(work_dir: &Path) -> KilnResult<Vec<Self>> {
        let dir = Self::dir(work_dir);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut artifacts = Vec::new();
        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| KilnError::io("reading artifacts directory", e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| KilnError::io("reading artifacts directory", e))?
        {
            if entry.path().extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = fs::read_to_string(entry.path())
                .await
                .map_err(|e| KilnError::io("reading artifact record", e))?;
            artifacts.push(serde_json::from_str::<Artifact>(&content)?);
        }

        artifacts.sort_by(|a, b| a.stage.cmp(&b.stage));
        Ok(artifacts)
    }
}
