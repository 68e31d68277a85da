//! Build event logging
//!
//! Writes JSON lines to `.kiln/events.log` inside the project work
//! directory. On by default so a failed run always leaves a trace of
//! which stage and step it reached.

use crate::config::PipelineConfig;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// File-based build event logger that appends JSON lines
pub struct BuildLog {
    enabled: bool,
    path: PathBuf,
}

impl BuildLog {
    /// Create a build event logger for a work directory
    pub fn new(config: &PipelineConfig, work_dir: &Path) -> Self {
        Self {
            enabled: config.general.event_log,
            path: work_dir.join("events.log"),
        }
    }

    /// Log a build event as a JSON line
    ///
    /// Silently drops events on IO failure — event logging must never
    /// block or fail the build itself.
    pub async fn log(&self, event: &str, data: &serde_json::Value) {
        if !self.enabled {
            return;
        }

        let entry = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "event": event,
            "data": data,
        });

        let mut line = match serde_json::to_string(&entry) {
            Ok(s) => s,
            Err(e) => {
                warn!("Failed to serialize build event: {}", e);
                return;
            }
        };
        line.push('\n');

        if let Err(e) = self.append(&line).await {
            warn!("Failed to write build event log: {}", e);
        }
    }

    async fn append(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
