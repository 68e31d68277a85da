//! Runtime health-check contract
//!
//! The pipeline records probe parameters as artifact metadata and renders
//! them into the generated Containerfile; it never executes the probe at
//! build time. An external orchestrator polls the probe after the grace
//! period and marks the instance unhealthy after `failure_threshold`
//! consecutive failures.

use serde::{Deserialize, Serialize};

/// Health probe parameters for the production artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckSpec {
    /// Probe path served by the running application
    pub path: String,
    /// Seconds between probes
    pub interval_secs: u32,
    /// Seconds before a single probe counts as failed
    pub timeout_secs: u32,
    /// Seconds after start before probing begins
    pub grace_period_secs: u32,
    /// Consecutive failures before the instance is unhealthy
    pub failure_threshold: u32,
}

impl Default for HealthCheckSpec {
    fn default() -> Self {
        Self {
            path: "/health".to_string(),
            interval_secs: 30,
            timeout_secs: 5,
            grace_period_secs: 10,
            failure_threshold: 3,
        }
    }
}

impl HealthCheckSpec {
    /// Probe address on the artifact's exposed port
    pub fn probe_address(&self, port: u16) -> String {
        format!("http://localhost:{}{}", port, self.path)
    }

    /// Render the HEALTHCHECK instruction for the generated Containerfile
    pub fn containerfile_instruction(&self, port: u16) -> String {
        format!(
            "HEALTHCHECK --interval={}s --timeout={}s --start-period={}s --retries={} \\\n  CMD curl -fsS {} || exit 1",
            self.interval_secs,
            self.timeout_secs,
            self.grace_period_secs,
            self.failure_threshold,
            self.probe_address(port)
        )
    }
}
