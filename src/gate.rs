//! Quality gates for test stages
//!
//! Gates run in fixed order against a ready test stage: lint, then
//! typecheck, then the test suite. The first failure stops the run, so a
//! lint error is reported without spending time on the suite behind it.

use crate::config::schema::GatesConfig;
use crate::error::{KilnError, KilnResult};
use crate::stage::builder::StagePaths;
use std::time::Instant;
use tracing::{debug, info};

/// Outcome of one executed gate
#[derive(Debug, Clone)]
pub struct GateOutcome {
    pub check: &'static str,
    pub command: String,
    pub duration_ms: u128,
}

/// All gates that ran, in order. Present only when every gate passed;
/// a failure surfaces as `GateFailed` instead.
#[derive(Debug, Clone, Default)]
pub struct GateReport {
    pub passed: Vec<GateOutcome>,
}

/// Runs gate commands inside a stage's materialized workspace
pub struct GateRunner {
    paths: StagePaths,
}

impl GateRunner {
    pub fn new(paths: StagePaths) -> Self {
        Self { paths }
    }

    /// Run the configured gates in order, stopping at the first failure.
    /// Unconfigured gates are skipped.
    pub async fn run(&self, gates: &GatesConfig) -> KilnResult<GateReport> {
        let checks: [(&'static str, Option<&String>); 3] = [
            ("lint", gates.lint.as_ref()),
            ("typecheck", gates.typecheck.as_ref()),
            ("test", gates.test.as_ref()),
        ];

        let mut report = GateReport::default();
        for (check, command) in checks {
            let Some(command) = command else {
                debug!("Gate '{}' not configured, skipping", check);
                continue;
            };
            let started = Instant::now();
            self.run_check(check, command).await?;
            let duration_ms = started.elapsed().as_millis();
            info!("Gate '{}' passed in {}ms", check, duration_ms);
            report.passed.push(GateOutcome {
                check,
                command: command.clone(),
                duration_ms,
            });
        }
        Ok(report)
    }

    async fn run_check(&self, check: &'static str, command: &str) -> KilnResult<()> {
        debug!("Running gate '{}': {}", check, command);
        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(self.paths.app())
            .env("KILN_ENV_DIR", self.paths.env())
            .output()
            .await
            .map_err(|e| KilnError::CommandFailed {
                command: command.to_string(),
                source: e,
            })?;

        if output.status.success() {
            return Ok(());
        }

        Err(KilnError::gate(check, failure_detail(&output)))
    }
}

/// Condense process output into the trailing lines that usually carry
/// the actual diagnostic.
fn failure_detail(output: &std::process::Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let combined = if stderr.trim().is_empty() {
        stdout
    } else {
        stderr
    };

    let tail: Vec<&str> = combined
        .lines()
        .filter(|l| !l.trim().is_empty())
        .collect();
    let tail = tail.iter().rev().take(5).rev().cloned().collect::<Vec<_>>();

    if tail.is_empty() {
        format!("exited with {}", output.status)
    } else {
        tail.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    fn paths(dir: &Path) -> StagePaths {
        let paths = StagePaths::new(dir, "test");
        std::fs::create_dir_all(paths.app()).unwrap();
        std::fs::create_dir_all(paths.env()).unwrap();
        paths
    }

    fn gates(lint: &str, typecheck: &str, test: &str) -> GatesConfig {
        GatesConfig {
            lint: Some(lint.to_string()),
            typecheck: Some(typecheck.to_string()),
            test: Some(test.to_string()),
        }
    }

    #[tokio::test]
    async fn all_gates_pass_in_order() {
        let temp = TempDir::new().unwrap();
        let runner = GateRunner::new(paths(temp.path()));

        let report = runner.run(&gates("true", "true", "true")).await.unwrap();

        let order: Vec<_> = report.passed.iter().map(|g| g.check).collect();
        assert_eq!(order, vec!["lint", "typecheck", "test"]);
    }

    #[tokio::test]
    async fn lint_failure_stops_before_typecheck() {
        let temp = TempDir::new().unwrap();
        let stage = paths(temp.path());
        let marker = temp.path().join("typecheck-ran");
        let runner = GateRunner::new(stage);

        let err = runner
            .run(&gates(
                "echo 'E501 line too long' >&2; exit 1",
                &format!("touch {}", marker.display()),
                "true",
            ))
            .await
            .unwrap_err();

        match err {
            KilnError::GateFailed { check, detail } => {
                assert_eq!(check, "lint");
                assert!(detail.contains("E501"));
            }
            other => panic!("expected GateFailed, got {:?}", other),
        }
        assert!(!marker.exists(), "typecheck must not run after lint fails");
    }

    #[tokio::test]
    async fn test_failure_reports_test_gate() {
        let temp = TempDir::new().unwrap();
        let runner = GateRunner::new(paths(temp.path()));

        let err = runner
            .run(&gates("true", "true", "echo '1 failed'; exit 1"))
            .await
            .unwrap_err();

        match err {
            KilnError::GateFailed { check, detail } => {
                assert_eq!(check, "test");
                assert!(detail.contains("1 failed"));
            }
            other => panic!("expected GateFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn unconfigured_gates_are_skipped() {
        let temp = TempDir::new().unwrap();
        let runner = GateRunner::new(paths(temp.path()));

        let report = runner
            .run(&GatesConfig {
                lint: None,
                typecheck: None,
                test: Some("true".to_string()),
            })
            .await
            .unwrap();

        assert_eq!(report.passed.len(), 1);
        assert_eq!(report.passed[0].check, "test");
    }

    #[tokio::test]
    async fn gates_run_in_the_stage_workspace() {
        let temp = TempDir::new().unwrap();
        let stage = paths(temp.path());
        std::fs::write(stage.app().join("conftest.py"), b"").unwrap();
        let runner = GateRunner::new(stage);

        runner
            .run(&gates(
                "test -f conftest.py",
                "test -d \"$KILN_ENV_DIR\"",
                "true",
            ))
            .await
            .unwrap();
    }
}
