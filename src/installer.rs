//! Dependency installation
//!
//! Resolves a lock artifact into a materialized environment directory.
//! The resolver itself is a black box behind the `DependencyInstaller`
//! trait; the shipped implementation fetches pinned payloads from a
//! package index directory and verifies them against the lock checksums.

use crate::error::{KilnError, KilnResult};
use crate::lock::{LockManifest, LockedPackage};
use async_trait::async_trait;
use futures_util::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Which slice of the lock artifact to materialize
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DependencyScope {
    /// Runtime dependencies only (builder and production)
    ProductionOnly,
    /// Runtime plus development dependencies (test and development)
    Full,
}

impl DependencyScope {
    pub fn includes_dev(&self) -> bool {
        matches!(self, Self::Full)
    }
}

impl fmt::Display for DependencyScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProductionOnly => write!(f, "production-only"),
            Self::Full => write!(f, "full"),
        }
    }
}

/// A materialized, deterministic dependency set
///
/// Written as `env.json` inside the stage's environment directory.
/// Resolved versions use an ordered map so serialization is stable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Environment {
    pub scope: DependencyScope,
    /// Resolved package name -> version
    pub packages: BTreeMap<String, String>,
}

impl Environment {
    pub const MANIFEST: &'static str = "env.json";

    /// Load from an environment directory
    pub async fn load(env_dir: &Path) -> KilnResult<Self> {
        let path = env_dir.join(Self::MANIFEST);
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| KilnError::io(format!("reading environment manifest {}", path.display()), e))?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save into an environment directory
    pub async fn save(&self, env_dir: &Path) -> KilnResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(env_dir.join(Self::MANIFEST), content)
            .await
            .map_err(|e| KilnError::io("writing environment manifest", e))?;
        Ok(())
    }
}

/// Black-box dependency resolver invoked once per stage
#[async_trait]
pub trait DependencyInstaller: Send + Sync {
    /// Materialize the locked dependency set for `scope` into `env_dir`.
    ///
    /// Must only write inside `env_dir` (never a sibling stage's
    /// environment) and must be deterministic: identical lock + scope
    /// yields an identical resolved set, or fails identically.
    async fn install(
        &self,
        lock: &LockManifest,
        scope: DependencyScope,
        env_dir: &Path,
    ) -> KilnResult<Environment>;
}

/// Installer backed by a directory of pinned package payloads
///
/// The index holds one `<name>-<version>.pkg` payload per pinned package.
/// A missing payload is a transient fetch failure (`Network`, retryable by
/// an external re-trigger); a payload that does not match its lock
/// checksum is a deterministic integrity failure (`LockMismatch`).
pub struct IndexInstaller {
    index_dir: PathBuf,
    overrides: HashMap<String, String>,
}

impl IndexInstaller {
    /// Directory packages are materialized into, under the environment
    pub const PACKAGES_DIR: &'static str = "packages";

    pub fn new(index_dir: PathBuf) -> Self {
        Self {
            index_dir,
            overrides: HashMap::new(),
        }
    }

    /// Apply opaque key/value overrides from the build invocation.
    ///
    /// The `index` key redirects resolution to an alternate package index;
    /// unknown keys are carried along untouched.
    pub fn with_overrides(mut self, overrides: HashMap<String, String>) -> Self {
        if let Some(index) = overrides.get("index") {
            self.index_dir = PathBuf::from(index);
        }
        self.overrides = overrides;
        self
    }

    /// Hash of the overrides, for inclusion in cache keys
    pub fn overrides_hash(&self) -> String {
        let mut pairs: Vec<_> = self.overrides.iter().collect();
        pairs.sort();
        let joined = pairs
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("\n");
        crate::input::hash_bytes(joined.as_bytes())
    }

    async fn fetch(&self, package: &LockedPackage, env_dir: &Path) -> KilnResult<()> {
        let payload = self.index_dir.join(package.payload_name());
        let dest_dir = env_dir.join(Self::PACKAGES_DIR);
        let dest = dest_dir.join(package.payload_name());

        // Already materialized (inherited from a parent stage's base)
        if dest.exists() {
            return Ok(());
        }

        let bytes = tokio::fs::read(&payload).await.map_err(|e| KilnError::Network {
            package: package.name.clone(),
            version: package.version.clone(),
            reason: format!("{}: {}", payload.display(), e),
        })?;

        let actual = crate::input::hash_bytes(&bytes);
        if actual != package.checksum {
            return Err(KilnError::LockMismatch {
                package: package.name.clone(),
                version: package.version.clone(),
                expected: package.checksum.clone(),
                actual,
            });
        }

        tokio::fs::create_dir_all(&dest_dir)
            .await
            .map_err(|e| KilnError::io("creating packages directory", e))?;
        tokio::fs::write(&dest, bytes)
            .await
            .map_err(|e| KilnError::io(format!("materializing {}", package.payload_name()), e))?;

        debug!("Materialized {} {}", package.name, package.version);
        Ok(())
    }
}

#[async_trait]
impl DependencyInstaller for IndexInstaller {
    async fn install(
        &self,
        lock: &LockManifest,
        scope: DependencyScope,
        env_dir: &Path,
    ) -> KilnResult<Environment> {
        tokio::fs::create_dir_all(env_dir)
            .await
            .map_err(|e| KilnError::io("creating environment directory", e))?;

        let selected = lock.packages_for(scope.includes_dev());
        try_join_all(selected.iter().map(|p| self.fetch(p, env_dir))).await?;
        let packages: BTreeMap<String, String> = selected
            .iter()
            .map(|p| (p.name.clone(), p.version.clone()))
            .collect();

        let env = Environment { scope, packages };
        env.save(env_dir).await?;
        debug!("Installed {} packages ({})", env.packages.len(), scope);
        Ok(env)
    }
}
