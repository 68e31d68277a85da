//! Lock artifact parsing
//!
//! The lock artifact is a TOML manifest pinning exact dependency versions
//! with content checksums. It is the sole input to dependency resolution:
//! identical lock + scope must yield identical environments everywhere.

use crate::error::{KilnError, KilnResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Dependency scope a package belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageScope {
    /// Needed at runtime
    Production,
    /// Needed only for tests and development tooling
    Development,
}

impl fmt::Display for PackageScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Production => write!(f, "production"),
            Self::Development => write!(f, "development"),
        }
    }
}

/// One pinned dependency
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockedPackage {
    pub name: String,
    pub version: String,
    /// SHA256 hex digest of the package payload
    pub checksum: String,
    #[serde(default = "default_scope")]
    pub scope: PackageScope,
}

fn default_scope() -> PackageScope {
    PackageScope::Production
}

impl LockedPackage {
    /// The payload file name this package resolves to in an index
    pub fn payload_name(&self) -> String {
        format!("{}-{}.pkg", self.name, self.version)
    }
}

/// Parsed lock artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockManifest {
    #[serde(default)]
    pub version: u32,
    #[serde(default, rename = "package")]
    pub packages: Vec<LockedPackage>,
}

impl LockManifest {
    /// Parse a lock manifest from TOML text
    pub fn parse(content: &str) -> KilnResult<Self> {
        let manifest: LockManifest = toml::from_str(content)?;
        Ok(manifest)
    }

    /// Load a lock manifest from disk
    pub async fn from_file(path: &Path) -> KilnResult<Self> {
        if !path.exists() {
            return Err(KilnError::LockNotFound(path.to_path_buf()));
        }
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| KilnError::io(format!("reading lock artifact {}", path.display()), e))?;

        toml::from_str(&content).map_err(|e| KilnError::LockInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Packages visible to the given scope: production-only builds see
    /// production packages, full builds see everything.
    pub fn packages_for(&self, full: bool) -> Vec<&LockedPackage> {
        self.packages
            .iter()
            .filter(|p| full || p.scope == PackageScope::Production)
            .collect()
    }
}

/// SHA256 hex digest of a payload, as recorded in the lock checksum field
pub fn checksum_of(bytes: &[u8]) -> String {
    crate::input::hash_bytes(bytes)
}
