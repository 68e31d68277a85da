//! Cache key derivation
//!
//! Layer keys form a hash chain: each step's key covers the previous
//! step's key, the step descriptor, and the step's declared input hashes.
//! A changed early input therefore invalidates that layer and every layer
//! after it while leaving earlier layers valid.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A content-addressed layer key (SHA256 hex)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for one step.
    ///
    /// `previous` is the prior layer in the chain: the preceding step of
    /// this stage, or the parent stage's final layer for the first step.
    pub fn derive(
        stage_id: &str,
        previous: Option<&CacheKey>,
        step_descriptor: &str,
        input_hashes: &[String],
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(stage_id.as_bytes());
        if let Some(prev) = previous {
            hasher.update(prev.0.as_bytes());
        }
        hasher.update(step_descriptor.as_bytes());
        for hash in input_hashes {
            hasher.update(hash.as_bytes());
        }
        Self(hex::encode(hasher.finalize()))
    }

    /// Full hex digest
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, used in image references
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
