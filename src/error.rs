//! Error types for Kiln
//!
//! All modules use `KilnResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Kiln operations
pub type KilnResult<T> = Result<T, KilnError>;

/// All errors that can occur in Kiln
#[derive(Error, Debug)]
pub enum KilnError {
    // Input errors
    #[error("Declared input not found: {0}")]
    InputNotFound(PathBuf),

    #[error("Failed to copy input {path}: {reason}")]
    InputCopy { path: PathBuf, reason: String },

    // Lock artifact / dependency errors
    #[error("Lock artifact not found: {0}")]
    LockNotFound(PathBuf),

    #[error("Invalid lock artifact at {path}: {reason}")]
    LockInvalid { path: PathBuf, reason: String },

    #[error("Checksum mismatch for package {package} {version}: expected {expected}, got {actual}")]
    LockMismatch {
        package: String,
        version: String,
        expected: String,
        actual: String,
    },

    #[error("Failed to fetch package {package} {version}: {reason}")]
    Network {
        package: String,
        version: String,
        reason: String,
    },

    // Stage graph errors
    #[error("Stage not found: {0}")]
    StageNotFound(String),

    #[error("Stage dependency cycle involving: {0}")]
    StageCycle(String),

    #[error("Invalid stage declaration for '{stage}': {reason}")]
    StageInvalid { stage: String, reason: String },

    /// Wraps the first failing step's error; remaining steps are aborted.
    #[error("Stage '{stage}' failed at step '{step}': {source}")]
    StepFailed {
        stage: String,
        step: String,
        #[source]
        source: Box<KilnError>,
    },

    // Gate errors
    #[error("Gate '{check}' failed: {detail}")]
    GateFailed { check: String, detail: String },

    // Assembly errors
    #[error("Image assembly failed: {0}")]
    Assembly(String),

    // Configuration errors
    #[error("Pipeline config not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Process errors
    #[error("Command failed to start: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    User(String),
}

impl KilnError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create an input copy error
    pub fn input_copy(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InputCopy {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a gate failure for a named check
    pub fn gate(check: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::GateFailed {
            check: check.into(),
            detail: detail.into(),
        }
    }

    /// Wrap a step error with the stage and step that produced it
    pub fn step_failed(
        stage: impl Into<String>,
        step: impl Into<String>,
        source: KilnError,
    ) -> Self {
        Self::StepFailed {
            stage: stage.into(),
            step: step.into(),
            source: Box::new(source),
        }
    }

    /// Check if error is transient and worth an external re-trigger as-is
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } => true,
            Self::StepFailed { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::ConfigNotFound(_) => Some("Run: kiln init"),
            Self::LockMismatch { .. } => Some("Regenerate the lock artifact from trusted sources"),
            Self::Network { .. } => Some("Transient fetch failure - re-run the build"),
            Self::GateFailed { .. } => Some("Fix the reported item and re-run the build"),
            Self::StepFailed { source, .. } => source.hint(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = KilnError::StageNotFound("release".to_string());
        assert!(err.to_string().contains("release"));
    }

    #[test]
    fn error_hint() {
        let err = KilnError::ConfigNotFound(PathBuf::from("kiln.toml"));
        assert_eq!(err.hint(), Some("Run: kiln init"));
    }

    #[test]
    fn error_retryable() {
        let network = KilnError::Network {
            package: "flask".to_string(),
            version: "3.0.0".to_string(),
            reason: "payload missing from index".to_string(),
        };
        assert!(network.is_retryable());
        assert!(!KilnError::Assembly("chown failed".to_string()).is_retryable());
    }

    #[test]
    fn step_failed_propagates_retryable_and_hint() {
        let inner = KilnError::Network {
            package: "flask".to_string(),
            version: "3.0.0".to_string(),
            reason: "payload missing".to_string(),
        };
        let wrapped = KilnError::step_failed("builder", "install-deps", inner);
        assert!(wrapped.is_retryable());
        assert_eq!(
            wrapped.hint(),
            Some("Transient fetch failure - re-run the build")
        );
        assert!(wrapped.to_string().contains("install-deps"));
    }
}
