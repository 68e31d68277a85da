//! Declared build inputs and content hashing
//!
//! A stage declares the files it consumes (lock artifact, source tree,
//! test scripts). Each input is content-addressed with SHA256 so cache
//! keys are stable for identical content regardless of collection order.

use crate::error::{KilnError, KilnResult};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::debug;

/// A single declared input: project-relative path plus content hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildInput {
    /// Path relative to the project directory
    pub path: PathBuf,
    /// SHA256 hex digest of the file contents
    pub hash: String,
}

/// An immutable set of declared inputs for one step
#[derive(Debug, Clone, Default)]
pub struct InputSet {
    inputs: Vec<BuildInput>,
}

impl InputSet {
    /// Gather the declared paths from a project directory.
    ///
    /// Each declared path may be a file or a directory tree; directories
    /// are walked recursively. A missing declared path is an error, not
    /// an empty set.
    pub async fn gather(project_dir: &Path, declared: &[String]) -> KilnResult<Self> {
        let mut inputs = Vec::new();

        for decl in declared {
            let abs = project_dir.join(decl);
            if !abs.exists() {
                return Err(KilnError::InputNotFound(abs));
            }
            collect(project_dir, &abs, &mut inputs).await?;
        }

        // Sort by path so the combined hash is order-independent
        inputs.sort_by(|a, b| a.path.cmp(&b.path));
        debug!("Gathered {} inputs", inputs.len());

        Ok(Self { inputs })
    }

    /// The individual inputs, sorted by path
    pub fn inputs(&self) -> &[BuildInput] {
        &self.inputs
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Combined hash over all (path, hash) pairs in sorted order
    pub fn combined_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for input in &self.inputs {
            hasher.update(input.path.to_string_lossy().as_bytes());
            hasher.update(input.hash.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Copy every input into `dest`, preserving project-relative paths
    pub async fn copy_into(&self, project_dir: &Path, dest: &Path) -> KilnResult<()> {
        for input in &self.inputs {
            let from = project_dir.join(&input.path);
            let to = dest.join(&input.path);

            if let Some(parent) = to.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| KilnError::input_copy(&input.path, e.to_string()))?;
            }
            tokio::fs::copy(&from, &to)
                .await
                .map_err(|e| KilnError::input_copy(&input.path, e.to_string()))?;
        }
        Ok(())
    }
}

/// Recursively collect files under `path` into `inputs`
async fn collect(project_dir: &Path, path: &Path, inputs: &mut Vec<BuildInput>) -> KilnResult<()> {
    let meta = tokio::fs::metadata(path)
        .await
        .map_err(|e| KilnError::input_copy(path, e.to_string()))?;

    if meta.is_file() {
        let rel = path
            .strip_prefix(project_dir)
            .map_err(|_| KilnError::input_copy(path, "input escapes project directory"))?
            .to_path_buf();
        let hash = hash_file(path).await?;
        inputs.push(BuildInput { path: rel, hash });
        return Ok(());
    }

    let mut entries = tokio::fs::read_dir(path)
        .await
        .map_err(|e| KilnError::input_copy(path, e.to_string()))?;

    let mut children = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| KilnError::input_copy(path, e.to_string()))?
    {
        children.push(entry.path());
    }

    for child in children {
        Box::pin(collect(project_dir, &child, inputs)).await?;
    }
    Ok(())
}

/// Recursively copy a directory tree, creating `dest` if needed.
/// Existing files in `dest` are overwritten.
pub async fn copy_tree(src: &Path, dest: &Path) -> KilnResult<()> {
    tokio::fs::create_dir_all(dest)
        .await
        .map_err(|e| KilnError::io(format!("creating {}", dest.display()), e))?;

    let mut entries = tokio::fs::read_dir(src)
        .await
        .map_err(|e| KilnError::io(format!("reading {}", src.display()), e))?;

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| KilnError::io(format!("reading {}", src.display()), e))?
    {
        let from = entry.path();
        let to = dest.join(entry.file_name());
        let meta = tokio::fs::metadata(&from)
            .await
            .map_err(|e| KilnError::io(format!("inspecting {}", from.display()), e))?;

        if meta.is_dir() {
            Box::pin(copy_tree(&from, &to)).await?;
        } else {
            tokio::fs::copy(&from, &to)
                .await
                .map_err(|e| KilnError::io(format!("copying {}", from.display()), e))?;
        }
    }
    Ok(())
}

/// Hash a file's contents with SHA256, returning the full hex digest
pub async fn hash_file(path: &Path) -> KilnResult<String> {
    let contents = tokio::fs::read(path)
        .await
        .map_err(|e| KilnError::input_copy(path, e.to_string()))?;
    Ok(hash_bytes(&contents))
}

/// SHA256 hex digest of a byte slice
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
