//! Directory operations

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, warn};

use crate::errors::DeployError;

/// A directory wrapper with path
#[derive(Debug, Clone)]
pub struct Dir {
    path: PathBuf,
}

impl Dir {
    /// Create a new directory reference
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the directory path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the directory exists
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Create the directory (and parents)
    pub async fn create(&self) -> Result<(), DeployError> {
        fs::create_dir_all(&self.path).await?;
        Ok(())
    }

    /// List files in the directory
    pub async fn list_files(&self) -> Result<Vec<PathBuf>, DeployError> {
        let mut files = Vec::new();
        if !self.exists().await {
            return Ok(files);
        }

        let mut entries = fs::read_dir(&self.path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.is_file() {
                files.push(path);
            }
        }

        files.sort();
        Ok(files)
    }

    /// Get a file within this directory
    pub fn file(&self, name: &str) -> crate::filesys::file::File {
        crate::filesys::file::File::new(self.path.join(name))
    }
}

/// A scratch directory owned by exactly one build.
///
/// The directory is created under a fresh unique id and removed when the
/// guard is dropped, whichever way the build ends.
#[derive(Debug)]
pub struct StagingDir {
    path: PathBuf,
}

impl StagingDir {
    /// Create a staging directory with a new unique id under `base`
    pub fn create(base: &Path) -> Result<Self, DeployError> {
        Self::create_with_id(base, &crate::utils::generate_uuid())
    }

    /// Create a staging directory with a given id; fails if it already exists
    pub fn create_with_id(base: &Path, id: &str) -> Result<Self, DeployError> {
        std::fs::create_dir_all(base)?;
        let path = base.join(format!("staging-{}", id));

        std::fs::create_dir(&path).map_err(|e| {
            DeployError::FilesystemError(format!(
                "Unable to create staging directory {}: {}",
                path.display(),
                e
            ))
        })?;

        debug!("Created staging directory {}", path.display());
        Ok(Self { path })
    }

    /// Get the directory path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => debug!("Removed staging directory {}", self.path.display()),
            Err(e) => warn!(
                "Unable to delete temporary path {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}
