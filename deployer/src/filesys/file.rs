//! File operations

use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::errors::DeployError;

/// A file wrapper with path
#[derive(Debug, Clone)]
pub struct File {
    path: PathBuf,
}

impl File {
    /// Create a new file reference
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the file exists
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path).await.is_ok()
    }

    /// Read file contents as string
    pub async fn read_string(&self) -> Result<String, DeployError> {
        Ok(fs::read_to_string(&self.path).await?)
    }

    /// Read file as JSON
    pub async fn read_json<T: DeserializeOwned>(&self) -> Result<T, DeployError> {
        let contents = self.read_string().await?;
        let value = serde_json::from_str(&contents)?;
        Ok(value)
    }

    /// Write JSON to file, replacing it atomically
    pub async fn write_json<T: Serialize>(&self, value: &T) -> Result<(), DeployError> {
        let contents = serde_json::to_string_pretty(value)?;
        self.write_atomic(contents.as_bytes()).await
    }

    /// Delete the file
    pub async fn delete(&self) -> Result<(), DeployError> {
        if self.exists().await {
            fs::remove_file(&self.path).await?;
        }
        Ok(())
    }

    /// Atomic write using a temporary file. On Unix the temporary file is
    /// owner-only before any contents reach it.
    pub async fn write_atomic(&self, contents: &[u8]) -> Result<(), DeployError> {
        // Ensure parent directory exists
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let temp_path = self.path.with_extension("tmp");

        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);
        let mut file = options.open(&temp_path).await?;

        // A leftover temp file keeps its old mode
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o600)).await?;
        }

        file.write_all(contents).await?;
        file.sync_all().await?;
        drop(file);

        // Rename to target
        fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }
}
