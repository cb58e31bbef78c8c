//! Storage layout configuration

use std::path::PathBuf;

use crate::errors::DeployError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Environment variable overriding the storage base directory
pub const HOME_ENV: &str = "BEACON_DEPLOY_HOME";

/// Storage layout for the deployer
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Get the settings file path
    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// Get the server records directory
    pub fn servers_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("servers"))
    }

    /// Get the record file for one server
    pub fn server_file(&self, id: &str) -> File {
        self.servers_dir().file(&format!("{}.json", id))
    }

    /// Get the saved deploy run for one server
    pub fn run_file(&self, id: &str) -> File {
        self.servers_dir().file(&format!("{}.run.json", id))
    }

    /// Get the scratch directory for archives
    pub fn temp_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("tmp"))
    }

    /// Get the logs directory
    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), DeployError> {
        self.servers_dir().create().await?;
        self.temp_dir().create().await?;
        self.logs_dir().create().await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        let base_dir = std::env::var_os(HOME_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .or_else(|| std::env::var_os("USERPROFILE"))
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(".beacon-deploy")
            });

        Self::new(base_dir)
    }
}
