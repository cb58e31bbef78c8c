//! Settings file management

use std::path::PathBuf;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::archive::ArchiveSettings;
use crate::errors::DeployError;
use crate::logs::LogLevel;

/// Environment variable holding the passphrase that seals stored keys
pub const PASSPHRASE_ENV: &str = "BEACON_DEPLOY_PASSPHRASE";

/// Passphrase for stored deployment keys, read from [`PASSPHRASE_ENV`]
pub fn key_passphrase() -> Result<SecretString, DeployError> {
    passphrase_from(std::env::var(PASSPHRASE_ENV).ok())
}

fn passphrase_from(value: Option<String>) -> Result<SecretString, DeployError> {
    match value {
        Some(value) if !value.is_empty() => Ok(SecretString::from(value)),
        _ => Err(DeployError::ConfigError(format!(
            "{} must be set to read or store deployment keys",
            PASSPHRASE_ENV
        ))),
    }
}

/// Deployer settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Filesystem locations
    #[serde(default)]
    pub paths: PathSettings,

    /// HTTP transport configuration
    #[serde(default)]
    pub transport: TransportSettings,
}

/// Filesystem locations used by the builder and the beacon client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathSettings {
    /// Root of the project being deployed
    #[serde(default = "default_project_root")]
    pub project_root: PathBuf,

    /// Beacon templates (`<templates_dir>/app/...`)
    #[serde(default = "default_templates_dir")]
    pub templates_dir: PathBuf,

    /// Remote script sources (`<scripts_dir>/<name>.txt`)
    #[serde(default = "default_scripts_dir")]
    pub scripts_dir: PathBuf,

    /// Scratch space for archives. Defaults to the storage `tmp/` directory.
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
}

fn default_project_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_templates_dir() -> PathBuf {
    PathBuf::from("templates")
}

fn default_scripts_dir() -> PathBuf {
    PathBuf::from("scripts")
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            project_root: default_project_root(),
            templates_dir: default_templates_dir(),
            scripts_dir: default_scripts_dir(),
            temp_dir: None,
        }
    }
}

impl PathSettings {
    /// Archive builder settings, falling back to `fallback_temp` for scratch space
    pub fn archive_settings(&self, fallback_temp: impl Into<PathBuf>) -> ArchiveSettings {
        ArchiveSettings {
            templates_dir: self.templates_dir.clone(),
            project_root: self.project_root.clone(),
            temp_dir: self.temp_dir.clone().unwrap_or_else(|| fallback_temp.into()),
        }
    }
}

/// HTTP transport settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportSettings {
    /// Whole-request timeout. Large uploads need a generous value.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Connection establishment timeout
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_timeout() -> u64 {
    3600
}

fn default_connect_timeout() -> u64 {
    30
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}
