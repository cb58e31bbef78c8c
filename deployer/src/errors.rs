//! Error types for the beacon deployer

use thiserror::Error;

/// Main error type for the beacon deployer
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("{0}")]
    ApplicationError(String),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Filesystem error: {0}")]
    FilesystemError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Archive error: {0}")]
    ZipError(#[from] zip::result::ZipError),

    #[error("Directory walk error: {0}")]
    WalkError(#[from] walkdir::Error),
}

/// Broad error category, used to decide how a failure is surfaced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad or missing input, raised before any network activity
    Validation,
    /// The request did not complete or was refused by the HTTP layer
    Transport,
    /// The beacon reported a failure of its own
    Application,
    /// The beacon answered with something that is not a valid envelope
    Protocol,
    /// Local staging, compression or cleanup failed
    Filesystem,
}

impl DeployError {
    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeployError::ValidationError(_) | DeployError::InvalidKey(_) | DeployError::ConfigError(_) => {
                ErrorKind::Validation
            }
            DeployError::TransportError(_) | DeployError::HttpError(_) => ErrorKind::Transport,
            DeployError::ApplicationError(_) => ErrorKind::Application,
            DeployError::ProtocolError(_) | DeployError::JsonError(_) => ErrorKind::Protocol,
            DeployError::FilesystemError(_)
            | DeployError::IoError(_)
            | DeployError::ZipError(_)
            | DeployError::WalkError(_) => ErrorKind::Filesystem,
        }
    }
}
