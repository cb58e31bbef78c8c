//! Commands understood by the beacon

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Scripts shipped with the deployer and evaluated remotely via `evalScript`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Script {
    GetEnvFile,
    PutEnvFile,
    ExtractArchive,
    CheckDatabase,
    PutProjectKey,
    ClearCache,
}

impl Script {
    /// Script name as used on disk and in step descriptors
    pub fn name(&self) -> &'static str {
        match self {
            Script::GetEnvFile => "get_env_file",
            Script::PutEnvFile => "put_env_file",
            Script::ExtractArchive => "extract_archive",
            Script::CheckDatabase => "check_database",
            Script::PutProjectKey => "put_project_key",
            Script::ClearCache => "clear_cache",
        }
    }

    /// File holding the script source inside the scripts directory
    pub fn file_name(&self) -> String {
        format!("{}.txt", self.name())
    }
}

impl std::fmt::Display for Script {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A logical remote command and its parameters
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Probe the beacon and report installation state
    HealthCheck,

    /// Evaluate a base64 encoded script with variables
    EvalScript { script: String, vars: Value },

    /// Run a base64 encoded shell script
    ShellScript { script: String },

    /// Run an artisan console command
    ArtisanCommand { command: String },

    /// Receive the file attached to the request
    FileUpload,
}

impl Command {
    /// Wire name of the command
    pub fn name(&self) -> &'static str {
        match self {
            Command::HealthCheck => "healthCheck",
            Command::EvalScript { .. } => "evalScript",
            Command::ShellScript { .. } => "shellScript",
            Command::ArtisanCommand { .. } => "artisanCommand",
            Command::FileUpload => "fileUpload",
        }
    }

    /// Command-specific payload parameters
    pub fn params(&self) -> Map<String, Value> {
        let mut params = Map::new();
        match self {
            Command::HealthCheck | Command::FileUpload => {}
            Command::EvalScript { script, vars } => {
                params.insert("script".to_string(), Value::String(script.clone()));
                params.insert("scriptVars".to_string(), vars.clone());
            }
            Command::ShellScript { script } => {
                params.insert("script".to_string(), Value::String(script.clone()));
            }
            Command::ArtisanCommand { command } => {
                params.insert("artisan".to_string(), Value::String(command.clone()));
            }
        }
        params
    }
}
