//! Beacon client

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::Value;
use tracing::{debug, info};
use url::Url;

use crate::authn::keypair::KeyPair;
use crate::beacon::command::{Command, Script};
use crate::beacon::envelope::{Envelope, FileUpload};
use crate::beacon::response::{classify, decode_field, HealthReport, ResponseBody};
use crate::beacon::transport::{for_protocol, Transport};
use crate::errors::DeployError;
use crate::models::server::Server;
use crate::storage::settings::TransportSettings;

/// Operations a deployment needs from a remote beacon
#[async_trait]
pub trait Beacon: Send + Sync {
    /// Send a command and return the decoded success envelope
    async fn transmit(&self, command: Command) -> Result<ResponseBody, DeployError>;

    /// Upload a local file
    async fn transmit_file(&self, path: &Path) -> Result<ResponseBody, DeployError>;

    /// Evaluate one of the bundled scripts with variables
    async fn transmit_script(&self, script: Script, vars: Value) -> Result<ResponseBody, DeployError>;

    /// Probe the beacon
    async fn health_check(&self) -> Result<HealthReport, DeployError> {
        let body = self.transmit(Command::HealthCheck).await?;
        Ok(HealthReport::from_body(&body))
    }

    /// Run an artisan command
    async fn transmit_artisan(&self, command: &str) -> Result<ResponseBody, DeployError> {
        self.transmit(Command::ArtisanCommand {
            command: command.to_string(),
        })
        .await
    }

    /// Run a shell script
    async fn transmit_shell(&self, contents: &str) -> Result<ResponseBody, DeployError> {
        self.transmit(Command::ShellScript {
            script: STANDARD.encode(contents),
        })
        .await
    }

    /// Read the remote environment file
    async fn fetch_env_file(&self) -> Result<String, DeployError> {
        let body = self.transmit_script(Script::GetEnvFile, Value::Object(Default::default())).await?;
        decode_field(&body, "contents")?.ok_or_else(|| {
            DeployError::ApplicationError("Beacon did not respond with a valid file".to_string())
        })
    }
}

/// HTTP beacon client bound to one target
pub struct BeaconClient {
    endpoint: Url,
    key: KeyPair,
    transport: Box<dyn Transport>,
    scripts_dir: PathBuf,
}

impl BeaconClient {
    /// Create a client from its parts
    pub fn new(endpoint: Url, key: KeyPair, transport: Box<dyn Transport>, scripts_dir: PathBuf) -> Self {
        Self {
            endpoint,
            key,
            transport,
            scripts_dir,
        }
    }

    /// Create a client for a registered server, choosing the transport from
    /// the server's recorded protocol version
    pub fn for_server(
        server: &Server,
        scripts_dir: &Path,
        settings: &TransportSettings,
    ) -> Result<Self, DeployError> {
        server.validate()?;

        let key = server.key.clone().ok_or_else(|| {
            DeployError::ValidationError(format!("Server '{}' has no deployment key", server.server_name))
        })?;
        let endpoint = server.endpoint()?;
        let transport = for_protocol(server.beacon_version.as_deref(), settings)?;

        Ok(Self::new(endpoint, key, transport, scripts_dir.to_path_buf()))
    }

    /// Endpoint this client talks to
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn read_script(&self, script: Script) -> Result<String, DeployError> {
        let path = self.scripts_dir.join(script.file_name());
        let contents = std::fs::read(&path).map_err(|e| {
            DeployError::FilesystemError(format!("Unable to read script {}: {}", path.display(), e))
        })?;
        Ok(STANDARD.encode(contents))
    }
}

#[async_trait]
impl Beacon for BeaconClient {
    async fn transmit(&self, command: Command) -> Result<ResponseBody, DeployError> {
        debug!("Transmitting {} to {}", command.name(), self.endpoint);

        let envelope = Envelope::seal(&command, &self.key)?;
        let response = self.transport.send(&self.endpoint, &envelope).await?;

        classify(&response)
    }

    async fn transmit_file(&self, path: &Path) -> Result<ResponseBody, DeployError> {
        let upload = FileUpload::load(path).await?;
        info!("Uploading {} to {}", path.display(), self.endpoint);

        let envelope = Envelope::seal(&Command::FileUpload, &self.key)?;
        let response = self
            .transport
            .send_file(&self.endpoint, &envelope, &upload)
            .await?;

        classify(&response)
    }

    async fn transmit_script(&self, script: Script, vars: Value) -> Result<ResponseBody, DeployError> {
        debug!("Evaluating script {}", script);

        let command = Command::EvalScript {
            script: self.read_script(script)?,
            vars,
        };

        self.transmit(command).await
    }
}
