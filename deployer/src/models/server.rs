//! Target server records

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};
use url::Url;

use crate::authn::keypair::{KeyPair, SealedKey};
use crate::beacon::client::Beacon;
use crate::beacon::response::HealthReport;
use crate::beacon::transport::is_legacy;
use crate::deploy::fsm::{ProbeEvent, ServerStatus};
use crate::errors::DeployError;

/// A registered deployment target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    /// Unique server ID
    pub id: String,

    /// Display name
    pub server_name: String,

    /// Beacon endpoint URL
    pub endpoint_url: String,

    /// Protocol version last reported by the beacon
    #[serde(default)]
    pub beacon_version: Option<String>,

    /// Lifecycle status, driven by health probes
    #[serde(default)]
    pub status_code: ServerStatus,

    /// Free-form deployment preferences, one value per key
    #[serde(default)]
    pub deploy_preferences: Map<String, Value>,

    /// Time of the last completed deployment
    #[serde(default)]
    pub last_deploy_at: Option<DateTime<Utc>>,

    /// Core version marker recorded by the last core deployment
    #[serde(default)]
    pub last_version: Option<String>,

    /// Deployment key pair, once opened with [`Server::unseal_key`]
    #[serde(skip)]
    pub key: Option<KeyPair>,

    /// Encrypted key pair as stored on disk
    #[serde(rename = "key", default, skip_serializing_if = "Option::is_none")]
    pub sealed_key: Option<SealedKey>,

    /// Registration timestamp
    pub created_at: DateTime<Utc>,
}

impl Server {
    /// Create a new, unreachable server without a key
    pub fn new(server_name: impl Into<String>, endpoint_url: impl Into<String>) -> Self {
        Self {
            id: crate::utils::generate_uuid(),
            server_name: server_name.into(),
            endpoint_url: endpoint_url.into(),
            beacon_version: None,
            status_code: ServerStatus::Unreachable,
            deploy_preferences: Map::new(),
            last_deploy_at: None,
            last_version: None,
            key: None,
            sealed_key: None,
            created_at: Utc::now(),
        }
    }

    /// Register a server with its private key, validating both
    pub fn register(
        server_name: impl Into<String>,
        endpoint_url: impl Into<String>,
        private_key_pem: &str,
    ) -> Result<Self, DeployError> {
        let mut server = Self::new(server_name, endpoint_url);
        server.set_private_key(private_key_pem)?;
        server.validate()?;
        Ok(server)
    }

    /// Replace the whole key pair with one built from a new private key
    pub fn set_private_key(&mut self, private_key_pem: &str) -> Result<(), DeployError> {
        self.key = Some(KeyPair::from_private_pem(private_key_pem)?);
        Ok(())
    }

    /// Encrypt the key pair for storage. A sealed copy of the same key is
    /// kept as is.
    pub fn seal_key(&mut self, passphrase: &SecretString) -> Result<(), DeployError> {
        let Some(key) = &self.key else {
            return Ok(());
        };

        let current = self
            .sealed_key
            .as_ref()
            .is_some_and(|sealed| sealed.public_key_pem() == key.public_key_pem());
        if !current {
            self.sealed_key = Some(key.seal(passphrase)?);
        }
        Ok(())
    }

    /// Open the stored key pair
    pub fn unseal_key(&mut self, passphrase: &SecretString) -> Result<(), DeployError> {
        if let Some(sealed) = &self.sealed_key {
            self.key = Some(KeyPair::unseal(sealed, passphrase)?);
        }
        Ok(())
    }

    /// Check the fields a deployment needs
    pub fn validate(&self) -> Result<(), DeployError> {
        if self.server_name.trim().is_empty() {
            return Err(DeployError::ValidationError(
                "Server name is a required field".to_string(),
            ));
        }
        if self.endpoint_url.trim().is_empty() {
            return Err(DeployError::ValidationError(
                "Endpoint URL is a required field".to_string(),
            ));
        }
        self.endpoint()?;
        if self.key.is_none() {
            return Err(DeployError::ValidationError(
                "Deployment key is a required field".to_string(),
            ));
        }
        Ok(())
    }

    /// Parsed endpoint URL, which must be http or https
    pub fn endpoint(&self) -> Result<Url, DeployError> {
        let url = Url::parse(self.endpoint_url.trim()).map_err(|e| {
            DeployError::ValidationError(format!("Invalid endpoint URL '{}': {}", self.endpoint_url, e))
        })?;

        match url.scheme() {
            "http" | "https" => Ok(url),
            scheme => Err(DeployError::ValidationError(format!(
                "Endpoint URL must use http or https, not '{}'",
                scheme
            ))),
        }
    }

    /// Whether the beacon speaks the legacy query-string protocol
    pub fn is_legacy(&self) -> bool {
        is_legacy(self.beacon_version.as_deref())
    }

    /// Human version of the status code
    pub fn status_label(&self) -> &'static str {
        self.status_code.label()
    }

    /// Set one deployment preference, replacing any previous value for it
    pub fn set_deploy_preference(&mut self, key: impl Into<String>, value: Value) {
        self.deploy_preferences.insert(key.into(), value);
    }

    /// Read one deployment preference
    pub fn deploy_preference(&self, key: &str) -> Option<&Value> {
        self.deploy_preferences.get(key)
    }

    /// Fold a probe result into the record; returns true when the status
    /// or the beacon version changed
    pub fn apply_probe(&mut self, probe: Result<HealthReport, DeployError>) -> bool {
        let event = match probe {
            Ok(report) => ProbeEvent::Answered(report),
            Err(e) => {
                warn!("Beacon probe for {} failed: {}", self.server_name, e);
                ProbeEvent::Failed(e.to_string())
            }
        };

        let mut differs = false;

        if let ProbeEvent::Answered(report) = &event {
            if self.beacon_version.as_deref() != Some(report.beacon_version.as_str()) {
                self.beacon_version = Some(report.beacon_version.clone());
                differs = true;
            }
        }

        let next = ServerStatus::from_probe(&event);
        if next != self.status_code {
            info!(
                "Server {} status {} -> {}",
                self.server_name,
                self.status_code.label(),
                next.label()
            );
            self.status_code = next;
            differs = true;
        }

        differs
    }

    /// Probe the beacon and update status; returns true when anything changed
    pub async fn test_beacon<B: Beacon + ?Sized>(&mut self, beacon: &B) -> bool {
        let probe = beacon.health_check().await;
        self.apply_probe(probe)
    }

    /// Record a completed deployment
    pub fn touch_last_deploy(&mut self) {
        self.last_deploy_at = Some(Utc::now());
    }

    /// Record the deployed core version marker
    pub fn touch_last_version(&mut self, version: impl Into<String>) {
        self.last_version = Some(version.into());
    }
}
