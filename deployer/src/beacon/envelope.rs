//! Signed request envelopes

use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::authn::keypair::KeyPair;
use crate::beacon::command::Command;
use crate::errors::DeployError;
use crate::utils::{md5_file, md5_hex, next_nonce};

/// Sender key identifier field
pub const FIELD_KEY_ID: &str = "XOB";
/// Base64 JSON payload field
pub const FIELD_PAYLOAD: &str = "XOB_PAYLOAD";
/// Base64 signature field
pub const FIELD_SIGNATURE: &str = "XOB_SIGNATURE";
/// MD5 of the uploaded file's local path
pub const FIELD_FILENAME: &str = "XOB_FILENAME";
/// MD5 of the uploaded file's contents
pub const FIELD_FILEHASH: &str = "XOB_FILEHASH";
/// Multipart field carrying the uploaded file
pub const FIELD_FILE: &str = "file";

/// The three authenticated fields sent with every request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Envelope {
    #[serde(rename = "XOB")]
    pub key_id: String,

    #[serde(rename = "XOB_PAYLOAD")]
    pub payload: String,

    #[serde(rename = "XOB_SIGNATURE")]
    pub signature: String,
}

impl Envelope {
    /// Seal a command with a fresh nonce
    pub fn seal(command: &Command, key: &KeyPair) -> Result<Self, DeployError> {
        Self::seal_with_nonce(command, key, next_nonce())
    }

    /// Seal a command with an explicit nonce
    pub fn seal_with_nonce(command: &Command, key: &KeyPair, nonce: i64) -> Result<Self, DeployError> {
        let payload = encode_payload(command, nonce)?;
        let signature = STANDARD.encode(key.sign(payload.as_bytes())?);

        Ok(Self {
            key_id: key.key_id(),
            payload,
            signature,
        })
    }

    /// Field name/value pairs, in wire order
    pub fn fields(&self) -> [(&'static str, &str); 3] {
        [
            (FIELD_KEY_ID, self.key_id.as_str()),
            (FIELD_PAYLOAD, self.payload.as_str()),
            (FIELD_SIGNATURE, self.signature.as_str()),
        ]
    }

    /// Decode the payload back into its JSON object
    pub fn decode_payload(&self) -> Result<Map<String, Value>, DeployError> {
        decode_payload(&self.payload)
    }
}

/// `base64(JSON({cmd, nonce, ...params}))`
pub fn encode_payload(command: &Command, nonce: i64) -> Result<String, DeployError> {
    let mut params = command.params();
    params.insert("cmd".to_string(), Value::String(command.name().to_string()));
    params.insert("nonce".to_string(), Value::from(nonce));

    let json = serde_json::to_vec(&params)?;
    Ok(STANDARD.encode(json))
}

/// Inverse of [`encode_payload`]
pub fn decode_payload(payload: &str) -> Result<Map<String, Value>, DeployError> {
    let json = STANDARD
        .decode(payload)
        .map_err(|e| DeployError::ProtocolError(format!("Payload is not base64: {}", e)))?;

    match serde_json::from_slice(&json)? {
        Value::Object(map) => Ok(map),
        _ => Err(DeployError::ProtocolError("Payload is not a JSON object".to_string())),
    }
}

/// A local file prepared for upload, with the integrity hashes the beacon
/// checks before accepting it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    pub path: PathBuf,
    pub filename_hash: String,
    pub file_hash: String,
    pub size: u64,
}

impl FileUpload {
    /// Hash the path and contents of a local file
    pub fn prepare(path: &Path) -> Result<Self, DeployError> {
        if !path.is_file() {
            return Err(DeployError::ValidationError(format!(
                "Upload source is not a file: {}",
                path.display()
            )));
        }

        Ok(Self {
            path: path.to_path_buf(),
            filename_hash: md5_hex(path.to_string_lossy().as_bytes()),
            file_hash: md5_file(path)?,
            size: std::fs::metadata(path)?.len(),
        })
    }

    /// [`FileUpload::prepare`] on the blocking pool
    pub async fn load(path: &Path) -> Result<Self, DeployError> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || Self::prepare(&path))
            .await
            .map_err(|e| DeployError::FilesystemError(format!("Upload hashing task failed: {}", e)))?
    }

    /// File name presented in the multipart part
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.zip".to_string())
    }

    /// Query pairs appended to the endpoint URL
    pub fn query(&self) -> [(&'static str, &str); 2] {
        [
            (FIELD_FILENAME, self.filename_hash.as_str()),
            (FIELD_FILEHASH, self.file_hash.as_str()),
        ]
    }
}
