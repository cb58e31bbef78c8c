//! Classification of beacon replies

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::beacon::transport::{RawResponse, LEGACY_PROTOCOL_VERSION};
use crate::errors::DeployError;

/// Decoded success envelope from a beacon
pub type ResponseBody = Map<String, Value>;

/// Turn a raw HTTP reply into a result map or a typed error
pub fn classify(response: &RawResponse) -> Result<ResponseBody, DeployError> {
    debug!("Beacon responded with status {}", response.status);

    match response.status {
        201 => match serde_json::from_str::<Value>(&response.body) {
            Ok(Value::Object(body)) => Ok(body),
            _ => Err(DeployError::ProtocolError(
                "Empty response from beacon".to_string(),
            )),
        },
        400 => {
            let message = serde_json::from_str::<Value>(&response.body)
                .ok()
                .and_then(|body| body.get("error").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_else(|| "Unspecified error from beacon".to_string());
            Err(DeployError::ApplicationError(message))
        }
        413 => Err(DeployError::TransportError(
            "Server did not accept the upload (Request too large)".to_string(),
        )),
        301 | 302 => {
            let target = response
                .location
                .as_deref()
                .unwrap_or_default()
                .split('?')
                .next()
                .unwrap_or_default();
            warn!("Beacon endpoint redirected to {}", target);
            Err(DeployError::TransportError(format!(
                "Server responded with redirect ({}) please update the server address to exactly this and try again.",
                target
            )))
        }
        code => Err(DeployError::ProtocolError(format!(
            "A valid response from a beacon was not found (Code: {})",
            code
        ))),
    }
}

/// `status` of a script reply is exactly `"ok"`
pub fn status_ok(body: &ResponseBody) -> bool {
    body.get("status").and_then(Value::as_str) == Some("ok")
}

/// Beacon-supplied `error` message, or a fallback
pub fn error_message(body: &ResponseBody, fallback: &str) -> String {
    body.get("error")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| fallback.to_string())
}

/// Decode a base64 string field of a reply
pub fn decode_field(body: &ResponseBody, field: &str) -> Result<Option<String>, DeployError> {
    let Some(encoded) = body.get(field).and_then(Value::as_str) else {
        return Ok(None);
    };

    let bytes = STANDARD.decode(encoded).map_err(|e| {
        DeployError::ProtocolError(format!("Field '{}' is not valid base64: {}", field, e))
    })?;

    Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
}

/// Result of a `healthCheck` probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    pub app_installed: bool,
    pub env_found: bool,
    pub beacon_version: String,
}

impl HealthReport {
    /// Read the probe fields, treating anything missing as false
    pub fn from_body(body: &ResponseBody) -> Self {
        Self {
            app_installed: truthy(body.get("appInstalled")),
            env_found: truthy(body.get("envFound")),
            beacon_version: body
                .get("beaconVersion")
                .and_then(Value::as_str)
                .unwrap_or(LEGACY_PROTOCOL_VERSION)
                .to_string(),
        }
    }
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
        Some(Value::String(s)) => !s.is_empty() && s != "0",
        _ => false,
    }
}
