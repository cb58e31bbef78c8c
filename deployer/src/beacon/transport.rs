//! Wire strategies for reaching a beacon
//!
//! Current beacons take the envelope as a POST form body. Legacy beacons
//! (protocol "1.0" or no recorded version) read it from the query string.
//! The strategy is chosen once per target with [`for_protocol`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{header, redirect, Body, Client, Response};
use tokio_util::io::ReaderStream;
use tracing::debug;
use url::Url;

use crate::beacon::envelope::{Envelope, FileUpload, FIELD_FILE};
use crate::errors::DeployError;
use crate::storage::settings::TransportSettings;

/// Protocol version spoken by current beacons
pub const PROTOCOL_VERSION: &str = "2.0";

/// Protocol version of beacons that take the envelope in the query string
pub const LEGACY_PROTOCOL_VERSION: &str = "1.0";

/// Status, body and redirect target of a beacon reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
    pub location: Option<String>,
}

impl RawResponse {
    async fn read(response: Response) -> Result<Self, DeployError> {
        let status = response.status().as_u16();
        let location = response
            .headers()
            .get(header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.text().await?;

        Ok(Self {
            status,
            body,
            location,
        })
    }
}

/// How an envelope travels to the beacon endpoint
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a command envelope
    async fn send(&self, endpoint: &Url, envelope: &Envelope) -> Result<RawResponse, DeployError>;

    /// Send a command envelope with a file attached
    async fn send_file(
        &self,
        endpoint: &Url,
        envelope: &Envelope,
        upload: &FileUpload,
    ) -> Result<RawResponse, DeployError>;
}

/// Envelope fields in a POST body
pub struct PostTransport {
    client: Client,
}

impl PostTransport {
    pub fn new(settings: &TransportSettings) -> Result<Self, DeployError> {
        Ok(Self {
            client: build_http_client(settings)?,
        })
    }
}

#[async_trait]
impl Transport for PostTransport {
    async fn send(&self, endpoint: &Url, envelope: &Envelope) -> Result<RawResponse, DeployError> {
        debug!("POST {}", endpoint);

        let response = self
            .client
            .post(endpoint.clone())
            .form(envelope)
            .send()
            .await?;

        RawResponse::read(response).await
    }

    async fn send_file(
        &self,
        endpoint: &Url,
        envelope: &Envelope,
        upload: &FileUpload,
    ) -> Result<RawResponse, DeployError> {
        let mut url = endpoint.clone();
        url.query_pairs_mut().extend_pairs(upload.query());
        debug!("POST {} (upload {})", url, upload.path.display());

        let mut form = file_form(upload).await?;
        for (name, value) in envelope.fields() {
            form = form.text(name, value.to_string());
        }

        let response = self.client.post(url).multipart(form).send().await?;

        RawResponse::read(response).await
    }
}

/// Envelope fields in the query string
pub struct QueryTransport {
    client: Client,
}

impl QueryTransport {
    pub fn new(settings: &TransportSettings) -> Result<Self, DeployError> {
        Ok(Self {
            client: build_http_client(settings)?,
        })
    }

    fn url_with_envelope(endpoint: &Url, envelope: &Envelope) -> Url {
        let mut url = endpoint.clone();
        url.query_pairs_mut().extend_pairs(envelope.fields());
        url
    }
}

#[async_trait]
impl Transport for QueryTransport {
    async fn send(&self, endpoint: &Url, envelope: &Envelope) -> Result<RawResponse, DeployError> {
        let url = Self::url_with_envelope(endpoint, envelope);
        debug!("GET {} (legacy protocol)", endpoint);

        let response = self.client.get(url).send().await?;

        RawResponse::read(response).await
    }

    async fn send_file(
        &self,
        endpoint: &Url,
        envelope: &Envelope,
        upload: &FileUpload,
    ) -> Result<RawResponse, DeployError> {
        let mut url = Self::url_with_envelope(endpoint, envelope);
        url.query_pairs_mut().extend_pairs(upload.query());
        debug!("POST {} (legacy upload {})", endpoint, upload.path.display());

        let form = file_form(upload).await?;
        let response = self.client.post(url).multipart(form).send().await?;

        RawResponse::read(response).await
    }
}

/// Multipart form whose file part is streamed from disk
async fn file_form(upload: &FileUpload) -> Result<Form, DeployError> {
    let file = tokio::fs::File::open(&upload.path).await?;
    let body = Body::wrap_stream(ReaderStream::new(file));
    let part = Part::stream_with_length(body, upload.size)
        .file_name(upload.file_name())
        .mime_str("application/zip")?;

    Ok(Form::new().part(FIELD_FILE, part))
}

/// Whether a recorded beacon version speaks the query-string protocol
pub fn is_legacy(beacon_version: Option<&str>) -> bool {
    matches!(beacon_version, None | Some("") | Some(LEGACY_PROTOCOL_VERSION))
}

/// Pick the transport strategy for a target's recorded protocol version
pub fn for_protocol(
    beacon_version: Option<&str>,
    settings: &TransportSettings,
) -> Result<Box<dyn Transport>, DeployError> {
    if is_legacy(beacon_version) {
        Ok(Box::new(QueryTransport::new(settings)?))
    } else {
        Ok(Box::new(PostTransport::new(settings)?))
    }
}

/// HTTP client used by the transports. Redirects are never followed.
fn build_http_client(settings: &TransportSettings) -> Result<Client, DeployError> {
    let client = Client::builder()
        .timeout(Duration::from_secs(settings.timeout_secs))
        .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
        .redirect(redirect::Policy::none())
        .build()?;

    Ok(client)
}
