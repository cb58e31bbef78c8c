//! Shared fixtures: one RSA key per test binary and an in-process beacon

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use url::Url;

use beacon_deployer::authn::keypair::KeyPair;
use beacon_deployer::beacon::client::BeaconClient;
use beacon_deployer::beacon::transport::for_protocol;
use beacon_deployer::models::server::Server;
use beacon_deployer::storage::settings::TransportSettings;

pub fn test_key() -> &'static KeyPair {
    static KEY: OnceLock<KeyPair> = OnceLock::new();
    KEY.get_or_init(|| KeyPair::generate().unwrap())
}

pub fn second_key() -> &'static KeyPair {
    static KEY: OnceLock<KeyPair> = OnceLock::new();
    KEY.get_or_init(|| KeyPair::generate().unwrap())
}

/// One request as the fake beacon saw it
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: Method,
    pub query: HashMap<String, String>,
    pub content_type: String,
    pub body: Vec<u8>,
}

impl Recorded {
    /// Fields of a urlencoded form body
    pub fn form(&self) -> HashMap<String, String> {
        url::form_urlencoded::parse(&self.body).into_owned().collect()
    }
}

/// Canned reply
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub body: String,
    pub location: Option<String>,
}

impl Reply {
    pub fn json(status: u16, body: serde_json::Value) -> Self {
        Self {
            status,
            body: body.to_string(),
            location: None,
        }
    }
}

struct BeaconState {
    reply: Mutex<Reply>,
    requests: Mutex<Vec<Recorded>>,
}

/// An axum server standing in for a beacon endpoint
pub struct FakeBeacon {
    pub url: Url,
    state: Arc<BeaconState>,
}

impl FakeBeacon {
    pub async fn start(reply: Reply) -> Self {
        let state = Arc::new(BeaconState {
            reply: Mutex::new(reply),
            requests: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route("/beacon.php", any(handle))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: Url::parse(&format!("http://{}/beacon.php", addr)).unwrap(),
            state,
        }
    }

    pub fn set_reply(&self, reply: Reply) {
        *self.state.reply.lock().unwrap() = reply;
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn server(&self, beacon_version: Option<&str>) -> Server {
        let mut server = Server::new("fake", self.url.as_str());
        server.key = Some(test_key().clone());
        server.beacon_version = beacon_version.map(str::to_string);
        server
    }

    pub fn client(&self, beacon_version: Option<&str>, scripts_dir: &Path) -> BeaconClient {
        BeaconClient::new(
            self.url.clone(),
            test_key().clone(),
            for_protocol(beacon_version, &TransportSettings::default()).unwrap(),
            scripts_dir.to_path_buf(),
        )
    }
}

async fn handle(
    State(state): State<Arc<BeaconState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let query = url::form_urlencoded::parse(uri.query().unwrap_or("").as_bytes())
        .into_owned()
        .collect();
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
        .to_string();

    state.requests.lock().unwrap().push(Recorded {
        method,
        query,
        content_type,
        body: body.to_vec(),
    });

    let reply = state.reply.lock().unwrap().clone();
    let mut response = (StatusCode::from_u16(reply.status).unwrap(), reply.body).into_response();
    if let Some(location) = reply.location {
        response
            .headers_mut()
            .insert(header::LOCATION, HeaderValue::from_str(&location).unwrap());
    }
    response
}
