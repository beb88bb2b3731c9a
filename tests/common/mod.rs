//! In-process mock services shared by the integration tests.
#![allow(dead_code)]

use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use do_agent::client::stream::{decode_body, Record};
use do_agent::client::ClientOptions;
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

pub const HOST_ID: &str = "4242";
pub const REGION: &str = "nyc3";
pub const METADATA_TOKEN: &str = "metadata-token-abcdef";
pub const APP_KEY: &str = "app-key-1234567890";

/// Binds an ephemeral port, serves `router` in the background and returns
/// the base URL.
pub async fn serve(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

#[derive(Debug, Clone)]
pub struct Push {
    pub path: String,
    pub headers: HeaderMap,
    pub records: Vec<Record>,
}

impl Push {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Metadata service, auth service and sonar in one server.
#[derive(Clone)]
pub struct MockSonar {
    pub pushes: Arc<Mutex<Vec<Push>>>,
    pub bootstraps: Arc<AtomicUsize>,
    status: Arc<AtomicU16>,
    metadata_status: Arc<AtomicU16>,
    control: Arc<Mutex<Option<String>>>,
}

impl Default for MockSonar {
    fn default() -> Self {
        Self {
            pushes: Arc::default(),
            bootstraps: Arc::default(),
            status: Arc::new(AtomicU16::new(202)),
            metadata_status: Arc::new(AtomicU16::new(200)),
            control: Arc::default(),
        }
    }
}

impl MockSonar {
    pub fn set_status(&self, status: u16) {
        self.status.store(status, Ordering::SeqCst);
    }

    pub fn set_metadata_status(&self, status: u16) {
        self.metadata_status.store(status, Ordering::SeqCst);
    }

    pub fn set_control(&self, body: &str) {
        *self.control.lock().unwrap() = Some(body.to_string());
    }

    pub fn pushes(&self) -> Vec<Push> {
        self.pushes.lock().unwrap().clone()
    }

    pub async fn start(&self) -> String {
        let router = Router::new()
            .route("/metadata/v1/id", get(metadata_id))
            .route("/metadata/v1/region", get(metadata_region))
            .route("/metadata/v1/auth-token", get(metadata_token))
            .route("/v1/appkey/droplet-auth-token", get(appkey))
            .route("/v1/metrics/droplet_id/{id}", post(push))
            .route("/v1/metrics/trusted/{name}", post(push))
            .with_state(self.clone());
        serve(router).await
    }
}

fn metadata(mock: &MockSonar, body: &'static str) -> Response {
    let status = mock.metadata_status.load(Ordering::SeqCst);
    if status != 200 {
        return StatusCode::from_u16(status).unwrap().into_response();
    }
    // padded, the client trims
    format!("{}\n", body).into_response()
}

async fn metadata_id(State(mock): State<MockSonar>) -> Response {
    metadata(&mock, HOST_ID)
}

async fn metadata_region(State(mock): State<MockSonar>) -> Response {
    metadata(&mock, REGION)
}

async fn metadata_token(State(mock): State<MockSonar>) -> Response {
    metadata(&mock, METADATA_TOKEN)
}

async fn appkey(State(mock): State<MockSonar>, headers: HeaderMap) -> Response {
    let expected = format!("DOMETADATA {}", METADATA_TOKEN);
    if headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) != Some(expected.as_str()) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    mock.bootstraps.fetch_add(1, Ordering::SeqCst);
    format!("\"{}\"", APP_KEY).into_response()
}

async fn push(State(mock): State<MockSonar>, uri: Uri, headers: HeaderMap, body: Bytes) -> Response {
    let records = decode_body(&body).unwrap_or_default();
    mock.pushes.lock().unwrap().push(Push {
        path: uri.path().to_string(),
        headers,
        records,
    });

    let status = StatusCode::from_u16(mock.status.load(Ordering::SeqCst)).unwrap();
    match mock.control.lock().unwrap().clone() {
        Some(json) if status == StatusCode::ACCEPTED => {
            (status, [(CONTENT_TYPE, "application/json")], json).into_response()
        }
        _ => status.into_response(),
    }
}

/// Client options pointing every endpoint at the mock.
pub fn client_options(base: &str, wait_interval: Duration) -> ClientOptions {
    ClientOptions {
        endpoints: vec![base.to_string()],
        metadata_endpoint: format!("{}/metadata", base),
        auth_endpoint: base.to_string(),
        wait_interval,
        ..ClientOptions::default()
    }
}
