//! Server test utilities.

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, Response, StatusCode};
use serde_json::Value;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;
use tulpar_core::config::AppConfig;
use tulpar_server::{AppState, create_router};
use tulpar_storage::PackageRepository;

/// Raw admin token whose hash `AppConfig::for_testing` configures.
#[allow(dead_code)]
pub const ADMIN_TOKEN: &str = "test-admin-token";

/// A test server over a temporary repository.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server with default limits.
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Create a test server with custom config modifications.
    pub fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let mut config = AppConfig::for_testing(temp_dir.path());
        modifier(&mut config);

        let repository = tulpar_storage::from_config(&config.repository)
            .expect("Failed to create repository");
        Self::build(temp_dir, config, repository)
    }

    /// Create a test server over a caller-supplied repository.
    pub fn with_repository<F>(repository: Arc<dyn PackageRepository>, modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let mut config = AppConfig::for_testing(temp_dir.path());
        modifier(&mut config);
        Self::build(temp_dir, config, repository)
    }

    fn build(temp_dir: TempDir, config: AppConfig, repository: Arc<dyn PackageRepository>) -> Self {
        let state = AppState::new(config, repository).expect("Failed to create state");
        let router = create_router(state.clone());
        Self {
            router,
            state,
            temp_dir,
        }
    }

    /// Repository root on disk.
    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn add_metadata(&self, name: &str, json: &str) -> &Self {
        let dir = self.root().join("packages").join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("metadata.json"), json).unwrap();
        self
    }

    pub fn add_artifact(&self, name: &str, arch: &str, version: &str, data: &[u8]) -> &Self {
        let dir = self.root().join("packages").join(name).join(arch);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(format!("{version}.apg")), data).unwrap();
        self
    }

    /// Send a GET as the client at `ip`.
    pub async fn get_from(&self, ip: &str, uri: &str) -> Response<Body> {
        self.send(client_request("GET", uri, ip)).await
    }

    /// Send a request through the router.
    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Send a GET as `ip` and decode the JSON body.
    pub async fn get_json(&self, ip: &str, uri: &str) -> (StatusCode, Value) {
        let response = self.get_from(ip, uri).await;
        let status = response.status();
        (status, body_json(response).await)
    }
}

/// Build a request that appears to arrive from `ip`.
#[allow(dead_code)]
pub fn client_request(method: &str, uri: &str, ip: &str) -> Request<Body> {
    let addr: SocketAddr = format!("{ip}:40000")
        .parse()
        .or_else(|_| format!("[{ip}]:40000").parse())
        .expect("invalid test client address");
    let mut request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    request.extensions_mut().insert(ConnectInfo(addr));
    request
}

/// Build an admin request carrying `token`.
#[allow(dead_code)]
pub fn admin_request(method: &str, uri: &str, token: Option<&str>) -> Request<Body> {
    let mut request = client_request(method, uri, "127.0.0.1");
    if let Some(token) = token {
        request.headers_mut().insert(
            "Authorization",
            format!("Bearer {token}").parse().unwrap(),
        );
    }
    request
}

#[allow(dead_code)]
pub async fn body_bytes(response: Response<Body>) -> bytes::Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
}

#[allow(dead_code)]
pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = body_bytes(response).await;
    if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    }
}
