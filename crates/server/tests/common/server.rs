//! Server test utilities.

use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::connect_info::MockConnectInfo;
use axum::http::{Request, Response};
use pasta_core::config::AppConfig;
use pasta_core::{MimeLookup, MimeTypes};
use pasta_server::{AppState, PublicListing, create_router};
use pasta_storage::RecordStore;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

/// Address reported for requests that do not set their own ConnectInfo.
pub const TEST_CLIENT: ([u8; 4], u16) = ([127, 0, 0, 1], 40000);

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: Router,
    pub state: AppState,
    storage_path: PathBuf,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server with temporary storage.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let storage_path = temp_dir.path().join("pastas");

        let mut config = AppConfig::for_testing();
        config.storage.path = storage_path.clone();
        modifier(&mut config);

        let store = RecordStore::open(
            &config.storage.path,
            config.storage.id_length,
            config.storage.token_length,
        )
        .await
        .expect("Failed to open record store");
        let public = PublicListing::load(&store, config.public.max_entries)
            .await
            .expect("Failed to load public listing");

        let mut types = MimeTypes::new();
        types.insert("txt", "text/plain");
        types.insert("png", "image/png");
        let mime: Arc<dyn MimeLookup> = Arc::new(types);

        let state = AppState::new(config, Arc::new(store), Arc::new(public), mime);
        let router =
            create_router(state.clone()).layer(MockConnectInfo(SocketAddr::from(TEST_CLIENT)));

        Self {
            router,
            state,
            storage_path,
            _temp_dir: temp_dir,
        }
    }

    /// Directory holding the record files.
    pub fn storage_path(&self) -> &Path {
        &self.storage_path
    }

    /// Whether a file for `id` exists on disk.
    pub fn record_file_exists(&self, id: &str) -> bool {
        self.storage_path.join(id).exists()
    }

    /// Names of all record files (the public index excluded).
    pub fn record_files(&self) -> Vec<String> {
        std::fs::read_dir(&self.storage_path)
            .expect("Failed to read storage directory")
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .filter(|name| name != pasta_server::public::INDEX_FILE)
            .collect()
    }

    /// Send a request through the router.
    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible")
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.send(Request::get(uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn delete(&self, uri: &str) -> Response<Body> {
        self.send(Request::delete(uri).body(Body::empty()).unwrap())
            .await
    }

    /// POST a raw body to `/` with extra headers.
    pub async fn post_raw(
        &self,
        uri: &str,
        body: impl Into<Body>,
        headers: &[(&str, &str)],
    ) -> Response<Body> {
        let mut builder = Request::post(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        self.send(builder.body(body.into()).unwrap()).await
    }

    /// Upload a payload and return `(id, token)` from the JSON reply.
    pub async fn upload(&self, body: &'static str, headers: &[(&str, &str)]) -> (String, String) {
        let response = self.post_raw("/?ret=json", body, headers).await;
        assert_eq!(response.status(), 200, "upload failed");
        let json = body_json(response).await;
        let url = json["url"].as_str().expect("url in reply").to_string();
        let id = url.rsplit('/').next().expect("id in url").to_string();
        let token = json["token"].as_str().expect("token in reply").to_string();
        (id, token)
    }
}

/// Collect a response body.
#[allow(dead_code)]
pub async fn body_bytes(response: Response<Body>) -> Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read body")
}

#[allow(dead_code)]
pub async fn body_text(response: Response<Body>) -> String {
    String::from_utf8(body_bytes(response).await.to_vec()).expect("body is not UTF-8")
}

#[allow(dead_code)]
pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).expect("body is not JSON")
}
