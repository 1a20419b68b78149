//! Test utilities for end-to-end testing
use crate::config::Config;
use crate::dispatch::{DispatchError, QueueMessage, QueueSession, TaskQueue};
use async_trait::async_trait;
use axum_test::TestServer;
use axum_test::multipart::{MultipartForm, Part};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const BEARER_COOKIE: &str = "bearer=T";

#[derive(Default)]
struct Recorded {
    connections: usize,
    published: Vec<QueueMessage>,
}

/// In-memory stand-in for the broker. Clones share what they record.
#[derive(Clone, Default)]
pub struct RecordingQueue {
    recorded: Arc<Mutex<Recorded>>,
    reject: bool,
}

impl RecordingQueue {
    /// A queue that accepts connections but nacks every publish
    pub fn rejecting() -> Self {
        Self {
            reject: true,
            ..Default::default()
        }
    }

    pub fn published(&self) -> Vec<QueueMessage> {
        self.recorded.lock().unwrap().published.clone()
    }

    pub fn connections(&self) -> usize {
        self.recorded.lock().unwrap().connections
    }
}

#[async_trait]
impl TaskQueue for RecordingQueue {
    async fn connect(&self) -> Result<Box<dyn QueueSession>, DispatchError> {
        self.recorded.lock().unwrap().connections += 1;
        Ok(Box::new(RecordingSession {
            recorded: self.recorded.clone(),
            reject: self.reject,
        }))
    }
}

struct RecordingSession {
    recorded: Arc<Mutex<Recorded>>,
    reject: bool,
}

#[async_trait]
impl QueueSession for RecordingSession {
    async fn publish(self: Box<Self>, message: QueueMessage) -> Result<(), DispatchError> {
        if self.reject {
            return Err(DispatchError::Rejected {
                queue: "babel".to_string(),
            });
        }
        self.recorded.lock().unwrap().published.push(message);
        Ok(())
    }
}

/// A running app wired to a mock resource store, a recording queue and a scratch sandbox.
pub struct TestApp {
    pub server: TestServer,
    pub resources: MockServer,
    pub queue: RecordingQueue,
    pub root: TempDir,
}

impl TestApp {
    pub fn root(&self) -> &Path {
        self.root.path()
    }

    /// Requests received by the mock resource store with the given method
    pub async fn received(&self, http_method: &str) -> Vec<wiremock::Request> {
        self.resources
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|request| request.method.as_str() == http_method)
            .collect()
    }
}

pub fn create_test_config(root: &Path, resource_store_url: &str) -> Config {
    let mut config = Config::default();
    config.uploads.folder = root.to_path_buf();
    config.resource_store.url = Url::parse(resource_store_url).expect("mock server URL is valid");
    config
}

pub async fn create_test_app() -> TestApp {
    create_test_app_with(|_| {}, RecordingQueue::default()).await
}

pub async fn create_test_app_with(configure: impl FnOnce(&mut Config), queue: RecordingQueue) -> TestApp {
    crate::install_crypto_provider();

    let resources = MockServer::start().await;
    let root = tempfile::tempdir().expect("Failed to create sandbox root");

    let mut config = create_test_config(root.path(), &resources.uri());
    configure(&mut config);

    let store = crate::resource_store::ReqwestResourceStore::new(&config.resource_store).expect("Failed to build resource store client");
    let app = crate::Application::with_collaborators(config, Arc::new(store), Arc::new(queue.clone()))
        .await
        .expect("Failed to create application");

    TestApp {
        server: app.into_test_server(),
        resources,
        queue,
        root,
    }
}

/// Answer `GET /v1.0.M1/surveys/my` with `surveys`.
pub async fn mount_owned_surveys(server: &MockServer, surveys: Value) {
    Mock::given(method("GET"))
        .and(path("/v1.0.M1/surveys/my"))
        .respond_with(ResponseTemplate::new(200).set_body_json(surveys))
        .mount(server)
        .await;
}

/// Answer `POST /v1.0.M1/surveys` with `status`, expecting exactly `times` calls.
pub async fn mount_replace_survey(server: &MockServer, status: u16, times: u64) {
    Mock::given(method("POST"))
        .and(path("/v1.0.M1/surveys"))
        .respond_with(ResponseTemplate::new(status))
        .expect(times)
        .mount(server)
        .await;
}

pub fn file_form(content_type: &str, contents: &[u8]) -> MultipartForm {
    let part = Part::bytes(contents.to_vec()).file_name("photo.png").mime_type(content_type);
    MultipartForm::new().add_part("file", part)
}

pub fn source_form(code: &str) -> MultipartForm {
    MultipartForm::new().add_text("clientCode", code.to_string())
}

/// Every regular file below `dir`, recursively. Empty if `dir` does not exist.
pub fn files_under(dir: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return found;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            found.extend(files_under(&path));
        } else {
            found.push(path);
        }
    }
    found.sort();
    found
}
