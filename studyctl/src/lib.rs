//! # studyctl: upload and dispatch service for the study authoring app
//!
//! `studyctl` handles the writes of the study editor that involve files: study icons, images for
//! image-choice steps, and client source code for custom task steps. Survey documents themselves
//! live in a remote resource store; this service never trusts a survey id from the browser, it
//! asks the store which surveys the caller owns on every write.
//!
//! ## Request flow
//!
//! Every upload goes through the same sequence, each step awaited before the next:
//!
//! 1. [`uploads::UploadGateway`] validates the multipart body (field present, type allowed, size
//!    within limit). Nothing is written yet.
//! 2. [`resource_store::verify_ownership`] lists the caller's surveys with the caller's own bearer
//!    token and picks out the target.
//! 3. [`storage::ShardedStore`] stages the bytes and renames them into
//!    `<uploads.folder>/files/<aa>/<bb>/<id><ext>`.
//! 4. [`resource_store::ResourceUpdater`] writes the survey back with the new path.
//! 5. For client source, [`dispatch::TaskDispatcher`] queues a transpile job on the broker.
//!
//! A rejected request (bad input, not owner) leaves no trace on disk. A failure after step 3
//! leaves the committed file in place.
//!
//! ## Configuration
//!
//! See [`config`]. The [`Config`] is loaded once in `main` and cloned into [`AppState`].

pub mod api;
pub mod auth;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod resource_store;
pub mod storage;
pub mod telemetry;
pub mod uploads;
pub mod views;

#[cfg(test)]
mod test;

use crate::{
    dispatch::{AmqpTaskQueue, TaskDispatcher, TaskQueue},
    resource_store::{ReqwestResourceStore, ResourceStore, ResourceUpdater},
    storage::ShardedStore,
    uploads::UploadGateway,
    views::{MiniJinjaRenderer, TemplateRenderer},
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post, put},
};
use bon::Builder;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, debug, info};

pub use config::Config;

/// Shared state handed to every handler.
///
/// # Example
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config)
///     .files(Arc::new(store))
///     .resources(resources.clone())
///     .updater(ResourceUpdater::new(resources))
///     .dispatcher(dispatcher)
///     .renderer(Arc::new(MiniJinjaRenderer::new()?))
///     .uploads(UploadGateway::new(size_limit))
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub files: Arc<ShardedStore>,
    pub resources: Arc<dyn ResourceStore>,
    pub updater: ResourceUpdater,
    pub dispatcher: TaskDispatcher,
    pub renderer: Arc<dyn TemplateRenderer>,
    pub uploads: UploadGateway,
}

impl AppState {
    /// Wire the components together from configuration and the two outbound collaborators.
    pub async fn from_parts(config: Config, resources: Arc<dyn ResourceStore>, queue: Arc<dyn TaskQueue>) -> anyhow::Result<Self> {
        let files = ShardedStore::open(&config.uploads.folder).await?;
        info!(root = %files.root().display(), "Upload store ready");

        Ok(AppState::builder()
            .files(Arc::new(files))
            .resources(resources.clone())
            .updater(ResourceUpdater::new(resources))
            .dispatcher(TaskDispatcher::new(queue, config.dispatch.mode))
            .renderer(Arc::new(MiniJinjaRenderer::new()?))
            .uploads(UploadGateway::new(config.uploads.size_limit))
            .config(config)
            .build())
    }
}

/// Install the process-wide rustls provider. Safe to call more than once.
pub fn install_crypto_provider() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

pub fn build_router(state: AppState) -> Router {
    let upload_limit = DefaultBodyLimit::max(state.config.uploads.size_limit);

    Router::new()
        .route(
            "/studies/{id}/icon",
            get(api::handlers::icons::icon_page).merge(put(api::handlers::icons::upload_icon).layer(upload_limit)),
        )
        .route(
            "/studies/{id}/tasks/imageChoice/upload",
            put(api::handlers::icons::upload_image_choice).layer(upload_limit),
        )
        .route(
            "/studies/{id}/tasks/{step_id}/clientSource",
            post(api::handlers::task_settings::upload_client_source).layer(upload_limit),
        )
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
}

/// The configured server: create with [`Application::new`], run with [`Application::serve`].
pub struct Application {
    router: Router,
    config: Config,
}

impl Application {
    /// Connect the real collaborators: the HTTP resource store and the AMQP broker.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting studyctl with configuration: {:#?}", config);

        let resources: Arc<dyn ResourceStore> = Arc::new(ReqwestResourceStore::new(&config.resource_store)?);
        let queue: Arc<dyn TaskQueue> = Arc::new(AmqpTaskQueue::new(&config.dispatch));
        Self::with_collaborators(config, resources, queue).await
    }

    pub async fn with_collaborators(config: Config, resources: Arc<dyn ResourceStore>, queue: Arc<dyn TaskQueue>) -> anyhow::Result<Self> {
        let state = AppState::from_parts(config.clone(), resources, queue).await?;
        Ok(Self {
            router: build_router(state),
            config,
        })
    }

    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router.into_make_service()).expect("Failed to create test server")
    }

    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!("studyctl listening on http://{}", bind_addr);

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();
        Ok(())
    }
}
