//! The package mirror's axum application: route assembly, middleware
//! layering, adapter wiring, and process lifecycle.

pub mod admin;
pub mod api;
pub mod artifact;
pub mod auth;
pub mod error;
pub mod index;
pub mod job;
pub mod metadata;
pub mod ratelimit;
pub mod sync;

use std::sync::{Arc, OnceLock};
use std::time::Instant;

use axum::extract::State;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use registry_common::config::AppConfig;
use registry_core::ModelManager;
use registry_core::store::{
    Analytics, BlobStore, Clock, FsBlobStore, InProcessJobQueue, JobQueue, KVCache, MokaKvCache, NoopAnalytics,
    SystemClock,
};

pub use error::ServerError;
use job::JobProcessor;

/// Shared application state threaded through every handler and middleware
/// layer via axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub mm: ModelManager,
    pub jobs: JobProcessor,
    metrics_handle: PrometheusHandle,
    start_time: Instant,
}

impl AppState {
    /// Builds state around an already-constructed `ModelManager`, for unit
    /// and integration tests that never go through [`run`].
    pub fn new_for_test(mm: ModelManager) -> Self {
        Self {
            jobs: JobProcessor::new(mm.clone()),
            mm,
            metrics_handle: setup_metrics(),
            start_time: Instant::now(),
        }
    }
}

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the process-global Prometheus recorder once; repeated calls
/// (every test building its own `AppState`) reuse the same handle.
fn setup_metrics() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            PrometheusBuilder::new()
                .install_recorder()
                .unwrap_or_else(|_| PrometheusBuilder::new().build_recorder().handle())
        })
        .clone()
}

/// Builds the adapters named by `config.storage`. Returns the consumer
/// half of the job queue's channel when `QUEUE_DRIVER=memory` selected the
/// queued strategy, for the caller to spawn a drain task over.
async fn build_model_manager(
    config: &AppConfig,
) -> Result<(ModelManager, Option<tokio::sync::mpsc::Receiver<String>>), ServerError> {
    let db = registry_core::store::new_db_pool(&config.storage.db_url)
        .await
        .map_err(ServerError::Core)?;

    let blob_store: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(config.storage.storage_path.clone()));
    let kv_cache: Arc<dyn KVCache> = Arc::new(MokaKvCache::new());
    let analytics: Arc<dyn Analytics> = Arc::new(NoopAnalytics);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let (job_queue, consumer_rx) = match config.storage.queue_driver.as_deref() {
        Some("memory") => {
            let (queue, rx) = InProcessJobQueue::new(1024);
            (Some(Arc::new(queue) as Arc<dyn JobQueue>), Some(rx))
        }
        _ => (None, None),
    };

    let mm = ModelManager::new(db, blob_store, kv_cache, job_queue, analytics, clock, Arc::new(config.clone()));
    Ok((mm, consumer_rx))
}

/// Builds the adapters, assembles the router, and serves until a shutdown
/// signal arrives.
pub async fn run(config: AppConfig) -> Result<(), ServerError> {
    let (mm, consumer_rx) = build_model_manager(&config).await?;

    if let Some(rx) = consumer_rx {
        tokio::spawn(JobProcessor::run_consumer(mm.clone(), rx));
    }

    let state = AppState::new_for_test(mm);

    let app = Router::new()
        .merge(api::routes())
        .route_layer(axum::middleware::from_fn_with_state(state.clone(), ratelimit::rate_limit_middleware))
        .route_layer(axum::middleware::from_fn_with_state(state.clone(), auth::auth_middleware))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("x-frame-options"),
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ))
        .with_state(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await.map_err(ServerError::Io)?;
    tracing::info!(addr, "registry-http listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(ServerError::Io)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}

#[derive(serde::Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_seconds: u64,
}

#[derive(serde::Serialize)]
struct ReadyResponse {
    status: &'static str,
    database: &'static str,
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let response = HealthResponse {
        status: "healthy",
        uptime_seconds: state.start_time.elapsed().as_secs(),
    };
    (StatusCode::OK, Json(response))
}

async fn ready_handler(State(state): State<AppState>) -> impl IntoResponse {
    let db_status = match state.mm.health_check().await {
        Ok(true) => "connected",
        _ => "disconnected",
    };
    let is_ready = db_status == "connected";
    let response = ReadyResponse {
        status: if is_ready { "ready" } else { "not_ready" },
        database: db_status,
    };
    let status_code = if is_ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(response))
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics_handle.render()
}
