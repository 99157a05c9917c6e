//! Telemetry API: dashboard endpoints over the analytics backend
pub mod handlers;
pub mod metrics;
pub mod middleware;

use anyhow::Context;
use axum::{routing::get, Router};
use std::ops::Deref;
use std::sync::Arc;
use telemetry_core::{
    BackendClient, QueryBuilder, SnapshotCache, TelemetryConfig, TelemetryError, TelemetryResult,
};
use tokio::sync::Mutex;
use tower_http::services::ServeDir;

use crate::metrics::ApiMetrics;

/// Shared per-process state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppInner>,
}

pub struct AppInner {
    pub config: TelemetryConfig,
    pub queries: QueryBuilder,
    pub backend: BackendClient,
    pub cache: SnapshotCache,
    /// Held across the cache re-check, backend fetch and cache write of `/api/data`.
    pub refresh: Mutex<()>,
    pub metrics: ApiMetrics,
}

impl AppState {
    pub fn new(config: TelemetryConfig) -> TelemetryResult<Self> {
        let queries = QueryBuilder::new(config.table.clone())?;
        let backend = BackendClient::new(config.backend.clone());
        let cache = SnapshotCache::new(config.cache_path.clone());
        let metrics = ApiMetrics::new()
            .map_err(|e| TelemetryError::Config(format!("metrics registry: {e}")))?;
        Ok(Self {
            inner: Arc::new(AppInner {
                config,
                queries,
                backend,
                cache,
                refresh: Mutex::new(()),
                metrics,
            }),
        })
    }
}

impl Deref for AppState {
    type Target = AppInner;

    fn deref(&self) -> &AppInner {
        &self.inner
    }
}

/// API routes match exact paths (query string aside); anything else, including
/// `/api/raw/`, goes to the static file fallback.
pub fn create_app(state: AppState) -> Router {
    let static_files = ServeDir::new(&state.config.static_dir);
    Router::new()
        .route("/api/data", get(handlers::data))
        .route("/api/raw", get(handlers::raw))
        .route("/api/reachability/summary", get(handlers::reachability_summary))
        .route("/api/reachability/site", get(handlers::reachability_site))
        .route("/api/summary", get(handlers::summary))
        .route("/api/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .fallback_service(static_files)
        .layer(middleware::cors())
        .layer(middleware::trace())
        .with_state(state)
}

pub async fn run(config: TelemetryConfig) -> anyhow::Result<()> {
    let addr = config.socket_addr()?;
    let state = AppState::new(config)?;
    let app = create_app(state.clone());
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    let dashboard = state.config.dashboard_url();
    tracing::info!(%dashboard, "telemetry dashboard available");
    tracing::info!(api = %format!("http://{addr}/api/data"), "data API available");
    tracing::info!(static_dir = %state.config.static_dir.display(), "serving static files");

    if state.config.open_browser {
        open_in_browser(&dashboard);
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    tracing::info!("dashboard server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "ctrl-c handler unavailable");
        std::future::pending::<()>().await;
    }
}

/// Best effort; failures are logged and otherwise ignored.
fn open_in_browser(url: &str) {
    let mut command = if cfg!(target_os = "macos") {
        std::process::Command::new("open")
    } else if cfg!(target_os = "windows") {
        let mut c = std::process::Command::new("cmd");
        c.args(["/C", "start", ""]);
        c
    } else {
        std::process::Command::new("xdg-open")
    };
    command
        .arg(url)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null());
    if let Err(e) = command.spawn() {
        tracing::warn!(error = %e, %url, "could not open browser");
    }
}
