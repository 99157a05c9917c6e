//! API Handlers
use axum::{
    extract::{Query, State},
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use telemetry_core::normalizer::{normalize_rows, site_check_row, summary_row};
use telemetry_core::{
    sample_records, BackendError, DataSource, NormalizedRecord, ReachabilitySummaryRow, Row,
    SiteCheckRow, TelemetryError, TelemetryResult, TELEMETRY_VERSION,
};

use crate::AppState;

/// Tells `/api/data` consumers whether records are live, cached or sample data.
pub const DATA_SOURCE_HEADER: HeaderName = HeaderName::from_static("x-data-source");

const HEALTH_TIMEOUT: Duration = Duration::from_secs(10);

type Params = Query<HashMap<String, String>>;

/// Renders any failure as `{"error": "..."}` with a 500.
#[derive(Debug)]
pub struct ApiError(pub TelemetryError);

impl From<TelemetryError> for ApiError {
    fn from(err: TelemetryError) -> Self {
        Self(err)
    }
}

impl From<BackendError> for ApiError {
    fn from(err: BackendError) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::warn!(code = self.0.error_code(), error = %self.0, "request failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": self.0.to_string() })),
        )
            .into_response()
    }
}

/// `GET /api/data[?fresh=1]`: never fails; degrades to sample records.
pub async fn data(State(state): State<AppState>, Query(params): Params) -> Response {
    let bypass = params.get("fresh").map(String::as_str) == Some("1");
    let (records, source) = load_records(&state, bypass).await;
    let mut response = Json(records).into_response();
    response
        .headers_mut()
        .insert(DATA_SOURCE_HEADER, HeaderValue::from_static(source.as_str()));
    response
}

async fn load_records(state: &AppState, bypass: bool) -> (Vec<NormalizedRecord>, DataSource) {
    let ttl = state.config.cache_ttl();
    if let Some(records) = state.cache.read(ttl, bypass).await {
        state.metrics.cache_hits.inc();
        return (records, DataSource::Cache);
    }

    let _refresh = state.refresh.lock().await;
    // A concurrent request may have refilled the slot while we waited.
    if !bypass {
        if let Some(records) = state.cache.read(ttl, false).await {
            state.metrics.cache_hits.inc();
            return (records, DataSource::Cache);
        }
    }
    state.metrics.cache_misses.inc();

    match fetch_recent(state).await {
        Ok(records) if !records.is_empty() => {
            if let Err(e) = state.cache.write(&records).await {
                tracing::warn!(error = %e, "snapshot write failed; serving live records uncached");
            }
            (records, DataSource::Live)
        }
        Ok(_) => {
            tracing::warn!("backend returned no records; serving sample data");
            state.metrics.sample_fallbacks.inc();
            (sample_records(), DataSource::Sample)
        }
        Err(e) => {
            tracing::warn!(error = %e, "live fetch failed; serving sample data");
            state.metrics.sample_fallbacks.inc();
            (sample_records(), DataSource::Sample)
        }
    }
}

async fn fetch_recent(state: &AppState) -> TelemetryResult<Vec<NormalizedRecord>> {
    let query = state.queries.recent_records(state.config.recent_limit)?;
    let rows = run_query(state, &query).await?;
    let records = normalize_rows(&rows);
    state.metrics.records_normalized.inc_by(records.len() as u64);
    tracing::info!(records = records.len(), "normalized live records");
    Ok(records)
}

async fn run_query(state: &AppState, query: &str) -> TelemetryResult<Vec<Row>> {
    state
        .backend
        .execute(query, state.config.query_timeout())
        .await
        .map_err(|e| {
            state.metrics.backend_failures.inc();
            TelemetryError::from(e)
        })
}

/// `GET /api/raw`: latest rows exactly as the backend returns them.
pub async fn raw(State(state): State<AppState>) -> Result<Json<Vec<Row>>, ApiError> {
    let query = state.queries.raw_debug(state.config.raw_limit)?;
    Ok(Json(run_query(&state, &query).await?))
}

/// `GET /api/reachability/summary[?days=N]`
pub async fn reachability_summary(
    State(state): State<AppState>,
    Query(params): Params,
) -> Result<Json<Vec<ReachabilitySummaryRow>>, ApiError> {
    let days = window_param(&params, state.config.summary_window_days)?;
    let query = state.queries.reachability_summary(days)?;
    let rows = run_query(&state, &query).await?;
    Ok(Json(rows.iter().map(summary_row).collect()))
}

/// `GET /api/reachability/site?url=...`
pub async fn reachability_site(
    State(state): State<AppState>,
    Query(params): Params,
) -> Result<Json<Vec<SiteCheckRow>>, ApiError> {
    let url = params
        .get("url")
        .filter(|u| !u.is_empty())
        .ok_or(TelemetryError::MissingParameter("url"))?;
    let query = state.queries.reachability_site(url, state.config.site_limit)?;
    let rows = run_query(&state, &query).await?;
    Ok(Json(rows.iter().map(site_check_row).collect()))
}

/// `GET /api/summary[?days=N]`: fleet speed averages.
pub async fn summary(
    State(state): State<AppState>,
    Query(params): Params,
) -> Result<Json<Vec<Row>>, ApiError> {
    let days = window_param(&params, state.config.stats_window_days)?;
    let query = state.queries.summary_stats(days)?;
    Ok(Json(run_query(&state, &query).await?))
}

pub async fn health(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let timeout = state.config.query_timeout().min(HEALTH_TIMEOUT);
    state
        .backend
        .check_access(state.queries.dataset(), timeout)
        .await?;
    let cache_age = state.cache.age().await;
    let snapshot = state.cache.load().await;
    Ok(Json(json!({
        "status": "ok",
        "backend": "reachable",
        "version": TELEMETRY_VERSION,
        "cache_age_secs": cache_age.map(|age| age.as_secs()),
        "cache_written_at": snapshot.as_ref().map(|s| s.written_at_utc().to_rfc3339()),
        "cache_records": snapshot.as_ref().map(|s| s.records.len()),
    })))
}

pub async fn metrics(State(state): State<AppState>) -> Response {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => ApiError(TelemetryError::Config(format!("metrics encoding: {e}"))).into_response(),
    }
}

fn window_param(params: &HashMap<String, String>, default: u32) -> TelemetryResult<u32> {
    match params.get("days") {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| TelemetryError::invalid("days", format!("`{raw}` is not a whole number"))),
    }
}
