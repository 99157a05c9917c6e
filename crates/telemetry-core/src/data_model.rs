//! Data Model: RawRecord, NormalizedRecord, reachability rows
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One row of the recent-records query, as handed back by the backend.
///
/// Sub-documents (`speed`, `reachability`, `device`) arrive as JSON-encoded
/// strings and are decoded lazily by the normalizer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecord {
    pub publish_time: Option<Value>,
    pub trigger: Option<Value>,
    pub version: Option<Value>,
    pub duration_ms: Option<Value>,
    pub speed: Option<Value>,
    pub reachability: Option<Value>,
    pub device: Option<Value>,
    pub ingest_source_ip: Option<Value>,
    pub request_id: Option<Value>,
}

impl RawRecord {
    /// Pick the known columns out of a backend row. Never fails; unknown
    /// columns are ignored and missing ones stay `None`.
    pub fn from_row(row: &Map<String, Value>) -> Self {
        let take = |key: &str| row.get(key).filter(|v| !v.is_null()).cloned();
        Self {
            publish_time: take("publish_time"),
            trigger: take("trigger"),
            version: take("version"),
            duration_ms: take("durationMs"),
            speed: take("speed"),
            reachability: take("reachability"),
            device: take("device"),
            ingest_source_ip: take("ingestSourceIp"),
            request_id: take("requestId"),
        }
    }
}

/// Flat, stable output schema served by `/api/data` and persisted in the snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub publish_time: Option<String>,
    pub trigger: Option<String>,
    pub version: Option<String>,
    pub duration_ms: Option<f64>,
    pub user_email: Option<String>,
    pub device_make: String,
    pub device_type: String,
    pub device_os: String,
    pub device_os_version: String,
    pub isp_provider: String,
    pub city: String,
    pub download_speed: f64,
    pub upload_speed: f64,
    pub ping_ms: f64,
    pub sites_ok: u32,
    pub sites_total: u32,
    pub request_id: Option<String>,
}

/// Placeholder for text fields with no usable source value.
pub const UNKNOWN: &str = "Unknown";

/// Per-URL availability aggregate, computed entirely by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReachabilitySummaryRow {
    pub url: Option<String>,
    pub total_checks: u64,
    pub ok_checks: u64,
    pub availability_pct: f64,
    pub avg_latency_ms: Option<f64>,
    pub max_latency_ms: Option<f64>,
    pub min_latency_ms: Option<f64>,
    pub last_seen: Option<String>,
}

/// One probe result for a single site, newest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteCheckRow {
    pub ts: Option<String>,
    #[serde(rename = "requestId")]
    pub request_id: Option<String>,
    pub url: Option<String>,
    pub ok: Option<bool>,
    pub error: Option<String>,
    pub status: Option<i64>,
    pub latency_ms: Option<f64>,
}

/// Where the records of an `/api/data` response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Live,
    Cache,
    Sample,
}

impl DataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Cache => "cache",
            Self::Sample => "sample",
        }
    }
}

/// Fixed two-record payload served when live data is unavailable.
pub fn sample_records() -> Vec<NormalizedRecord> {
    vec![
        NormalizedRecord {
            publish_time: Some("2025-08-13T02:30:00Z".to_string()),
            trigger: Some("sample".to_string()),
            version: None,
            duration_ms: None,
            user_email: None,
            device_make: "Google".to_string(),
            device_type: "chromebook".to_string(),
            device_os: UNKNOWN.to_string(),
            device_os_version: UNKNOWN.to_string(),
            isp_provider: "Comcast".to_string(),
            city: "New York".to_string(),
            download_speed: 45.2,
            upload_speed: 12.8,
            ping_ms: 28.5,
            sites_ok: 0,
            sites_total: 0,
            request_id: Some("sample-1".to_string()),
        },
        NormalizedRecord {
            publish_time: Some("2025-08-13T02:25:00Z".to_string()),
            trigger: Some("sample".to_string()),
            version: None,
            duration_ms: None,
            user_email: None,
            device_make: "Apple".to_string(),
            device_type: "desktop".to_string(),
            device_os: UNKNOWN.to_string(),
            device_os_version: UNKNOWN.to_string(),
            isp_provider: "Verizon".to_string(),
            city: "Boston".to_string(),
            download_speed: 78.9,
            upload_speed: 35.2,
            ping_ms: 18.3,
            sites_ok: 0,
            sites_total: 0,
            request_id: Some("sample-2".to_string()),
        },
    ]
}
