//! Query text for the dashboard's read patterns.
//!
//! Every query targets one raw ingest table whose rows carry the
//! JSON-encoded `speed`, `reachability` and `device` columns.
//!
//! The per-site query interpolates a caller-supplied URL into a string
//! literal. The URL is first checked against a URL-safe allow-list and then
//! escaped; this guards the literal boundary only and assumes a trusted,
//! internal caller.

use crate::error::{TelemetryError, TelemetryResult};
use lazy_static::lazy_static;
use regex::Regex;

pub const DEFAULT_SUMMARY_WINDOW_DAYS: u32 = 7;
pub const DEFAULT_SITE_LIMIT: u32 = 200;
pub const DEFAULT_RAW_LIMIT: u32 = 50;
pub const MAX_WINDOW_DAYS: u32 = 365;
pub const MAX_URL_LEN: usize = 2048;

lazy_static! {
    /// `project.dataset.table` or `dataset.table`
    static ref TABLE_ID: Regex =
        Regex::new(r"^[A-Za-z0-9_-]+(\.[A-Za-z0-9_-]+){1,2}$").unwrap();

    /// RFC 3986 unreserved and reserved characters plus `%`, minus `'`.
    static ref URL_SAFE: Regex =
        Regex::new(r"^[A-Za-z0-9\-._~:/?#\[\]@!$&()*+,;=%]+$").unwrap();
}

/// Builds query strings for one table. Holds no mutable state.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    table: String,
}

impl QueryBuilder {
    pub fn new(table: impl Into<String>) -> TelemetryResult<Self> {
        let table = table.into();
        if !TABLE_ID.is_match(&table) {
            return Err(TelemetryError::invalid(
                "table",
                format!("`{table}` is not a dataset.table identifier"),
            ));
        }
        Ok(Self { table })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Dataset portion of the table id, for access checks.
    pub fn dataset(&self) -> &str {
        self.table
            .rsplit_once('.')
            .map(|(dataset, _)| dataset)
            .unwrap_or(&self.table)
    }

    /// Latest records, newest ingest first. The backend applies its own row cap.
    pub fn recent_records(&self, limit: u32) -> TelemetryResult<String> {
        check_limit(limit)?;
        Ok(format!(
            "SELECT
  ingestReceivedAt AS publish_time,
  trigger,
  durationMs,
  version,
  speed,
  reachability,
  device,
  ingestSourceIp,
  requestId
FROM `{table}`
ORDER BY ingestReceivedAt DESC
LIMIT {limit}",
            table = self.table,
        ))
    }

    /// Per-URL availability over a trailing window, worst sites first.
    pub fn reachability_summary(&self, window_days: u32) -> TelemetryResult<String> {
        check_window(window_days)?;
        Ok(format!(
            "WITH expanded AS (
  SELECT
    JSON_VALUE(r, '$.url') AS url,
    (JSON_VALUE(r, '$.ok') = 'true'
      OR (JSON_VALUE(r, '$.status') = '200' AND JSON_VALUE(r, '$.error') IS NULL)) AS ok,
    CAST(JSON_VALUE(r, '$.latencyMs') AS FLOAT64) AS latency_ms,
    ingestReceivedAt AS ts
  FROM `{table}`,
  UNNEST(JSON_QUERY_ARRAY(reachability, '$.results')) r
  WHERE ingestReceivedAt >= TIMESTAMP_SUB(CURRENT_TIMESTAMP(), INTERVAL {window_days} DAY)
)
SELECT
  url,
  COUNT(*) AS total_checks,
  SUM(CASE WHEN ok THEN 1 ELSE 0 END) AS ok_checks,
  ROUND(100 * SUM(CASE WHEN ok THEN 1 ELSE 0 END) / COUNT(*), 2) AS availability_pct,
  ROUND(AVG(latency_ms), 2) AS avg_latency_ms,
  ROUND(MAX(latency_ms), 2) AS max_latency_ms,
  ROUND(MIN(latency_ms), 2) AS min_latency_ms,
  MAX(ts) AS last_seen
FROM expanded
GROUP BY url
ORDER BY availability_pct ASC, url",
            table = self.table,
        ))
    }

    /// Individual probe results for one URL, newest first.
    ///
    /// Only for trusted input: `url` must pass [`validate_probe_url`].
    pub fn reachability_site(&self, url: &str, limit: u32) -> TelemetryResult<String> {
        check_limit(limit)?;
        validate_probe_url(url)?;
        let literal = escape_string_literal(url);
        Ok(format!(
            "SELECT
  ingestReceivedAt AS ts,
  requestId,
  JSON_VALUE(r, '$.url') AS url,
  JSON_VALUE(r, '$.ok') = 'true' AS ok,
  JSON_VALUE(r, '$.error') AS error,
  CAST(JSON_VALUE(r, '$.status') AS INT64) AS status,
  CAST(JSON_VALUE(r, '$.latencyMs') AS FLOAT64) AS latency_ms
FROM `{table}`,
UNNEST(JSON_QUERY_ARRAY(reachability, '$.results')) r
WHERE JSON_VALUE(r, '$.url') = '{literal}'
ORDER BY ts DESC
LIMIT {limit}",
            table = self.table,
        ))
    }

    /// Unprocessed sub-document columns, for debugging the normalizer.
    pub fn raw_debug(&self, limit: u32) -> TelemetryResult<String> {
        check_limit(limit)?;
        Ok(format!(
            "SELECT ingestReceivedAt, trigger, speed, reachability, device, requestId
FROM `{table}`
ORDER BY ingestReceivedAt DESC
LIMIT {limit}",
            table = self.table,
        ))
    }

    /// Fleet-wide speed averages and device count over a trailing window.
    pub fn summary_stats(&self, window_days: u32) -> TelemetryResult<String> {
        check_window(window_days)?;
        Ok(format!(
            "SELECT
  COUNT(*) AS total_tests,
  AVG(CAST(JSON_EXTRACT_SCALAR(speed, '$.downloadMbps') AS FLOAT64)) AS avg_download,
  AVG(CAST(JSON_EXTRACT_SCALAR(speed, '$.uploadMbps') AS FLOAT64)) AS avg_upload,
  AVG(CAST(JSON_EXTRACT_SCALAR(speed, '$.pingMs') AS FLOAT64)) AS avg_ping,
  COUNT(DISTINCT ingestSourceIp) AS unique_devices
FROM `{table}`
WHERE DATE(ingestReceivedAt) >= DATE_SUB(CURRENT_DATE(), INTERVAL {window_days} DAY)
  AND speed IS NOT NULL",
            table = self.table,
        ))
    }
}

/// Allow-list check for a probe URL before it goes near query text.
pub fn validate_probe_url(url: &str) -> TelemetryResult<()> {
    if url.is_empty() {
        return Err(TelemetryError::MissingParameter("url"));
    }
    if url.len() > MAX_URL_LEN {
        return Err(TelemetryError::invalid(
            "url",
            format!("longer than {MAX_URL_LEN} characters"),
        ));
    }
    if !URL_SAFE.is_match(url) {
        return Err(TelemetryError::invalid(
            "url",
            "contains characters outside the URL-safe set",
        ));
    }
    Ok(())
}

/// Escape text for a single-quoted string literal.
pub fn escape_string_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out
}

fn check_limit(limit: u32) -> TelemetryResult<()> {
    if limit == 0 {
        return Err(TelemetryError::invalid("limit", "must be at least 1"));
    }
    Ok(())
}

fn check_window(days: u32) -> TelemetryResult<()> {
    if days == 0 || days > MAX_WINDOW_DAYS {
        return Err(TelemetryError::invalid(
            "window",
            format!("must be between 1 and {MAX_WINDOW_DAYS} days"),
        ));
    }
    Ok(())
}
