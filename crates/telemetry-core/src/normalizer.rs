//! Record normalization.
//!
//! Flattens one raw backend row into a [`NormalizedRecord`]:
//! - JSON-encoded sub-documents are decoded independently; a bad one becomes
//!   an empty mapping without touching the rest of the record
//! - device and ISP metadata default to `"Unknown"`
//! - speed metrics accept numbers or numeric strings and default to `0`
//! - reachability results are reduced to `sites_ok` / `sites_total`
//!
//! The backend's JSON output renders most scalars as strings, so the
//! reachability row shapers here use the same lenient coercions.

use crate::data_model::{
    NormalizedRecord, RawRecord, ReachabilitySummaryRow, SiteCheckRow, UNKNOWN,
};
use serde_json::{Map, Value};

/// Normalize one raw record. Total: produces a record for any input.
pub fn normalize(raw: &RawRecord) -> NormalizedRecord {
    let speed = decode_subdocument(raw.speed.as_ref());
    let reachability = decode_subdocument(raw.reachability.as_ref());
    let device = decode_subdocument(raw.device.as_ref());

    let device_meta = nested_map(&device, "device");
    let isp_meta = nested_map(&device, "isp");
    let user_email = nested_map(&device, "user")
        .get("email")
        .and_then(Value::as_str)
        .map(str::to_string);

    let (sites_ok, sites_total) = count_reachable(&reachability);

    let ping = speed
        .get("pingMs")
        .filter(|v| !v.is_null())
        .or_else(|| speed.get("pingms"));

    NormalizedRecord {
        publish_time: raw.publish_time.as_ref().and_then(coerce_text),
        trigger: raw.trigger.as_ref().and_then(coerce_text),
        version: raw.version.as_ref().and_then(coerce_text),
        duration_ms: raw.duration_ms.as_ref().and_then(coerce_number),
        user_email,
        device_make: text_or_unknown(&device_meta, "make"),
        device_type: text_or_unknown(&device_meta, "type"),
        device_os: text_or_unknown(&device_meta, "os"),
        device_os_version: text_or_unknown(&device_meta, "osVersion"),
        isp_provider: text_or_unknown(&isp_meta, "provider"),
        city: text_or_unknown(&isp_meta, "city"),
        download_speed: speed.get("downloadMbps").and_then(coerce_number).unwrap_or(0.0),
        upload_speed: speed.get("uploadMbps").and_then(coerce_number).unwrap_or(0.0),
        ping_ms: ping.and_then(coerce_number).unwrap_or(0.0),
        sites_ok,
        sites_total,
        request_id: raw.request_id.as_ref().and_then(coerce_text),
    }
}

/// Normalize every object row of a backend result set.
pub fn normalize_rows(rows: &[Map<String, Value>]) -> Vec<NormalizedRecord> {
    rows.iter()
        .map(|row| normalize(&RawRecord::from_row(row)))
        .collect()
}

/// Decode a JSON-encoded sub-document. Anything that is not a non-empty
/// string holding a JSON object yields an empty mapping.
pub fn decode_subdocument(value: Option<&Value>) -> Map<String, Value> {
    let decoded = match value {
        Some(Value::String(encoded)) if !encoded.trim().is_empty() => {
            serde_json::from_str::<Value>(encoded).ok()
        }
        _ => None,
    };
    match decoded {
        Some(Value::Object(map)) => map,
        Some(_) => {
            tracing::debug!("sub-document decoded to a non-object; using empty mapping");
            Map::new()
        }
        None => {
            if value.is_some_and(|v| v.is_string()) {
                tracing::debug!("sub-document is not valid JSON; using empty mapping");
            }
            Map::new()
        }
    }
}

/// A reachability result is ok when `ok` is literally `true`, or when
/// `status` is 200 and `error` is null or absent.
pub fn is_probe_ok(result: &Value) -> bool {
    let Some(entry) = result.as_object() else {
        return false;
    };
    if entry.get("ok") == Some(&Value::Bool(true)) {
        return true;
    }
    let status_200 = entry
        .get("status")
        .and_then(Value::as_f64)
        .is_some_and(|status| status == 200.0);
    let no_error = entry.get("error").map_or(true, Value::is_null);
    status_200 && no_error
}

/// Returns `(sites_ok, sites_total)` for a decoded reachability document.
pub fn count_reachable(reachability: &Map<String, Value>) -> (u32, u32) {
    let Some(results) = reachability.get("results").and_then(Value::as_array) else {
        return (0, 0);
    };
    let total = saturating_u32(results.len());
    let ok = saturating_u32(results.iter().filter(|r| is_probe_ok(r)).count());
    (ok, total)
}

/// Numbers pass through, numeric strings are parsed, everything else is `None`.
pub fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

/// Strings pass through; numbers and booleans are rendered as text.
pub fn coerce_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Native booleans or the `"true"` / `"false"` strings the backend emits.
pub fn coerce_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) if s.eq_ignore_ascii_case("true") => Some(true),
        Value::String(s) if s.eq_ignore_ascii_case("false") => Some(false),
        _ => None,
    }
}

/// Shape one row of the reachability-summary query.
pub fn summary_row(row: &Map<String, Value>) -> ReachabilitySummaryRow {
    let number = |key: &str| row.get(key).and_then(coerce_number);
    let count = |key: &str| number(key).map(|n| n.max(0.0) as u64).unwrap_or(0);
    ReachabilitySummaryRow {
        url: row.get("url").and_then(coerce_text),
        total_checks: count("total_checks"),
        ok_checks: count("ok_checks"),
        availability_pct: number("availability_pct").unwrap_or(0.0),
        avg_latency_ms: number("avg_latency_ms"),
        max_latency_ms: number("max_latency_ms"),
        min_latency_ms: number("min_latency_ms"),
        last_seen: row.get("last_seen").and_then(coerce_text),
    }
}

/// Shape one row of the per-site reachability query.
pub fn site_check_row(row: &Map<String, Value>) -> SiteCheckRow {
    SiteCheckRow {
        ts: row.get("ts").and_then(coerce_text),
        request_id: row.get("requestId").and_then(coerce_text),
        url: row.get("url").and_then(coerce_text),
        ok: row.get("ok").and_then(coerce_bool),
        error: row.get("error").and_then(coerce_text),
        status: row
            .get("status")
            .and_then(coerce_number)
            .map(|n| n as i64),
        latency_ms: row.get("latency_ms").and_then(coerce_number),
    }
}

fn nested_map(parent: &Map<String, Value>, key: &str) -> Map<String, Value> {
    match parent.get(key) {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    }
}

fn text_or_unknown(meta: &Map<String, Value>, key: &str) -> String {
    meta.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or(UNKNOWN)
        .to_string()
}

fn saturating_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(speed: Value, reachability: Value, device: Value) -> RawRecord {
        RawRecord {
            speed: Some(speed),
            reachability: Some(reachability),
            device: Some(device),
            ..RawRecord::default()
        }
    }

    fn assert_all_defaults(record: &NormalizedRecord) {
        assert_eq!(record.device_make, UNKNOWN);
        assert_eq!(record.device_type, UNKNOWN);
        assert_eq!(record.device_os, UNKNOWN);
        assert_eq!(record.device_os_version, UNKNOWN);
        assert_eq!(record.isp_provider, UNKNOWN);
        assert_eq!(record.city, UNKNOWN);
        assert_eq!(record.user_email, None);
        assert_eq!(record.download_speed, 0.0);
        assert_eq!(record.upload_speed, 0.0);
        assert_eq!(record.ping_ms, 0.0);
        assert_eq!(record.sites_ok, 0);
        assert_eq!(record.sites_total, 0);
    }

    #[test]
    fn test_empty_record_gets_defaults() {
        assert_all_defaults(&normalize(&RawRecord::default()));
    }

    #[test]
    fn test_garbage_subdocuments_get_defaults() {
        let cases = [
            raw(json!(""), json!("   "), json!("not json")),
            raw(json!("[1,2,3]"), json!("42"), json!("\"text\"")),
            raw(json!(17), json!(true), json!([])),
            raw(json!("{\"downloadMbps\": {}}"), json!("{\"results\": 5}"), json!("{\"device\": 1, \"isp\": []}")),
            // Only JSON-encoded strings are decoded; a bare object is not.
            raw(
                json!({"downloadMbps": 50}),
                json!({"results": [{"ok": true}]}),
                json!({"device": {"make": "HP"}, "isp": {"provider": "Spectrum"}}),
            ),
        ];
        for case in &cases {
            assert_all_defaults(&normalize(case));
        }
    }

    #[test]
    fn test_one_bad_subdocument_does_not_spoil_others() {
        let record = normalize(&raw(
            json!("{\"downloadMbps\": \"42.5\"}"),
            Value::Null,
            json!("not json"),
        ));
        assert_eq!(record.download_speed, 42.5);
        assert_eq!(record.upload_speed, 0.0);
        assert_eq!(record.ping_ms, 0.0);
        assert_eq!(record.sites_ok, 0);
        assert_eq!(record.sites_total, 0);
        assert_eq!(record.device_make, UNKNOWN);
        assert_eq!(record.isp_provider, UNKNOWN);
    }

    #[test]
    fn test_full_record() {
        let device = json!({
            "device": {"make": "Google", "type": "chromebook", "os": "ChromeOS", "osVersion": "126"},
            "isp": {"provider": "Comcast", "city": "Denver"},
            "user": {"email": "student@example.org"}
        });
        let reach = json!({"results": [
            {"url": "https://a.example", "ok": true, "latencyMs": 40},
            {"url": "https://b.example", "status": 200, "latencyMs": 80},
            {"url": "https://c.example", "status": 503, "error": "bad gateway"}
        ]});
        let record = normalize(&RawRecord {
            publish_time: Some(json!("2025-08-13 02:30:00 UTC")),
            trigger: Some(json!("scheduled")),
            version: Some(json!("1.4.0")),
            duration_ms: Some(json!("5120")),
            speed: Some(json!(json!({"downloadMbps": 91.3, "uploadMbps": "22", "pingMs": 14}).to_string())),
            reachability: Some(json!(reach.to_string())),
            device: Some(json!(device.to_string())),
            ingest_source_ip: Some(json!("10.1.2.3")),
            request_id: Some(json!("req-1")),
        });

        assert_eq!(record.publish_time.as_deref(), Some("2025-08-13 02:30:00 UTC"));
        assert_eq!(record.trigger.as_deref(), Some("scheduled"));
        assert_eq!(record.version.as_deref(), Some("1.4.0"));
        assert_eq!(record.duration_ms, Some(5120.0));
        assert_eq!(record.user_email.as_deref(), Some("student@example.org"));
        assert_eq!(record.device_make, "Google");
        assert_eq!(record.device_type, "chromebook");
        assert_eq!(record.device_os, "ChromeOS");
        assert_eq!(record.device_os_version, "126");
        assert_eq!(record.isp_provider, "Comcast");
        assert_eq!(record.city, "Denver");
        assert_eq!(record.download_speed, 91.3);
        assert_eq!(record.upload_speed, 22.0);
        assert_eq!(record.ping_ms, 14.0);
        assert_eq!(record.sites_ok, 2);
        assert_eq!(record.sites_total, 3);
        assert_eq!(record.request_id.as_deref(), Some("req-1"));
    }

    #[test]
    fn test_probe_ok_predicate() {
        assert!(is_probe_ok(&json!({"ok": true})));
        assert!(is_probe_ok(&json!({"status": 200, "error": null})));
        assert!(is_probe_ok(&json!({"status": 200})));
        assert!(!is_probe_ok(&json!({"status": 404})));
        assert!(!is_probe_ok(&json!({"ok": false})));
        assert!(!is_probe_ok(&json!({"ok": "true"})));
        assert!(!is_probe_ok(&json!({"status": 200, "error": "tls handshake"})));
        assert!(!is_probe_ok(&json!({"status": "200"})));
        assert!(!is_probe_ok(&json!("ok")));
    }

    #[test]
    fn test_sites_ok_never_exceeds_total() {
        let entries = [
            json!({"ok": true}),
            json!({"status": 200}),
            json!(null),
            json!({"ok": false}),
            json!("string entry"),
            json!({"status": 500, "error": "x"}),
        ];
        for len in 0..=entries.len() {
            for start in 0..entries.len() {
                let results: Vec<Value> =
                    entries.iter().cycle().skip(start).take(len).cloned().collect();
                let doc = json!({"results": results});
                let (ok, total) = count_reachable(doc.as_object().unwrap());
                assert!(ok <= total);
                assert_eq!(total as usize, len);
            }
        }
    }

    #[test]
    fn test_ping_lowercase_fallback() {
        let record = normalize(&raw(json!("{\"pingms\": \"9.5\"}"), Value::Null, Value::Null));
        assert_eq!(record.ping_ms, 9.5);
    }

    #[test]
    fn test_number_coercion() {
        assert_eq!(coerce_number(&json!(3)), Some(3.0));
        assert_eq!(coerce_number(&json!(" 7.25 ")), Some(7.25));
        assert_eq!(coerce_number(&json!("fast")), None);
        assert_eq!(coerce_number(&json!("NaN")), None);
        assert_eq!(coerce_number(&json!("inf")), None);
        assert_eq!(coerce_number(&json!(true)), None);
        assert_eq!(coerce_number(&Value::Null), None);
    }

    #[test]
    fn test_empty_device_strings_become_unknown() {
        let device = json!({"device": {"make": "", "type": null}, "isp": {"city": "Austin"}});
        let record = normalize(&raw(Value::Null, Value::Null, json!(device.to_string())));
        assert_eq!(record.device_make, UNKNOWN);
        assert_eq!(record.device_type, UNKNOWN);
        assert_eq!(record.city, "Austin");
        assert_eq!(record.isp_provider, UNKNOWN);
    }

    #[test]
    fn test_user_email_requires_user_mapping() {
        let device = json!({"user": "student@example.org"});
        let record = normalize(&raw(Value::Null, Value::Null, json!(device.to_string())));
        assert_eq!(record.user_email, None);
    }

    #[test]
    fn test_summary_row_from_string_columns() {
        let row = json!({
            "url": "https://www.google.com",
            "total_checks": "120",
            "ok_checks": "114",
            "availability_pct": "95.0",
            "avg_latency_ms": "80.12",
            "max_latency_ms": null,
            "last_seen": "2025-08-13 02:30:00"
        });
        let shaped = summary_row(row.as_object().unwrap());
        assert_eq!(shaped.url.as_deref(), Some("https://www.google.com"));
        assert_eq!(shaped.total_checks, 120);
        assert_eq!(shaped.ok_checks, 114);
        assert_eq!(shaped.availability_pct, 95.0);
        assert_eq!(shaped.avg_latency_ms, Some(80.12));
        assert_eq!(shaped.max_latency_ms, None);
        assert_eq!(shaped.min_latency_ms, None);
    }

    #[test]
    fn test_site_check_row_from_string_columns() {
        let row = json!({
            "ts": "2025-08-13 02:30:00",
            "requestId": "r-9",
            "url": "https://www.google.com",
            "ok": "false",
            "error": "timeout",
            "status": "0",
            "latency_ms": "1500.5"
        });
        let shaped = site_check_row(row.as_object().unwrap());
        assert_eq!(shaped.ok, Some(false));
        assert_eq!(shaped.status, Some(0));
        assert_eq!(shaped.latency_ms, Some(1500.5));
        assert_eq!(shaped.request_id.as_deref(), Some("r-9"));
        assert_eq!(shaped.error.as_deref(), Some("timeout"));
    }
}
