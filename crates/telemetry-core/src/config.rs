//! Runtime configuration: YAML file (optional) then environment overrides.
use crate::backend::BackendConfig;
use crate::error::{TelemetryError, TelemetryResult};
use crate::query::{DEFAULT_RAW_LIMIT, DEFAULT_SITE_LIMIT, DEFAULT_SUMMARY_WINDOW_DAYS, MAX_WINDOW_DAYS};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Names the YAML config file, when one is used.
pub const CONFIG_ENV: &str = "TELEMETRY_CONFIG";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub listen_addr: String,
    pub static_dir: PathBuf,
    pub dashboard_page: String,
    pub open_browser: bool,
    pub cache_path: PathBuf,
    pub cache_ttl_secs: u64,
    pub query_timeout_secs: u64,
    pub table: String,
    pub recent_limit: u32,
    pub raw_limit: u32,
    pub site_limit: u32,
    pub summary_window_days: u32,
    pub stats_window_days: u32,
    pub backend: BackendConfig,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8000".to_string(),
            static_dir: PathBuf::from("static"),
            dashboard_page: "dashboard.html".to_string(),
            open_browser: true,
            cache_path: PathBuf::from("telemetry_data.json"),
            cache_ttl_secs: 60,
            query_timeout_secs: 30,
            table: "telemetry.pubsub_raw".to_string(),
            recent_limit: 500,
            raw_limit: DEFAULT_RAW_LIMIT,
            site_limit: DEFAULT_SITE_LIMIT,
            summary_window_days: DEFAULT_SUMMARY_WINDOW_DAYS,
            stats_window_days: 1,
            backend: BackendConfig::default(),
        }
    }
}

impl TelemetryConfig {
    /// Load from `TELEMETRY_CONFIG` (if set), apply env overrides, validate.
    pub fn load() -> TelemetryResult<Self> {
        let mut config = match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_yaml_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: &Path) -> TelemetryResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| TelemetryError::Config(format!("read {}: {e}", path.display())))?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(text: &str) -> TelemetryResult<Self> {
        serde_yaml::from_str(text).map_err(|e| TelemetryError::Config(e.to_string()))
    }

    /// Overlay `TELEMETRY_*` variables, looked up through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> TelemetryResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("TELEMETRY_ADDR") {
            self.listen_addr = v;
        }
        if let Some(v) = lookup("TELEMETRY_STATIC_DIR") {
            self.static_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("TELEMETRY_CACHE_PATH") {
            self.cache_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("TELEMETRY_CACHE_TTL_SECS") {
            self.cache_ttl_secs = parse_env("TELEMETRY_CACHE_TTL_SECS", &v)?;
        }
        if let Some(v) = lookup("TELEMETRY_QUERY_TIMEOUT_SECS") {
            self.query_timeout_secs = parse_env("TELEMETRY_QUERY_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("TELEMETRY_TABLE") {
            self.table = v;
        }
        if let Some(v) = lookup("TELEMETRY_BQ_PATH") {
            self.backend.program = PathBuf::from(v);
        }
        if let Some(v) = lookup("TELEMETRY_SDK_ROOT") {
            self.backend.sdk_root = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("TELEMETRY_OPEN_BROWSER") {
            self.open_browser = matches!(v.as_str(), "1" | "true" | "TRUE" | "True" | "yes");
        }
        Ok(())
    }

    pub fn validate(&self) -> TelemetryResult<()> {
        self.socket_addr()?;
        let nonzero = [
            ("cache_ttl_secs", self.cache_ttl_secs),
            ("query_timeout_secs", self.query_timeout_secs),
            ("recent_limit", u64::from(self.recent_limit)),
            ("raw_limit", u64::from(self.raw_limit)),
            ("site_limit", u64::from(self.site_limit)),
            ("backend.max_rows", u64::from(self.backend.max_rows)),
        ];
        for (name, value) in nonzero {
            if value == 0 {
                return Err(TelemetryError::Config(format!("{name} must be greater than 0")));
            }
        }
        for (name, days) in [
            ("summary_window_days", self.summary_window_days),
            ("stats_window_days", self.stats_window_days),
        ] {
            if days == 0 || days > MAX_WINDOW_DAYS {
                return Err(TelemetryError::Config(format!(
                    "{name} must be between 1 and {MAX_WINDOW_DAYS}"
                )));
            }
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> TelemetryResult<SocketAddr> {
        self.listen_addr
            .parse()
            .map_err(|e| TelemetryError::Config(format!("listen_addr `{}`: {e}", self.listen_addr)))
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    pub fn dashboard_url(&self) -> String {
        format!("http://{}/{}", self.listen_addr, self.dashboard_page)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> TelemetryResult<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| TelemetryError::Config(format!("{name}=`{value}`: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = TelemetryConfig::default();
        config.validate().unwrap();
        assert_eq!(config.cache_ttl(), Duration::from_secs(60));
        assert_eq!(config.query_timeout(), Duration::from_secs(30));
        assert_eq!(config.dashboard_url(), "http://127.0.0.1:8000/dashboard.html");
    }

    #[test]
    fn test_yaml_partial_override() {
        let config = TelemetryConfig::from_yaml_str(
            "cache_ttl_secs: 120\ntable: fleet.telemetry.pubsub_raw\nbackend:\n  sdk_root: /opt/google-cloud-sdk\n  base_args: [\"--project_id=fleet\"]\n",
        )
        .unwrap();
        assert_eq!(config.cache_ttl_secs, 120);
        assert_eq!(config.table, "fleet.telemetry.pubsub_raw");
        assert_eq!(config.backend.sdk_root, Some(PathBuf::from("/opt/google-cloud-sdk")));
        assert_eq!(config.backend.base_args, vec!["--project_id=fleet".to_string()]);
        assert_eq!(config.backend.max_rows, 1000);
        assert_eq!(config.recent_limit, 500);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("TELEMETRY_ADDR", "0.0.0.0:9000"),
            ("TELEMETRY_CACHE_TTL_SECS", "15"),
            ("TELEMETRY_BQ_PATH", "/usr/bin/bq"),
            ("TELEMETRY_OPEN_BROWSER", "0"),
        ]
        .into_iter()
        .collect();
        let mut config = TelemetryConfig::default();
        config
            .apply_env(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:9000");
        assert_eq!(config.cache_ttl_secs, 15);
        assert_eq!(config.backend.program, PathBuf::from("/usr/bin/bq"));
        assert!(!config.open_browser);
    }

    #[test]
    fn test_bad_env_number_is_config_error() {
        let mut config = TelemetryConfig::default();
        let err = config
            .apply_env(|key| (key == "TELEMETRY_CACHE_TTL_SECS").then(|| "soon".to_string()))
            .unwrap_err();
        assert_eq!(err.error_code(), "CONFIG");
    }

    #[test]
    fn test_validate_rejects_zeroes_and_bad_addr() {
        let mut config = TelemetryConfig::default();
        config.query_timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = TelemetryConfig::default();
        config.listen_addr = "localhost".to_string();
        assert!(config.validate().is_err());

        let mut config = TelemetryConfig::default();
        config.summary_window_days = MAX_WINDOW_DAYS + 1;
        assert!(config.validate().is_err());
    }
}
