//! Analytics backend invocation.
//!
//! Queries run through the backend's command-line client as a child process.
//! The executable location and credential context come from [`BackendConfig`]
//! rather than the ambient environment.
use crate::error::BackendError;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;

pub type Row = Map<String, Value>;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Executable name or path of the backend CLI.
    pub program: PathBuf,
    /// SDK install root; `<sdk_root>/bin` is put first on `PATH`.
    pub sdk_root: Option<PathBuf>,
    /// Arguments placed before the subcommand (e.g. a project flag).
    pub base_args: Vec<String>,
    /// Extra environment for the child process.
    pub env: BTreeMap<String, String>,
    pub max_rows: u32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("bq"),
            sdk_root: None,
            base_args: Vec::new(),
            env: BTreeMap::new(),
            max_rows: 1000,
        }
    }
}

impl BackendConfig {
    /// Bare program names resolve inside `<sdk_root>/bin` when an SDK root is set.
    pub fn resolved_program(&self) -> PathBuf {
        match &self.sdk_root {
            Some(root) if self.program.components().count() == 1 => {
                root.join("bin").join(&self.program)
            }
            _ => self.program.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackendClient {
    config: BackendConfig,
}

impl BackendClient {
    pub fn new(config: BackendConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// Run `query` and return its rows. The child is killed if it outlives `timeout`.
    pub async fn execute(&self, query: &str, timeout: Duration) -> Result<Vec<Row>, BackendError> {
        let args = vec![
            "query".to_string(),
            "--use_legacy_sql=false".to_string(),
            "--format=json".to_string(),
            format!("--max_rows={}", self.config.max_rows),
            query.to_string(),
        ];
        let started = Instant::now();
        let stdout = self.run(&args, timeout).await?;
        let rows = parse_rows(&stdout)?;
        tracing::info!(
            rows = rows.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "backend query complete"
        );
        Ok(rows)
    }

    /// Cheap reachability probe: list the dataset.
    pub async fn check_access(&self, dataset: &str, timeout: Duration) -> Result<(), BackendError> {
        self.run(&["ls".to_string(), dataset.to_string()], timeout)
            .await
            .map(|_| ())
    }

    async fn run(&self, args: &[String], timeout: Duration) -> Result<Vec<u8>, BackendError> {
        let program = self.config.resolved_program();
        let mut command = Command::new(&program);
        command
            .args(&self.config.base_args)
            .args(args)
            .envs(&self.config.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(root) = &self.config.sdk_root {
            let bin = root.join("bin");
            let path = match std::env::var_os("PATH") {
                Some(existing) => {
                    let mut dirs = vec![bin];
                    dirs.extend(std::env::split_paths(&existing));
                    std::env::join_paths(dirs).unwrap_or(existing)
                }
                None => bin.into_os_string(),
            };
            command.env("PATH", path);
            if std::env::var_os("CLOUDSDK_ROOT_DIR").is_none()
                && !self.config.env.contains_key("CLOUDSDK_ROOT_DIR")
            {
                command.env("CLOUDSDK_ROOT_DIR", root);
            }
        }

        tracing::debug!(program = %program.display(), subcommand = %args[0], "spawning backend");
        let child = command.spawn().map_err(|source| BackendError::Launch {
            program: program.display().to_string(),
            source,
        })?;

        // Dropping the pending future on expiry drops the child, which kills it.
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|source| BackendError::Launch {
                program: program.display().to_string(),
                source,
            })?,
            Err(_) => {
                tracing::warn!(timeout_secs = timeout.as_secs(), "backend query timed out");
                return Err(BackendError::Timeout {
                    timeout_secs: timeout.as_secs(),
                });
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let status = output.status.code().unwrap_or(-1);
            tracing::warn!(status, stderr = %stderr.trim(), "backend query failed");
            return Err(BackendError::query_failed(status, &stderr));
        }
        Ok(output.stdout)
    }
}

/// Parse the CLI's JSON output into rows. Blank output is an empty result;
/// non-object array entries are dropped.
pub fn parse_rows(stdout: &[u8]) -> Result<Vec<Row>, BackendError> {
    let text = String::from_utf8_lossy(stdout);
    let text = text.trim();
    if text.is_empty() {
        return Ok(Vec::new());
    }
    let value: Value = serde_json::from_str(text)
        .map_err(|e| BackendError::MalformedResponse(format!("invalid JSON: {e}")))?;
    let Value::Array(items) = value else {
        return Err(BackendError::MalformedResponse(
            "expected a JSON array of rows".to_string(),
        ));
    };
    let total = items.len();
    let rows: Vec<Row> = items
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .collect();
    if rows.len() != total {
        tracing::warn!(skipped = total - rows.len(), "dropped non-object rows from backend output");
    }
    Ok(rows)
}
