//! Single-slot snapshot cache backed by one JSON file.
//!
//! Freshness is the file's modification time, so cache age can be checked
//! from outside the process without parsing the payload.
use crate::data_model::NormalizedRecord;
use crate::error::{TelemetryError, TelemetryResult};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Stored records plus the time they were written.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub records: Vec<NormalizedRecord>,
    pub written_at: SystemTime,
}

impl Snapshot {
    pub fn written_at_utc(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from(self.written_at)
    }

    /// Age relative to `now`; a timestamp in the future counts as zero.
    pub fn age_at(&self, now: SystemTime) -> Duration {
        now.duration_since(self.written_at).unwrap_or(Duration::ZERO)
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotCache {
    path: PathBuf,
}

impl SnapshotCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fresh, non-empty records or `None`.
    pub async fn read(&self, ttl: Duration, bypass: bool) -> Option<Vec<NormalizedRecord>> {
        self.read_at(SystemTime::now(), ttl, bypass).await
    }

    /// [`read`](Self::read) against an explicit clock. Age `>= ttl` is a miss.
    pub async fn read_at(
        &self,
        now: SystemTime,
        ttl: Duration,
        bypass: bool,
    ) -> Option<Vec<NormalizedRecord>> {
        if bypass {
            tracing::debug!("snapshot bypass requested");
            return None;
        }
        let snapshot = self.load().await?;
        let age = snapshot.age_at(now);
        if age >= ttl {
            tracing::debug!(age_secs = age.as_secs(), ttl_secs = ttl.as_secs(), "snapshot stale");
            return None;
        }
        if snapshot.records.is_empty() {
            tracing::debug!("snapshot empty");
            return None;
        }
        tracing::info!(
            records = snapshot.records.len(),
            age_secs = age.as_secs(),
            "serving cached snapshot"
        );
        Some(snapshot.records)
    }

    /// Age of the stored snapshot, if any.
    pub async fn age(&self) -> Option<Duration> {
        self.load()
            .await
            .map(|snapshot| snapshot.age_at(SystemTime::now()))
    }

    /// Current snapshot regardless of age. Unreadable or corrupt files are `None`.
    pub async fn load(&self) -> Option<Snapshot> {
        let metadata = match tokio::fs::metadata(&self.path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "cannot stat snapshot");
                return None;
            }
        };
        let written_at = metadata.modified().ok()?;
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "cannot read snapshot");
                return None;
            }
        };
        match serde_json::from_slice::<Vec<NormalizedRecord>>(&bytes) {
            Ok(records) => Some(Snapshot {
                records,
                written_at,
            }),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "discarding corrupt snapshot");
                None
            }
        }
    }

    /// Replace the slot wholesale. Readers see either the old or the new file.
    pub async fn write(&self, records: &[NormalizedRecord]) -> TelemetryResult<()> {
        let payload = serde_json::to_vec_pretty(records)?;
        let file_name = self
            .path
            .file_name()
            .ok_or_else(|| TelemetryError::Cache(format!("`{}` has no file name", self.path.display())))?
            .to_string_lossy()
            .into_owned();
        let tmp = self
            .path
            .with_file_name(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&tmp, &payload).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(TelemetryError::Cache(format!(
                "replace {}: {e}",
                self.path.display()
            )));
        }
        tracing::info!(records = records.len(), path = %self.path.display(), "snapshot written");
        Ok(())
    }
}
