//! Telemetry Core: query building, backend invocation, normalization, snapshot cache
//!
//! Read path for the fleet telemetry dashboard:
//!
//! ```text
//! SnapshotCache (fresh?) ──hit──────────────────────────────► records
//!        │ miss
//!        ▼
//! QueryBuilder → BackendClient → normalizer → SnapshotCache::write → records
//! ```

pub mod backend;
pub mod cache;
pub mod config;
pub mod data_model;
pub mod error;
pub mod logging;
pub mod normalizer;
pub mod query;

pub use backend::{BackendClient, BackendConfig, Row};
pub use cache::{Snapshot, SnapshotCache};
pub use config::TelemetryConfig;
pub use data_model::{
    sample_records, DataSource, NormalizedRecord, RawRecord, ReachabilitySummaryRow, SiteCheckRow,
};
pub use error::{BackendError, TelemetryError, TelemetryResult};
pub use normalizer::normalize;
pub use query::QueryBuilder;

/// Crate version, reported by the health endpoint.
pub const TELEMETRY_VERSION: &str = env!("CARGO_PKG_VERSION");
