//! Binary entrypoint for the telemetry dashboard server.
use anyhow::Context;
use telemetry_core::{logging, TelemetryConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    // File named by TELEMETRY_CONFIG, then TELEMETRY_* overrides (e.g. TELEMETRY_ADDR).
    let config = TelemetryConfig::load().context("invalid configuration")?;
    telemetry_api::run(config).await
}
