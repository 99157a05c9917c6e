//! Prometheus counters for the read path, exposed on `/metrics`.
use prometheus::{Encoder, IntCounter, Registry, TextEncoder};

#[derive(Clone)]
pub struct ApiMetrics {
    registry: Registry,
    pub cache_hits: IntCounter,
    pub cache_misses: IntCounter,
    pub backend_failures: IntCounter,
    pub sample_fallbacks: IntCounter,
    pub records_normalized: IntCounter,
}

impl ApiMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let counter = |name: &str, help: &str| -> Result<IntCounter, prometheus::Error> {
            let c = IntCounter::new(name, help)?;
            registry.register(Box::new(c.clone()))?;
            Ok(c)
        };
        Ok(Self {
            cache_hits: counter("telemetry_cache_hits_total", "Snapshot cache hits")?,
            cache_misses: counter("telemetry_cache_misses_total", "Snapshot cache misses")?,
            backend_failures: counter("telemetry_backend_failures_total", "Failed backend invocations")?,
            sample_fallbacks: counter("telemetry_sample_fallbacks_total", "Responses served from sample data")?,
            records_normalized: counter("telemetry_records_normalized_total", "Raw records normalized")?,
            registry,
        })
    }

    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).to_string())
    }
}
