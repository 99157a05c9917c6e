//! Cross-origin and tracing layers shared by every route.
use tower_http::cors::CorsLayer;
use tower_http::trace::{HttpMakeClassifier, TraceLayer};

/// `Access-Control-Allow-Origin: *` on every response.
pub fn cors() -> CorsLayer {
    CorsLayer::permissive()
}

pub fn trace() -> TraceLayer<HttpMakeClassifier> {
    TraceLayer::new_for_http()
}
