//! Unified Error Model
use thiserror::Error;

pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Failures of a single analytics backend invocation.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("backend query timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("backend query failed (status {status}): {diagnostic}")]
    QueryFailed { status: i32, diagnostic: String },

    #[error("backend returned malformed output: {0}")]
    MalformedResponse(String),

    #[error("failed to launch backend `{program}`: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl BackendError {
    #[must_use]
    pub fn query_failed(status: i32, stderr: &str) -> Self {
        let trimmed = stderr.trim();
        let diagnostic = if trimmed.is_empty() {
            "no diagnostic output".to_string()
        } else {
            trimmed.to_string()
        };
        Self::QueryFailed { status, diagnostic }
    }
}

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("missing {0} param")]
    MissingParameter(&'static str),

    #[error("invalid {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("cache: {0}")]
    Cache(String),

    #[error("config: {0}")]
    Config(String),

    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("json failure: {0}")]
    Json(#[from] serde_json::Error),
}

impl TelemetryError {
    pub fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }

    /// Stable machine-readable code per variant.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Backend(BackendError::Timeout { .. }) => "BACKEND/TIMEOUT",
            Self::Backend(BackendError::QueryFailed { .. }) => "BACKEND/QUERY",
            Self::Backend(BackendError::MalformedResponse(_)) => "BACKEND/MALFORMED",
            Self::Backend(BackendError::Launch { .. }) => "BACKEND/LAUNCH",
            Self::MissingParameter(_) => "PARAM/MISSING",
            Self::InvalidParameter { .. } => "PARAM/INVALID",
            Self::Cache(_) => "CACHE",
            Self::Config(_) => "CONFIG",
            Self::Io(_) => "IO",
            Self::Json(_) => "JSON",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_parameter_message_names_the_param() {
        let err = TelemetryError::MissingParameter("url");
        assert_eq!(err.to_string(), "missing url param");
        assert_eq!(err.error_code(), "PARAM/MISSING");
    }

    #[test]
    fn timeout_names_the_limit() {
        let err: TelemetryError = BackendError::Timeout { timeout_secs: 30 }.into();
        assert_eq!(err.to_string(), "backend query timed out after 30s");
        assert_eq!(err.error_code(), "BACKEND/TIMEOUT");
    }

    #[test]
    fn query_failure_keeps_diagnostic_text() {
        let err = BackendError::query_failed(2, "Error in query string: Syntax error\n");
        assert!(err.to_string().contains("Syntax error"));
        assert!(err.to_string().contains("status 2"));

        let wrapped: TelemetryError = err.into();
        assert_eq!(wrapped.error_code(), "BACKEND/QUERY");
    }
}
