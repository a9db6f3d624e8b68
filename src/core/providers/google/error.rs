//! Error type shared by the Google Cloud adapters.

use crate::core::retry::RetryableError;

/// Failure surfaced by any of the Google Cloud clients (STT, Translation,
/// TTS, auth).
#[derive(Debug, Clone, thiserror::Error)]
pub enum GoogleError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    /// REST API error with the HTTP status attached for classification.
    #[error("API error ({status}): {message}")]
    ApiError { status: u16, message: String },

    /// gRPC error with the status code name attached for classification.
    #[error("gRPC error ({code}): {message}")]
    GrpcError { code: String, message: String },
}

impl GoogleError {
    /// Wraps a tonic status without losing the code name.
    pub fn from_grpc_status(status: &tonic::Status) -> Self {
        Self::GrpcError {
            code: format!("{:?}", status.code()),
            message: status.message().to_string(),
        }
    }
}

impl RetryableError for GoogleError {
    fn error_code(&self) -> Option<&str> {
        match self {
            // tonic debug-formats codes in CamelCase; the classifier tables
            // use SCREAMING_SNAKE, so map the well-known retryable ones.
            GoogleError::GrpcError { code, .. } => match code.as_str() {
                "DeadlineExceeded" => Some("DEADLINE_EXCEEDED"),
                "ResourceExhausted" => Some("RESOURCE_EXHAUSTED"),
                "Unavailable" => Some("UNAVAILABLE"),
                "Internal" => Some("INTERNAL"),
                other => Some(other),
            },
            _ => None,
        }
    }

    fn http_status(&self) -> Option<u16> {
        match self {
            GoogleError::ApiError { status, .. } => Some(*status),
            _ => None,
        }
    }

    fn message(&self) -> String {
        self.to_string()
    }
}
