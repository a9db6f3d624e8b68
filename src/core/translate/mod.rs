//! Batch text translation: provider contract and implementations.

pub mod google;

pub use google::GoogleTranslator;

use crate::core::retry::RetryableError;

/// Failures surfaced by the translation provider.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TranslateError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("API error ({status}): {message}")]
    ApiError { status: u16, message: String },
    #[error("Provider error: {0}")]
    ProviderError(String),
}

impl RetryableError for TranslateError {
    fn http_status(&self) -> Option<u16> {
        match self {
            TranslateError::ApiError { status, .. } => Some(*status),
            _ => None,
        }
    }

    fn message(&self) -> String {
        self.to_string()
    }
}

/// Batch translation of one text between two display-named languages.
///
/// Implementations skip the provider call when source and target resolve to
/// the same language and return the input unchanged. Errors bubble up so the
/// fan-out can degrade to passthrough; retrying is the implementation's job.
#[async_trait::async_trait]
pub trait Translator: Send + Sync {
    async fn translate(
        &self,
        text: &str,
        from_language: &str,
        to_language: &str,
    ) -> Result<String, TranslateError>;
}
