//! Batch text-to-speech: provider contract and implementations.

pub mod google;

pub use google::GoogleSynthesizer;

use bytes::Bytes;

use crate::core::retry::RetryableError;

/// Failures surfaced by the synthesis provider.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TtsError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("API error ({status}): {message}")]
    ApiError { status: u16, message: String },
    #[error("Provider error: {0}")]
    ProviderError(String),
}

impl RetryableError for TtsError {
    fn http_status(&self) -> Option<u16> {
        match self {
            TtsError::ApiError { status, .. } => Some(*status),
            _ => None,
        }
    }

    fn message(&self) -> String {
        self.to_string()
    }
}

/// Batch synthesis of one text into MP3 audio.
///
/// `language` is a display name; voice resolution (locale mapping, the
/// Arabic `ar-XA` quirk, per-locale default voices) is the implementation's
/// job. A caller-supplied `voice` overrides the default.
#[async_trait::async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(
        &self,
        text: &str,
        language: &str,
        voice: Option<&str>,
    ) -> Result<Bytes, TtsError>;
}
