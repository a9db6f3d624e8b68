//! Streaming speech-to-text contract.
//!
//! A provider implementing [`StreamingStt`] opens independent, cancellable
//! transcription streams. Each open stream is represented by an
//! [`SttStreamHandle`]: audio goes in through a bounded channel, transcript
//! events come out through an unbounded one, and dropping or closing the
//! handle tears the stream down. The speaker state machine may hold two
//! handles at once while it rotates around the provider's session-duration
//! cap, which is why the contract is a stream factory rather than a
//! connect/disconnect singleton.

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::core::retry::RetryableError;

/// Configuration for one transcription stream.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SttStreamConfig {
    /// Credential string (empty for ambient credentials, inline JSON, or a
    /// file path).
    pub credentials: String,
    /// PCM sample rate in Hz, LINEAR16 mono assumed.
    pub sample_rate: u32,
    /// Primary locale for recognition, e.g. `en-US`.
    pub primary_language: String,
    /// Additional locales the recognizer may detect.
    #[serde(default)]
    pub alternative_languages: Vec<String>,
    /// Recognition model identifier.
    pub model: String,
}

impl Default for SttStreamConfig {
    fn default() -> Self {
        Self {
            credentials: String::new(),
            sample_rate: 16000,
            primary_language: "en-US".to_string(),
            alternative_languages: Vec::new(),
            model: "latest_long".to_string(),
        }
    }
}

/// A single recognition result, interim or finalized.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptFragment {
    pub text: String,
    /// Locale the recognizer attributed the fragment to.
    pub language_code: String,
    /// Confidence in `[0, 1]`; zero for interim fragments.
    pub confidence: f32,
    /// Finalized fragments are authoritative; interims are previews.
    pub is_final: bool,
}

impl TranscriptFragment {
    pub fn new(text: String, language_code: String, confidence: f32, is_final: bool) -> Self {
        Self {
            text,
            language_code,
            confidence: confidence.clamp(0.0, 1.0),
            is_final,
        }
    }
}

/// Everything a stream can emit.
#[derive(Debug)]
pub enum SttEvent {
    Transcript(TranscriptFragment),
    /// The provider closed the stream (duration cap, shutdown, or EOF).
    Ended,
    Error(SttError),
}

/// Failures surfaced by a transcription stream.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SttError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("Quota exhausted: {0}")]
    QuotaExhausted(String),
    #[error("Provider error: {0}")]
    ProviderError(String),
}

impl SttError {
    /// Quota exhaustion disables automatic stream restarts for the speaker;
    /// everything else may be retried.
    pub fn is_quota(&self) -> bool {
        matches!(self, SttError::QuotaExhausted(_))
    }
}

impl RetryableError for SttError {
    fn error_code(&self) -> Option<&str> {
        match self {
            SttError::QuotaExhausted(_) => Some("RESOURCE_EXHAUSTED"),
            _ => None,
        }
    }

    fn message(&self) -> String {
        self.to_string()
    }
}

/// Handle to one live transcription stream.
///
/// Owned by exactly one task; receiving events requires `&mut self`.
pub struct SttStreamHandle {
    audio_tx: mpsc::Sender<Bytes>,
    events_rx: mpsc::UnboundedReceiver<SttEvent>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    opened_at: Instant,
}

impl SttStreamHandle {
    /// Assembles a handle from its channel halves. Providers (and test
    /// doubles) construct these; consumers only use the methods below.
    pub fn new(
        audio_tx: mpsc::Sender<Bytes>,
        events_rx: mpsc::UnboundedReceiver<SttEvent>,
        shutdown_tx: oneshot::Sender<()>,
    ) -> Self {
        Self {
            audio_tx,
            events_rx,
            shutdown_tx: Some(shutdown_tx),
            opened_at: Instant::now(),
        }
    }

    /// Forwards one PCM frame. Applies channel backpressure; fails once the
    /// stream task has gone away.
    pub async fn send_audio(&self, frame: Bytes) -> Result<(), SttError> {
        self.audio_tx
            .send(frame)
            .await
            .map_err(|_| SttError::ConnectionFailed("stream task terminated".to_string()))
    }

    /// Awaits the next event; `None` once the stream task has finished and
    /// drained.
    pub async fn next_event(&mut self) -> Option<SttEvent> {
        self.events_rx.recv().await
    }

    /// Signals the stream to shut down. Pending events can still be drained
    /// with [`next_event`](Self::next_event) afterwards.
    pub fn close(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Time since the stream was opened; drives rotation scheduling.
    pub fn age(&self) -> Duration {
        self.opened_at.elapsed()
    }
}

impl Drop for SttStreamHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Factory for transcription streams.
#[async_trait::async_trait]
pub trait StreamingStt: Send + Sync {
    /// Opens a new bidirectional stream with the given configuration.
    async fn open_stream(&self, config: &SttStreamConfig) -> Result<SttStreamHandle, SttError>;

    /// Short provider identifier for logs.
    fn provider_name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragment_confidence_clamped() {
        let f = TranscriptFragment::new("hi".into(), "en-US".into(), 1.7, true);
        assert_eq!(f.confidence, 1.0);
        let f = TranscriptFragment::new("hi".into(), "en-US".into(), -0.2, false);
        assert_eq!(f.confidence, 0.0);
    }

    #[test]
    fn test_quota_detection() {
        assert!(SttError::QuotaExhausted("out of quota".into()).is_quota());
        assert!(!SttError::NetworkError("reset".into()).is_quota());
    }

    #[tokio::test]
    async fn test_handle_round_trip() {
        let (audio_tx, mut audio_rx) = mpsc::channel::<Bytes>(4);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let mut handle = SttStreamHandle::new(audio_tx, events_rx, shutdown_tx);

        handle.send_audio(Bytes::from_static(b"pcm")).await.unwrap();
        assert_eq!(audio_rx.recv().await.unwrap(), Bytes::from_static(b"pcm"));

        events_tx
            .send(SttEvent::Transcript(TranscriptFragment::new(
                "hello".into(),
                "en-US".into(),
                0.9,
                true,
            )))
            .unwrap();
        match handle.next_event().await.unwrap() {
            SttEvent::Transcript(f) => assert_eq!(f.text, "hello"),
            other => panic!("unexpected event: {other:?}"),
        }

        handle.close();
        assert!(shutdown_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_handle_drop_signals_shutdown() {
        let (audio_tx, _audio_rx) = mpsc::channel::<Bytes>(1);
        let (_events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        drop(SttStreamHandle::new(audio_tx, events_rx, shutdown_tx));
        assert!(shutdown_rx.try_recv().is_ok());
    }
}
