//! Request/response plumbing for the Speech-to-Text v2 bidirectional stream.

use std::time::Duration;

use bytes::Bytes;
use google_api_proto::google::cloud::speech::v2::{
    explicit_decoding_config::AudioEncoding, recognition_config::DecodingConfig,
    streaming_recognize_request::StreamingRequest, ExplicitDecodingConfig, RecognitionConfig,
    RecognitionFeatures, StreamingRecognitionConfig, StreamingRecognitionFeatures,
    StreamingRecognizeRequest, StreamingRecognizeResponse,
};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::core::stt::base::{SttError, SttEvent, TranscriptFragment};

use super::config::GoogleSttConfig;

/// Maximum audio bytes per streaming request, per Google's guidance.
pub(super) const MAX_AUDIO_CHUNK_SIZE: usize = 25 * 1024;

/// The provider times out idle streams after ~10 s; silence is injected
/// after this long without caller audio.
pub(super) const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(1);

/// Length of each injected keep-alive silence burst.
const KEEPALIVE_SILENCE_MS: u64 = 20;

/// Tracks caller-audio recency for the keep-alive logic.
pub(super) struct KeepaliveTracker {
    last_audio: Instant,
    sample_rate: u32,
}

impl KeepaliveTracker {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            last_audio: Instant::now(),
            sample_rate,
        }
    }

    pub fn touch(&mut self) {
        self.last_audio = Instant::now();
    }

    pub fn needs_keepalive(&self) -> bool {
        self.last_audio.elapsed() >= KEEPALIVE_INTERVAL
    }

    /// 16-bit mono zeros sized for [`KEEPALIVE_SILENCE_MS`].
    pub fn silence(&self) -> Bytes {
        let samples = (u64::from(self.sample_rate) * KEEPALIVE_SILENCE_MS / 1000) as usize;
        Bytes::from(vec![0u8; samples * 2])
    }
}

/// First message on the stream: recognizer address plus recognition and
/// streaming features.
pub(super) fn build_config_request(config: &GoogleSttConfig) -> StreamingRecognizeRequest {
    let mut language_codes = vec![config.base.primary_language.clone()];
    language_codes.extend(config.base.alternative_languages.iter().cloned());

    let recognition_config = RecognitionConfig {
        decoding_config: Some(DecodingConfig::ExplicitDecodingConfig(
            ExplicitDecodingConfig {
                encoding: AudioEncoding::Linear16 as i32,
                sample_rate_hertz: config.base.sample_rate as i32,
                audio_channel_count: 1,
            },
        )),
        model: config.base.model.clone(),
        language_codes,
        features: Some(RecognitionFeatures {
            enable_automatic_punctuation: true,
            ..Default::default()
        }),
        ..Default::default()
    };

    let streaming_config = StreamingRecognitionConfig {
        config: Some(recognition_config),
        config_mask: None,
        streaming_features: Some(StreamingRecognitionFeatures {
            interim_results: true,
            enable_voice_activity_events: false,
            voice_activity_timeout: None,
        }),
    };

    StreamingRecognizeRequest {
        recognizer: config.recognizer_path(),
        streaming_request: Some(StreamingRequest::StreamingConfig(streaming_config)),
    }
}

#[inline]
pub(super) fn build_audio_request(audio: Bytes, recognizer: String) -> StreamingRecognizeRequest {
    StreamingRecognizeRequest {
        recognizer,
        streaming_request: Some(StreamingRequest::Audio(audio)),
    }
}

/// Splits audio into request-sized chunks without copying.
pub(super) fn chunk_audio(audio: Bytes) -> impl Iterator<Item = Bytes> {
    let mut offset = 0;
    std::iter::from_fn(move || {
        if offset >= audio.len() {
            return None;
        }
        let end = (offset + MAX_AUDIO_CHUNK_SIZE).min(audio.len());
        let chunk = audio.slice(offset..end);
        offset = end;
        Some(chunk)
    })
}

/// Maps a gRPC status onto the STT error taxonomy.
pub(super) fn map_grpc_status(status: tonic::Status) -> SttError {
    let message = status.message().to_string();
    match status.code() {
        tonic::Code::Unauthenticated | tonic::Code::PermissionDenied => {
            SttError::AuthenticationFailed(message)
        }
        tonic::Code::InvalidArgument => SttError::ConfigurationError(message),
        tonic::Code::ResourceExhausted => SttError::QuotaExhausted(message),
        tonic::Code::Unavailable | tonic::Code::DeadlineExceeded => SttError::NetworkError(message),
        code => SttError::ProviderError(format!("{code:?}: {message}")),
    }
}

/// Fans one streaming response out into transcript events.
pub(super) fn handle_streaming_response(
    response: StreamingRecognizeResponse,
    events: &mpsc::UnboundedSender<SttEvent>,
    fallback_language: &str,
) -> Result<(), SttError> {
    for result in &response.results {
        let Some(top) = result.alternatives.first() else {
            continue;
        };

        // Empty interims are recognizer noise; empty finals still matter for
        // end-of-utterance bookkeeping upstream, but carry nothing to emit.
        if top.transcript.is_empty() {
            continue;
        }

        let language = if result.language_code.is_empty() {
            fallback_language.to_string()
        } else {
            result.language_code.clone()
        };

        let confidence = if result.is_final { top.confidence } else { 0.0 };
        let fragment = TranscriptFragment::new(
            top.transcript.clone(),
            language,
            confidence,
            result.is_final,
        );

        debug!(
            is_final = fragment.is_final,
            confidence = fragment.confidence,
            chars = fragment.text.len(),
            "recognition result"
        );

        if events.send(SttEvent::Transcript(fragment)).is_err() {
            warn!("transcript receiver dropped, ending response pump");
            return Err(SttError::ProviderError(
                "event channel closed".to_string(),
            ));
        }
    }

    Ok(())
}
