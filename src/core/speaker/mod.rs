//! Per-speaker transcription pipeline: the speaker stream state machine,
//! sentence aggregation, and the registry that owns one stream per
//! `(session, participant)`.

pub mod aggregator;
pub mod manager;
pub mod stream;

pub use aggregator::{AggregatedSentence, SentenceAggregator, SENTENCE_SILENCE_THRESHOLD};
pub use manager::StreamManager;
pub use stream::{SpeakerStream, SpeakerStreamConfig};

use tokio::sync::mpsc;

use crate::core::stt::SttError;

/// Identity a speaker stream speaks for. Fixed at stream creation.
#[derive(Debug, Clone)]
pub struct SpeakerContext {
    pub session_id: String,
    pub participant_id: String,
    pub speaker_name: String,
}

/// A finalized sentence ready for translation fan-out. Produced by a
/// speaker stream, consumed exactly once.
#[derive(Debug, Clone)]
pub struct SentenceEvent {
    pub text: String,
    /// Display name of the detected source language.
    pub source_language: String,
    pub participant_id: String,
    pub speaker_name: String,
    pub session_id: String,
    pub confidence: f32,
    /// Epoch milliseconds.
    pub emitted_at: u64,
}

/// Live interim feedback; broadcast but never stored or translated.
#[derive(Debug, Clone)]
pub struct InterimEvent {
    pub text: String,
    pub participant_id: String,
    pub speaker_name: String,
    pub session_id: String,
}

/// Receiving halves of a speaker stream's output channels.
pub struct SpeakerEvents {
    pub sentences: mpsc::UnboundedReceiver<SentenceEvent>,
    pub interims: mpsc::UnboundedReceiver<InterimEvent>,
    pub errors: mpsc::UnboundedReceiver<SttError>,
}
