//! Core interpretation pipeline: provider clients, per-speaker
//! transcription, translation fan-out, rooms and the synthesis cache.

pub mod cache;
pub mod fanout;
pub mod languages;
pub mod providers;
pub mod retry;
pub mod rooms;
pub mod speaker;
pub mod stt;
pub mod translate;
pub mod tts;
pub mod vad;

pub use cache::SynthesisCache;
pub use fanout::TranslationFanout;
pub use rooms::{RoomRegistry, ServerMessage, SessionRoom};
pub use speaker::{SentenceEvent, SpeakerContext, SpeakerStream, StreamManager};

use std::time::{SystemTime, UNIX_EPOCH};

/// Current time as epoch milliseconds; the timestamp format used on the
/// wire and in persisted rows.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
