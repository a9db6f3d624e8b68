//! Streaming speech-to-text: provider contract and implementations.

pub mod base;
pub mod google;

pub use base::{
    SttError, SttEvent, SttStreamConfig, SttStreamHandle, StreamingStt, TranscriptFragment,
};
pub use google::GoogleSpeechToText;
