//! Client-to-server control messages.
//!
//! The duplex channel carries JSON control messages (this enum) and raw
//! binary audio frames. Unknown message types fail to parse and are logged
//! and ignored, never fatal. Some older clients send `speakerId` where the
//! protocol says `participantId`; the alias is accepted on input and only
//! `participantId` is ever emitted.

use serde::{Deserialize, Serialize};

/// `join-session` payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinSessionPayload {
    pub session_id: String,
    /// Identity of the joining participant, when the client knows it at
    /// join time. Enables presence tracking for fan-out targeting.
    #[serde(default, alias = "speakerId")]
    pub participant_id: Option<String>,
}

/// `audio_metadata` payload: declares speaker identity, PCM rate and
/// primary language, reconfiguring the speaker stream.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioMetadataPayload {
    #[serde(alias = "speakerId")]
    pub participant_id: String,
    pub sample_rate: u32,
    pub target_language: String,
}

/// `audio-chunk-metadata` inner payload: binds speaker identity for
/// upcoming binary frames without reconfiguring.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioChunkMetadataPayload {
    #[serde(alias = "speakerId")]
    pub participant_id: String,
    #[serde(default)]
    pub speaker_name: Option<String>,
    #[serde(default)]
    pub is_participant: Option<bool>,
}

/// `speaker-status` inner payload, relayed to the room.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeakerStatusPayload {
    pub session_id: String,
    #[serde(alias = "speakerId")]
    pub participant_id: String,
    pub is_active: bool,
    #[serde(default)]
    pub is_muted: bool,
}

/// `hand-raise` inner payload, applied to the store and relayed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandRaisePayload {
    pub session_id: String,
    #[serde(alias = "speakerId")]
    pub participant_id: String,
    #[serde(default)]
    pub participant_name: Option<String>,
    pub hand_raised: bool,
}

/// `speak-permission` inner payload, applied to the store and relayed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeakPermissionPayload {
    pub session_id: String,
    #[serde(alias = "speakerId")]
    pub participant_id: String,
    pub is_speaking: bool,
}

/// `end-session` payload (host only).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndSessionPayload {
    pub session_id: String,
}

/// Every control message a client can send.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "join-session")]
    JoinSession(JoinSessionPayload),

    #[serde(rename = "audio_metadata")]
    AudioMetadata(AudioMetadataPayload),

    #[serde(rename = "audio-chunk-metadata")]
    AudioChunkMetadata { data: AudioChunkMetadataPayload },

    #[serde(rename = "speaker-status")]
    SpeakerStatus { data: SpeakerStatusPayload },

    #[serde(rename = "hand-raise")]
    HandRaise { data: HandRaisePayload },

    #[serde(rename = "speak-permission")]
    SpeakPermission { data: SpeakPermissionPayload },

    #[serde(rename = "end-session")]
    EndSession { data: EndSessionPayload },
}
