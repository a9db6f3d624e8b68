//! Server-originated wire messages broadcast through session rooms.
//!
//! The control channel is JSON with a `type` tag; payload fields use the
//! camelCase names clients expect. Relayed moderation messages carry their
//! client payload verbatim as a `data` value.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

/// Live (non-final) transcription feedback.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InterimTranscriptPayload {
    pub text: String,
    pub participant_id: String,
    pub speaker_name: String,
    pub session_id: String,
}

/// One sentence translated into every language the room needs.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationPayload {
    pub session_id: String,
    pub participant_id: String,
    pub speaker_name: String,
    pub original_text: String,
    pub original_language: String,
    /// Display language → translated text. Passthrough entries carry the
    /// original text.
    pub translations: HashMap<String, String>,
    pub timestamp: u64,
    pub has_errors: bool,
    pub error_count: u32,
}

/// Synthesized audio for one language, MP3 wrapped in base64.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioSynthesizedPayload {
    pub language: String,
    pub audio_content: String,
    pub participant_id: String,
    pub speaker_name: String,
    pub text: String,
    pub timestamp: u64,
}

/// Membership change relayed to the room.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantEventPayload {
    pub session_id: String,
    pub participant_id: String,
    pub participant_name: String,
}

/// Everything the server sends down the duplex channel.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "interim-transcript")]
    InterimTranscript { data: InterimTranscriptPayload },

    #[serde(rename = "translation")]
    Translation { data: TranslationPayload },

    #[serde(rename = "audio-synthesized")]
    AudioSynthesized { data: AudioSynthesizedPayload },

    /// Relays: the client payload passes through untouched.
    #[serde(rename = "speaker-status")]
    SpeakerStatus { data: Value },

    #[serde(rename = "hand-raise")]
    HandRaise { data: Value },

    #[serde(rename = "speak-permission")]
    SpeakPermission { data: Value },

    #[serde(rename = "participant-joined")]
    ParticipantJoined { data: ParticipantEventPayload },

    #[serde(rename = "participant-left")]
    ParticipantLeft { data: ParticipantEventPayload },

    #[serde(rename = "session-ended")]
    SessionEnded { data: ParticipantEventPayload },

    #[serde(rename = "error")]
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translation_message_shape() {
        let message = ServerMessage::Translation {
            data: TranslationPayload {
                session_id: "s1".into(),
                participant_id: "p1".into(),
                speaker_name: "Ada".into(),
                original_text: "Hello.".into(),
                original_language: "English".into(),
                translations: HashMap::from([("Spanish".to_string(), "Hola.".to_string())]),
                timestamp: 123,
                has_errors: false,
                error_count: 0,
            },
        };

        let value: Value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["type"], "translation");
        assert_eq!(value["data"]["originalText"], "Hello.");
        assert_eq!(value["data"]["translations"]["Spanish"], "Hola.");
        assert_eq!(value["data"]["hasErrors"], false);
    }

    #[test]
    fn test_audio_message_shape() {
        let message = ServerMessage::AudioSynthesized {
            data: AudioSynthesizedPayload {
                language: "Spanish".into(),
                audio_content: "bXAz".into(),
                participant_id: "p1".into(),
                speaker_name: "Ada".into(),
                text: "Hola.".into(),
                timestamp: 123,
            },
        };

        let value: Value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["type"], "audio-synthesized");
        assert_eq!(value["data"]["audioContent"], "bXAz");
    }

    #[test]
    fn test_relay_passes_payload_through() {
        let payload = serde_json::json!({
            "sessionId": "s1",
            "participantId": "p2",
            "handRaised": true,
        });
        let message = ServerMessage::HandRaise {
            data: payload.clone(),
        };

        let value: Value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["type"], "hand-raise");
        assert_eq!(value["data"], payload);
    }
}
