//! Per-connection state for the duplex channel.

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::core::languages::DEFAULT_LANGUAGE;

/// Minimum gap between accepted binary frames from one connection
/// (100 frames/s). Honest clients send at 20–60 Hz.
pub const MIN_FRAME_GAP: std::time::Duration = std::time::Duration::from_millis(10);

/// Speaking identity bound to the connection by `audio_metadata` or
/// `audio-chunk-metadata`.
#[derive(Debug, Clone)]
pub struct BoundSpeaker {
    pub participant_id: String,
    pub speaker_name: String,
}

/// State owned by a connection's reader task. Single-writer, no locking.
#[derive(Debug)]
pub struct ConnectionState {
    pub connection_id: String,
    /// Room this connection joined, set by the first successful
    /// `join-session`.
    pub session_id: Option<String>,
    /// Participant presence recorded at join, for disconnect cleanup.
    pub joined_participant_id: Option<String>,
    /// Current speaking identity for binary frames.
    pub speaker: Option<BoundSpeaker>,
    /// PCM rate declared by the latest `audio_metadata`.
    pub sample_rate: u32,
    /// Display language declared by the latest `audio_metadata`.
    pub language: String,
    /// Fired by session teardown; both transport tasks watch it and close
    /// the socket when it trips.
    pub cancel: CancellationToken,
    last_frame_at: Option<Instant>,
}

impl ConnectionState {
    pub fn new(connection_id: String) -> Self {
        Self {
            connection_id,
            session_id: None,
            joined_participant_id: None,
            speaker: None,
            sample_rate: 16000,
            language: DEFAULT_LANGUAGE.to_string(),
            cancel: CancellationToken::new(),
            last_frame_at: None,
        }
    }

    /// Ingress rate limiter: admits a frame only if the previous accepted
    /// one is at least [`MIN_FRAME_GAP`] old. Excess frames are dropped
    /// silently.
    pub fn admit_frame(&mut self) -> bool {
        let now = Instant::now();
        match self.last_frame_at {
            Some(last) if now.duration_since(last) < MIN_FRAME_GAP => false,
            _ => {
                self.last_frame_at = Some(now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let state = ConnectionState::new("c1".to_string());
        assert!(state.session_id.is_none());
        assert!(state.speaker.is_none());
        assert_eq!(state.sample_rate, 16000);
        assert_eq!(state.language, "English");
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_admits_spaced_frames() {
        let mut state = ConnectionState::new("c1".to_string());
        assert!(state.admit_frame());
        tokio::time::advance(MIN_FRAME_GAP).await;
        assert!(state.admit_frame());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_drops_burst() {
        let mut state = ConnectionState::new("c1".to_string());
        assert!(state.admit_frame());
        assert!(!state.admit_frame(), "back-to-back frame dropped");
        tokio::time::advance(std::time::Duration::from_millis(5)).await;
        assert!(!state.admit_frame(), "still inside the gap");
        tokio::time::advance(std::time::Duration::from_millis(5)).await;
        assert!(state.admit_frame());
    }
}
