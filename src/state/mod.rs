//! Shared application state.
//!
//! The room registry, stream manager and synthesis cache are the only
//! process-global mutable structures. They are constructed once here,
//! passed to handlers through axum state, and torn down by
//! [`AppState::shutdown`]; there are no ambient singletons.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::core::cache::SynthesisCache;
use crate::core::fanout::TranslationFanout;
use crate::core::rooms::{ParticipantEventPayload, RoomRegistry, ServerMessage};
use crate::core::speaker::manager::{StreamDefaults, StreamManager};
use crate::core::stt::{GoogleSpeechToText, StreamingStt};
use crate::core::translate::{GoogleTranslator, Translator};
use crate::core::tts::{GoogleSynthesizer, SpeechSynthesizer};
use crate::store::{
    MemoryParticipantStore, MemorySessionStore, MemoryTranslationStore, ParticipantStore,
    SessionStore, TranslationStore,
};

/// How often expired sessions are swept.
const EXPIRY_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub rooms: Arc<RoomRegistry>,
    pub streams: Arc<StreamManager>,
    pub cache: Arc<SynthesisCache>,
    pub sessions: Arc<dyn SessionStore>,
    pub participants: Arc<dyn ParticipantStore>,
    pub translations: Arc<dyn TranslationStore>,
}

impl AppState {
    /// Production wiring: Google providers, in-memory stores.
    pub fn new(config: ServerConfig) -> anyhow::Result<Arc<Self>> {
        let stt = Arc::new(GoogleSpeechToText::from_credentials(
            &config.google_credentials,
        )?);
        let translator = Arc::new(GoogleTranslator::from_credentials(
            &config.google_credentials,
        )?);
        let synthesizer = Arc::new(GoogleSynthesizer::from_credentials(
            &config.google_credentials,
        )?);

        Ok(Self::with_components(
            config,
            stt,
            translator,
            synthesizer,
            Arc::new(MemorySessionStore::new()),
            Arc::new(MemoryParticipantStore::new()),
            Arc::new(MemoryTranslationStore::new()),
        ))
    }

    /// Explicit wiring, used by tests to inject provider doubles and
    /// pre-seeded stores.
    pub fn with_components(
        config: ServerConfig,
        stt: Arc<dyn StreamingStt>,
        translator: Arc<dyn Translator>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        sessions: Arc<dyn SessionStore>,
        participants: Arc<dyn ParticipantStore>,
        translations: Arc<dyn TranslationStore>,
    ) -> Arc<Self> {
        let rooms = Arc::new(RoomRegistry::new());
        let cache = Arc::new(SynthesisCache::new());

        let fanout = Arc::new(TranslationFanout::new(
            participants.clone(),
            translations.clone(),
            translator,
            synthesizer,
            cache.clone(),
            rooms.clone(),
        ));

        let streams = StreamManager::new(
            stt,
            fanout,
            rooms.clone(),
            StreamDefaults {
                credentials: config.google_credentials.clone(),
                model: config.stt_model.clone(),
            },
        );

        let state = Arc::new(Self {
            config,
            rooms,
            streams,
            cache,
            sessions,
            participants,
            translations,
        });
        state.start_expiry_sweeper();
        state
    }

    /// Periodically ends sessions whose `expires_at` has passed: stops
    /// their speaker streams and removes the room after a final
    /// `session-ended` broadcast.
    fn start_expiry_sweeper(self: &Arc<Self>) {
        let state = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(EXPIRY_SWEEP_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let Some(state) = state.upgrade() else { break };
                state.sweep_expired_sessions().await;
            }
        });
    }

    async fn sweep_expired_sessions(&self) {
        for session_id in self.rooms.session_ids() {
            let expired = match self.sessions.get_session(&session_id).await {
                Ok(Some(session)) => session.is_expired(),
                Ok(None) => true,
                Err(e) => {
                    warn!(session_id = %session_id, error = %e, "session lookup failed in sweeper");
                    false
                }
            };
            if !expired {
                continue;
            }

            info!(session_id = %session_id, "session expired, tearing down room");
            self.streams.stop_session(&session_id).await;
            if let Some(room) = self.rooms.end_session(&session_id) {
                room.broadcast(&ServerMessage::SessionEnded {
                    data: ParticipantEventPayload {
                        session_id: session_id.clone(),
                        participant_id: String::new(),
                        participant_name: String::new(),
                    },
                });
                room.close_connections();
            }
        }
    }

    /// Stops every speaker stream and clears shared caches. Called once on
    /// graceful shutdown.
    pub async fn shutdown(&self) {
        self.streams.destroy().await;
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tokio::sync::{mpsc, oneshot};
    use tokio_util::sync::CancellationToken;

    use crate::core::now_millis;
    use crate::core::rooms::ListenerHandle;
    use crate::core::stt::{SttError, SttStreamConfig, SttStreamHandle, StreamingStt};
    use crate::core::translate::{TranslateError, Translator};
    use crate::core::tts::{SpeechSynthesizer, TtsError};
    use crate::store::{
        MemoryParticipantStore, MemorySessionStore, MemoryTranslationStore, Session,
    };

    struct NullStt;

    #[async_trait::async_trait]
    impl StreamingStt for NullStt {
        async fn open_stream(&self, _: &SttStreamConfig) -> Result<SttStreamHandle, SttError> {
            let (audio_tx, _audio_rx) = mpsc::channel(8);
            let (_events_tx, events_rx) = mpsc::unbounded_channel();
            let (shutdown_tx, _shutdown_rx) = oneshot::channel();
            Ok(SttStreamHandle::new(audio_tx, events_rx, shutdown_tx))
        }

        fn provider_name(&self) -> &'static str {
            "null"
        }
    }

    struct NullTranslator;

    #[async_trait::async_trait]
    impl Translator for NullTranslator {
        async fn translate(&self, text: &str, _: &str, _: &str) -> Result<String, TranslateError> {
            Ok(text.to_string())
        }
    }

    struct NullSynthesizer;

    #[async_trait::async_trait]
    impl SpeechSynthesizer for NullSynthesizer {
        async fn synthesize(&self, _: &str, _: &str, _: Option<&str>) -> Result<Bytes, TtsError> {
            Ok(Bytes::new())
        }
    }

    fn app(sessions: Arc<MemorySessionStore>) -> Arc<AppState> {
        AppState::with_components(
            ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
                google_credentials: String::new(),
                stt_model: "p:latest_long".to_string(),
            },
            Arc::new(NullStt),
            Arc::new(NullTranslator),
            Arc::new(NullSynthesizer),
            sessions,
            Arc::new(MemoryParticipantStore::new()),
            Arc::new(MemoryTranslationStore::new()),
        )
    }

    #[tokio::test]
    async fn test_sweeper_ends_expired_sessions() {
        let sessions = Arc::new(MemorySessionStore::new());
        sessions.insert(Session {
            session_id: "s1".to_string(),
            host_participant_id: "h".to_string(),
            expires_at: now_millis() + 60_000,
        });
        let app = app(sessions.clone());

        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        app.rooms.join(
            "s1",
            ListenerHandle::new("c1".to_string(), tx, cancel.clone()),
        );
        assert_eq!(app.rooms.room_count(), 1);

        // Still valid: the sweep leaves it alone.
        app.sweep_expired_sessions().await;
        assert_eq!(app.rooms.room_count(), 1);
        assert!(!cancel.is_cancelled());

        // Expire it and sweep again.
        sessions.insert(Session {
            session_id: "s1".to_string(),
            host_participant_id: "h".to_string(),
            expires_at: now_millis().saturating_sub(1),
        });
        app.sweep_expired_sessions().await;

        assert_eq!(app.rooms.room_count(), 0);
        let ended = rx.try_recv().expect("session-ended broadcast");
        assert!(ended.contains("session-ended"));
        assert!(
            cancel.is_cancelled(),
            "expired session closes its listener connections"
        );
    }

    #[tokio::test]
    async fn test_sweeper_removes_rooms_of_unknown_sessions() {
        let app = app(Arc::new(MemorySessionStore::new()));
        let (tx, _rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        app.rooms.join(
            "ghost",
            ListenerHandle::new("c1".to_string(), tx, cancel.clone()),
        );

        app.sweep_expired_sessions().await;
        assert_eq!(app.rooms.room_count(), 0);
        assert!(cancel.is_cancelled());
    }
}
