//! Shared test fixture: a server bound on an ephemeral port wired to
//! scriptable provider doubles and pre-seeded in-memory stores.
//!
//! Each test binary uses its own subset of these helpers.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream};

use polyvoice::core::now_millis;
use polyvoice::core::stt::{
    SttError, SttEvent, SttStreamConfig, SttStreamHandle, StreamingStt, TranscriptFragment,
};
use polyvoice::core::translate::{TranslateError, Translator};
use polyvoice::core::tts::{SpeechSynthesizer, TtsError};
use polyvoice::store::{
    MemoryParticipantStore, MemorySessionStore, MemoryTranslationStore, Participant,
    PreferredOutput, Role, Session,
};
use polyvoice::{AppState, ServerConfig};

/// One STT stream opened by the server, scriptable from the test.
pub struct ScriptedStream {
    pub audio_rx: mpsc::Receiver<Bytes>,
    pub events_tx: mpsc::UnboundedSender<SttEvent>,
}

/// STT double that records every opened stream.
pub struct ScriptedStt {
    pub streams: Arc<Mutex<Vec<ScriptedStream>>>,
}

impl ScriptedStt {
    pub fn new() -> (Arc<Self>, Arc<Mutex<Vec<ScriptedStream>>>) {
        let streams = Arc::new(Mutex::new(Vec::new()));
        (
            Arc::new(Self {
                streams: streams.clone(),
            }),
            streams,
        )
    }
}

#[async_trait::async_trait]
impl StreamingStt for ScriptedStt {
    async fn open_stream(&self, _config: &SttStreamConfig) -> Result<SttStreamHandle, SttError> {
        let (audio_tx, audio_rx) = mpsc::channel(64);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _shutdown_rx) = oneshot::channel();
        self.streams.lock().push(ScriptedStream {
            audio_rx,
            events_tx,
        });
        Ok(SttStreamHandle::new(audio_tx, events_rx, shutdown_tx))
    }

    fn provider_name(&self) -> &'static str {
        "scripted"
    }
}

/// Translator double: tags the text with the target language.
pub struct TaggingTranslator;

#[async_trait::async_trait]
impl Translator for TaggingTranslator {
    async fn translate(&self, text: &str, _from: &str, to: &str) -> Result<String, TranslateError> {
        Ok(format!("[{to}] {text}"))
    }
}

/// Synthesizer double: fixed MP3-ish bytes.
pub struct CannedSynthesizer;

#[async_trait::async_trait]
impl SpeechSynthesizer for CannedSynthesizer {
    async fn synthesize(
        &self,
        _text: &str,
        _language: &str,
        _voice: Option<&str>,
    ) -> Result<Bytes, TtsError> {
        Ok(Bytes::from_static(b"canned-mp3"))
    }
}

pub struct TestServer {
    pub url: String,
    pub app: Arc<AppState>,
    pub stt_streams: Arc<Mutex<Vec<ScriptedStream>>>,
    pub sessions: Arc<MemorySessionStore>,
    pub participants: Arc<MemoryParticipantStore>,
    pub translations: Arc<MemoryTranslationStore>,
}

/// Boots the full router on 127.0.0.1:0 with doubles for every provider.
pub async fn start_server() -> TestServer {
    let config = ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        google_credentials: String::new(),
        stt_model: "test-project:latest_long".to_string(),
    };

    let (stt, stt_streams) = ScriptedStt::new();
    let sessions = Arc::new(MemorySessionStore::new());
    let participants = Arc::new(MemoryParticipantStore::new());
    let translations = Arc::new(MemoryTranslationStore::new());

    let app = AppState::with_components(
        config,
        stt,
        Arc::new(TaggingTranslator),
        Arc::new(CannedSynthesizer),
        sessions.clone(),
        participants.clone(),
        translations.clone(),
    );

    let router = axum::Router::new()
        .merge(polyvoice::routes::api::create_api_router())
        .merge(polyvoice::routes::ws::create_ws_router())
        .with_state(app.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    TestServer {
        url: format!("ws://{addr}/ws"),
        app,
        stt_streams,
        sessions,
        participants,
        translations,
    }
}

pub type WsClient = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

pub async fn connect(server: &TestServer) -> WsClient {
    let (stream, _) = connect_async(&server.url).await.expect("connect");
    stream
}

pub async fn send_json(client: &mut WsClient, value: serde_json::Value) {
    client
        .send(Message::Text(value.to_string().into()))
        .await
        .unwrap();
}

/// Receives the next text frame within the timeout, parsed as JSON.
pub async fn recv_json(client: &mut WsClient, timeout: Duration) -> Option<serde_json::Value> {
    loop {
        let frame = tokio::time::timeout(timeout, client.next()).await.ok()??;
        match frame.ok()? {
            Message::Text(text) => return serde_json::from_str(&text).ok(),
            Message::Ping(_) | Message::Pong(_) => continue,
            _ => return None,
        }
    }
}

/// Collects messages until `predicate` matches or the deadline passes.
pub async fn recv_until(
    client: &mut WsClient,
    deadline: Duration,
    predicate: impl Fn(&serde_json::Value) -> bool,
) -> (Vec<serde_json::Value>, Option<serde_json::Value>) {
    let mut seen = Vec::new();
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        match recv_json(client, Duration::from_millis(200)).await {
            Some(value) if predicate(&value) => return (seen, Some(value)),
            Some(value) => seen.push(value),
            None => {}
        }
    }
    (seen, None)
}

pub fn seed_session(server: &TestServer, session_id: &str, host_id: &str) {
    server.sessions.insert(Session {
        session_id: session_id.to_string(),
        host_participant_id: host_id.to_string(),
        expires_at: now_millis() + 600_000,
    });
}

pub fn seed_participant(
    server: &TestServer,
    session_id: &str,
    participant_id: &str,
    name: &str,
    role: Role,
    language: &str,
    output: PreferredOutput,
    is_speaking: bool,
) {
    server.participants.insert(Participant {
        participant_id: participant_id.to_string(),
        session_id: session_id.to_string(),
        name: name.to_string(),
        role,
        language: language.to_string(),
        preferred_output: output,
        is_speaking,
        hand_raised: false,
    });
}

/// 100ms of loud-enough 16-bit PCM at 16kHz.
pub fn voiced_frame() -> Vec<u8> {
    [12000i16, -12000]
        .repeat(800)
        .iter()
        .flat_map(|s| s.to_le_bytes())
        .collect()
}

/// Waits until the server has opened `count` STT streams.
pub async fn wait_for_streams(server: &TestServer, count: usize) {
    for _ in 0..100 {
        if server.stt_streams.lock().len() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "expected {count} STT streams, saw {}",
        server.stt_streams.lock().len()
    );
}

/// Sends a finalized transcript fragment on stream `index`.
pub fn send_final(server: &TestServer, index: usize, text: &str) {
    server.stt_streams.lock()[index]
        .events_tx
        .send(SttEvent::Transcript(TranscriptFragment::new(
            text.to_string(),
            "en-US".to_string(),
            0.95,
            true,
        )))
        .unwrap();
}
