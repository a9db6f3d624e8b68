//! Google Cloud Speech-to-Text v2 streaming provider.
//!
//! Each [`open_stream`](crate::core::stt::StreamingStt::open_stream) call
//! spawns a dedicated task that owns the gRPC bidirectional stream: caller
//! audio flows in through a bounded channel (with keep-alive silence
//! injected during gaps), recognition responses flow out as
//! [`SttEvent`]s. The provider itself is stateless apart from credentials,
//! so a speaker can hold an old and a new stream simultaneously while
//! rotating around the provider's ~5 minute session cap.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use google_api_proto::google::cloud::speech::v2::speech_client::SpeechClient;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use crate::core::providers::google::{
    authorization_header, bearer_interceptor, connect_channel, CredentialSource, GoogleAuthClient,
    GoogleError, TokenProvider, SPEECH_ENDPOINT,
};
use crate::core::stt::base::{SttError, SttEvent, SttStreamConfig, SttStreamHandle, StreamingStt};

use super::config::GoogleSttConfig;
use super::streaming::{
    build_audio_request, build_config_request, chunk_audio, handle_streaming_response,
    map_grpc_status, KeepaliveTracker, KEEPALIVE_INTERVAL,
};

/// Buffer for caller audio in flight to the gRPC task. Small enough to keep
/// latency bounded, large enough to absorb bursts.
const AUDIO_CHANNEL_BUFFER: usize = 32;

/// How long to wait for the gRPC channel before declaring the open failed.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

fn google_to_stt(e: GoogleError) -> SttError {
    match e {
        GoogleError::AuthenticationFailed(msg) => SttError::AuthenticationFailed(msg),
        GoogleError::ConfigurationError(msg) => SttError::ConfigurationError(msg),
        GoogleError::ConnectionFailed(msg) => SttError::ConnectionFailed(msg),
        GoogleError::NetworkError(msg) => SttError::NetworkError(msg),
        GoogleError::ApiError { status, message } => {
            SttError::ProviderError(format!("API error ({status}): {message}"))
        }
        GoogleError::GrpcError { code, message } => {
            SttError::ProviderError(format!("gRPC error ({code}): {message}"))
        }
    }
}

/// Streaming STT backed by Google Cloud Speech v2.
pub struct GoogleSpeechToText {
    auth: Arc<dyn TokenProvider>,
    project_id: Option<String>,
}

impl GoogleSpeechToText {
    /// Builds the provider from a credential string (empty for ADC, inline
    /// JSON, or a file path).
    pub fn from_credentials(credentials: &str) -> Result<Self, SttError> {
        let source = CredentialSource::from_credential_string(credentials);
        let project_id = source.project_id();
        let auth = GoogleAuthClient::new(source).map_err(google_to_stt)?;
        Ok(Self {
            auth: Arc::new(auth),
            project_id,
        })
    }

    /// Test seam: inject a token provider and project id directly.
    pub fn with_token_provider(auth: Arc<dyn TokenProvider>, project_id: String) -> Self {
        Self {
            auth,
            project_id: Some(project_id),
        }
    }
}

#[async_trait::async_trait]
impl StreamingStt for GoogleSpeechToText {
    async fn open_stream(&self, config: &SttStreamConfig) -> Result<SttStreamHandle, SttError> {
        let google_config = GoogleSttConfig::resolve(config, self.project_id.clone())?;

        let (audio_tx, audio_rx) = mpsc::channel::<Bytes>(AUDIO_CHANNEL_BUFFER);
        let (events_tx, events_rx) = mpsc::unbounded_channel::<SttEvent>();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (connected_tx, connected_rx) = oneshot::channel::<()>();

        let auth = self.auth.clone();
        tokio::spawn(run_stream(
            google_config,
            auth,
            audio_rx,
            shutdown_rx,
            events_tx,
            connected_tx,
        ));

        match tokio::time::timeout(CONNECT_TIMEOUT, connected_rx).await {
            Ok(Ok(())) => Ok(SttStreamHandle::new(audio_tx, events_rx, shutdown_tx)),
            Ok(Err(_)) => Err(SttError::ConnectionFailed(
                "stream task exited before the channel was established".to_string(),
            )),
            Err(_) => Err(SttError::ConnectionFailed(format!(
                "connection timeout ({}s)",
                CONNECT_TIMEOUT.as_secs()
            ))),
        }
    }

    fn provider_name(&self) -> &'static str {
        "Google Cloud Speech-to-Text v2"
    }
}

/// Owns one gRPC bidirectional stream from open to close.
async fn run_stream(
    config: GoogleSttConfig,
    auth: Arc<dyn TokenProvider>,
    audio_rx: mpsc::Receiver<Bytes>,
    shutdown_rx: oneshot::Receiver<()>,
    events_tx: mpsc::UnboundedSender<SttEvent>,
    connected_tx: oneshot::Sender<()>,
) {
    let channel = match connect_channel(SPEECH_ENDPOINT).await {
        Ok(channel) => channel,
        Err(e) => {
            let _ = events_tx.send(SttEvent::Error(google_to_stt(e)));
            return;
        }
    };

    let auth_header = match authorization_header(&auth).await {
        Ok(header) => header,
        Err(e) => {
            let _ = events_tx.send(SttEvent::Error(google_to_stt(e)));
            return;
        }
    };
    let interceptor = match bearer_interceptor(&auth_header) {
        Ok(interceptor) => interceptor,
        Err(e) => {
            let _ = events_tx.send(SttEvent::Error(google_to_stt(e)));
            return;
        }
    };

    let mut client = SpeechClient::with_interceptor(channel, interceptor);

    info!(recognizer = %config.recognizer_path(), "speech stream connected");
    let _ = connected_tx.send(());

    let recognizer = config.recognizer_path();
    let initial_request = build_config_request(&config);
    let sample_rate = config.base.sample_rate;
    let fallback_language = config.base.primary_language.clone();

    let request_stream = async_stream::stream! {
        yield initial_request;

        let mut audio_rx = audio_rx;
        let mut shutdown_rx = shutdown_rx;
        let mut keepalive = KeepaliveTracker::new(sample_rate);
        let mut keepalive_timer = tokio::time::interval(KEEPALIVE_INTERVAL);

        loop {
            tokio::select! {
                biased;

                frame = audio_rx.recv() => {
                    match frame {
                        Some(frame) => {
                            keepalive.touch();
                            for chunk in chunk_audio(frame) {
                                yield build_audio_request(chunk, recognizer.clone());
                            }
                        }
                        None => {
                            debug!("audio channel closed, ending request stream");
                            break;
                        }
                    }
                }

                _ = keepalive_timer.tick() => {
                    if keepalive.needs_keepalive() {
                        yield build_audio_request(keepalive.silence(), recognizer.clone());
                        keepalive.touch();
                    }
                }

                _ = &mut shutdown_rx => {
                    debug!("shutdown requested, ending request stream");
                    break;
                }
            }
        }
    };

    let response = match client.streaming_recognize(request_stream).await {
        Ok(response) => response,
        Err(status) => {
            let err = map_grpc_status(status);
            error!(error = %err, "failed to start streaming recognition");
            let _ = events_tx.send(SttEvent::Error(err));
            return;
        }
    };

    let mut responses = response.into_inner();
    loop {
        match responses.message().await {
            Ok(Some(message)) => {
                if handle_streaming_response(message, &events_tx, &fallback_language).is_err() {
                    break;
                }
            }
            Ok(None) => {
                info!("speech stream ended by provider");
                break;
            }
            Err(status) => {
                let err = map_grpc_status(status);
                error!(error = %err, "speech stream error");
                let _ = events_tx.send(SttEvent::Error(err));
                break;
            }
        }
    }

    let _ = events_tx.send(SttEvent::Ended);
}
