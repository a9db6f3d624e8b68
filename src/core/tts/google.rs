//! Google Cloud Text-to-Speech (v1 REST) adapter.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::core::languages;
use crate::core::providers::google::{CredentialSource, GoogleAuthClient, TokenProvider};
use crate::core::retry::{with_retry, RetryPolicy};

use super::{SpeechSynthesizer, TtsError};

const TTS_URL: &str = "https://texttospeech.googleapis.com/v1/text:synthesize";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Deserialize)]
struct SynthesizeResponse {
    #[serde(rename = "audioContent")]
    audio_content: String,
}

/// Batch synthesizer backed by the Text-to-Speech v1 REST API. Output is
/// MP3, which is what goes on the wire to listeners (base64-wrapped).
pub struct GoogleSynthesizer {
    client: reqwest::Client,
    auth: Arc<dyn TokenProvider>,
    retry: RetryPolicy,
}

impl GoogleSynthesizer {
    pub fn from_credentials(credentials: &str) -> Result<Self, TtsError> {
        let source = CredentialSource::from_credential_string(credentials);
        let auth = GoogleAuthClient::new(source)
            .map_err(|e| TtsError::AuthenticationFailed(e.to_string()))?;
        Ok(Self::with_token_provider(Arc::new(auth)))
    }

    pub fn with_token_provider(auth: Arc<dyn TokenProvider>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            auth,
            retry: RetryPolicy::default(),
        }
    }

    async fn call_once(
        &self,
        text: &str,
        voice_locale: &str,
        voice_name: &str,
    ) -> Result<Bytes, TtsError> {
        let token = self
            .auth
            .token()
            .await
            .map_err(|e| TtsError::AuthenticationFailed(e.to_string()))?;

        let response = self
            .client
            .post(TTS_URL)
            .bearer_auth(token)
            .json(&json!({
                "input": { "text": text },
                "voice": { "languageCode": voice_locale, "name": voice_name },
                "audioConfig": { "audioEncoding": "MP3" },
            }))
            .send()
            .await
            .map_err(|e| TtsError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(TtsError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        let body: SynthesizeResponse = response
            .json()
            .await
            .map_err(|e| TtsError::ProviderError(format!("malformed response: {e}")))?;

        let audio = base64::engine::general_purpose::STANDARD
            .decode(body.audio_content)
            .map_err(|e| TtsError::ProviderError(format!("invalid audio encoding: {e}")))?;

        Ok(Bytes::from(audio))
    }
}

#[async_trait::async_trait]
impl SpeechSynthesizer for GoogleSynthesizer {
    async fn synthesize(
        &self,
        text: &str,
        language: &str,
        voice: Option<&str>,
    ) -> Result<Bytes, TtsError> {
        let voice_locale = languages::voice_locale_for(language);
        let voice_name = voice
            .map(str::to_string)
            .unwrap_or_else(|| languages::default_voice_for(voice_locale).to_string());

        debug!(%voice_locale, %voice_name, chars = text.len(), "synthesizing");

        with_retry("synthesize", &self.retry, || {
            self.call_once(text, voice_locale, &voice_name)
        })
        .await
    }
}
