//! Google Cloud Translation (v2 REST) adapter.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::core::languages;
use crate::core::providers::google::{CredentialSource, GoogleAuthClient, TokenProvider};
use crate::core::retry::{with_retry, RetryPolicy};

use super::{TranslateError, Translator};

const TRANSLATE_URL: &str = "https://translation.googleapis.com/language/translate/v2";

/// Per-call deadline; the fan-out treats a slow translation as failed.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Deserialize)]
struct TranslateResponse {
    data: TranslateData,
}

#[derive(Deserialize)]
struct TranslateData {
    translations: Vec<Translation>,
}

#[derive(Deserialize)]
struct Translation {
    #[serde(rename = "translatedText")]
    translated_text: String,
}

/// Batch translator backed by the Translation v2 REST API.
pub struct GoogleTranslator {
    client: reqwest::Client,
    auth: Arc<dyn TokenProvider>,
    retry: RetryPolicy,
}

impl GoogleTranslator {
    pub fn from_credentials(credentials: &str) -> Result<Self, TranslateError> {
        let source = CredentialSource::from_credential_string(credentials);
        let auth = GoogleAuthClient::new(source)
            .map_err(|e| TranslateError::AuthenticationFailed(e.to_string()))?;
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

    /// The v2 API wants bare ISO-639 codes; strip the region off the locale.
    fn iso_code(display_name: &str) -> String {
        let locale = languages::locale_for(display_name);
        locale
            .split('-')
            .next()
            .unwrap_or(locale)
            // cmn (Mandarin) is not a valid v2 code; the API uses zh.
            .replace("cmn", "zh")
    }

    async fn call_once(
        &self,
        text: &str,
        source: &str,
        target: &str,
    ) -> Result<String, TranslateError> {
        let token = self
            .auth
            .token()
            .await
            .map_err(|e| TranslateError::AuthenticationFailed(e.to_string()))?;

        let response = self
            .client
            .post(TRANSLATE_URL)
            .bearer_auth(token)
            .json(&json!({
                "q": text,
                "source": source,
                "target": target,
                "format": "text",
            }))
            .send()
            .await
            .map_err(|e| TranslateError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(TranslateError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        let body: TranslateResponse = response
            .json()
            .await
            .map_err(|e| TranslateError::ProviderError(format!("malformed response: {e}")))?;

        body.data
            .translations
            .into_iter()
            .next()
            .map(|t| t.translated_text)
            .ok_or_else(|| TranslateError::ProviderError("empty translation list".to_string()))
    }
}

#[async_trait::async_trait]
impl Translator for GoogleTranslator {
    async fn translate(
        &self,
        text: &str,
        from_language: &str,
        to_language: &str,
    ) -> Result<String, TranslateError> {
        if languages::same_language(from_language, to_language) {
            return Ok(text.to_string());
        }

        let source = Self::iso_code(from_language);
        let target = Self::iso_code(to_language);

        debug!(%source, %target, chars = text.len(), "translating");

        with_retry("translate", &self.retry, || {
            self.call_once(text, &source, &target)
        })
        .await
    }
}
