//! Google Cloud credential handling and OAuth2 token acquisition.
//!
//! Credentials come from one of three sources, inferred from the configured
//! credential string: empty → Application Default Credentials, a string
//! starting with `{` → inline service-account JSON, anything else → a path
//! to a credentials file. All three Google adapters (STT, Translation, TTS)
//! share this module.

use std::path::Path;

use google_cloud_auth::credentials::{Builder as CredentialsBuilder, Credentials};
use http::Extensions;
use tracing::{debug, error};

use super::error::GoogleError;

/// OAuth2 scope covering the Speech, Translation and Text-to-Speech APIs.
pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

/// Where the credentials come from.
#[derive(Debug, Clone, PartialEq)]
pub enum CredentialSource {
    /// `GOOGLE_APPLICATION_CREDENTIALS`, the GCP metadata server, or
    /// `gcloud auth application-default login`.
    ApplicationDefault,
    /// Service-account JSON passed inline (secrets-manager style).
    JsonContent(String),
    /// Path to a service-account JSON file.
    FilePath(String),
}

impl CredentialSource {
    /// Infers the source kind from the raw credential string.
    pub fn from_credential_string(raw: &str) -> Self {
        if raw.is_empty() {
            CredentialSource::ApplicationDefault
        } else if raw.trim_start().starts_with('{') {
            CredentialSource::JsonContent(raw.to_string())
        } else {
            CredentialSource::FilePath(raw.to_string())
        }
    }

    /// Cheap up-front validation so misconfiguration fails at startup, not
    /// on the first provider call.
    pub fn validate(&self) -> Result<(), GoogleError> {
        match self {
            CredentialSource::ApplicationDefault => Ok(()),
            CredentialSource::JsonContent(json) => {
                serde_json::from_str::<serde_json::Value>(json).map_err(|e| {
                    GoogleError::ConfigurationError(format!("invalid credentials JSON: {e}"))
                })?;
                Ok(())
            }
            CredentialSource::FilePath(path) => {
                if path.contains("..") {
                    return Err(GoogleError::ConfigurationError(
                        "credential path must not contain '..'".to_string(),
                    ));
                }
                if !Path::new(path).exists() {
                    return Err(GoogleError::ConfigurationError(format!(
                        "credential file not found: {path}"
                    )));
                }
                Ok(())
            }
        }
    }

    /// Reads `project_id` out of the credentials, when present.
    pub fn project_id(&self) -> Option<String> {
        let content = match self {
            CredentialSource::ApplicationDefault => {
                let path = std::env::var("GOOGLE_APPLICATION_CREDENTIALS").ok()?;
                std::fs::read_to_string(path).ok()?
            }
            CredentialSource::JsonContent(json) => json.clone(),
            CredentialSource::FilePath(path) => std::fs::read_to_string(path).ok()?,
        };
        serde_json::from_str::<serde_json::Value>(&content)
            .ok()?
            .get("project_id")?
            .as_str()
            .map(str::to_string)
    }
}

/// Token source abstraction so tests can substitute a canned token.
#[async_trait::async_trait]
pub trait TokenProvider: Send + Sync {
    /// Returns a currently valid access token, refreshing as needed.
    async fn token(&self) -> Result<String, GoogleError>;
}

/// Production token provider backed by `google-cloud-auth`.
pub struct GoogleAuthClient {
    credentials: Credentials,
}

impl std::fmt::Debug for GoogleAuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleAuthClient").finish_non_exhaustive()
    }
}

impl GoogleAuthClient {
    /// Builds a token provider for the given credential source.
    pub fn new(source: CredentialSource) -> Result<Self, GoogleError> {
        source.validate()?;

        let scopes = vec![CLOUD_PLATFORM_SCOPE.to_string()];

        let credentials = match source {
            CredentialSource::ApplicationDefault => CredentialsBuilder::default()
                .with_scopes(scopes)
                .build()
                .map_err(|e| {
                    error!(error = %e, "failed to initialize application default credentials");
                    GoogleError::AuthenticationFailed(format!(
                        "application default credentials unavailable: {e}"
                    ))
                })?,
            CredentialSource::JsonContent(json) => Self::service_account(&json, scopes)?,
            CredentialSource::FilePath(path) => {
                let json = std::fs::read_to_string(&path).map_err(|e| {
                    GoogleError::ConfigurationError(format!(
                        "failed to read credentials file '{path}': {e}"
                    ))
                })?;
                Self::service_account(&json, scopes)?
            }
        };

        debug!("google auth client initialized");
        Ok(Self { credentials })
    }

    fn service_account(json: &str, scopes: Vec<String>) -> Result<Credentials, GoogleError> {
        use google_cloud_auth::credentials::service_account;

        let value: serde_json::Value = serde_json::from_str(json).map_err(|e| {
            GoogleError::ConfigurationError(format!("invalid credentials JSON: {e}"))
        })?;

        service_account::Builder::new(value)
            .with_access_specifier(service_account::AccessSpecifier::from_scopes(scopes))
            .build()
            .map_err(|e| {
                error!(error = %e, "failed to load service account credentials");
                GoogleError::AuthenticationFailed(format!("service account rejected: {e}"))
            })
    }
}

#[async_trait::async_trait]
impl TokenProvider for GoogleAuthClient {
    async fn token(&self) -> Result<String, GoogleError> {
        use google_cloud_auth::credentials::CacheableResource;

        let headers = self
            .credentials
            .headers(Extensions::new())
            .await
            .map_err(|e| {
                GoogleError::AuthenticationFailed(format!("token acquisition failed: {e}"))
            })?;

        let header_map = match headers {
            CacheableResource::New { data, .. } => data,
            CacheableResource::NotModified => {
                return Err(GoogleError::AuthenticationFailed(
                    "credentials returned NotModified without a cached token".to_string(),
                ));
            }
        };

        header_map
            .get(http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::to_string)
            .ok_or_else(|| {
                GoogleError::AuthenticationFailed(
                    "credentials response carried no bearer token".to_string(),
                )
            })
    }
}

/// Canned token provider for tests.
pub struct StaticTokenProvider(pub String);

#[async_trait::async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn token(&self) -> Result<String, GoogleError> {
        Ok(self.0.clone())
    }
}
