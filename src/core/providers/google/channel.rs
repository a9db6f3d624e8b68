//! TLS gRPC channel setup for Google Cloud APIs.

use std::sync::Arc;

use tracing::{debug, error};

use super::auth::TokenProvider;
use super::error::GoogleError;

/// Endpoint for the Speech-to-Text v2 streaming API.
pub const SPEECH_ENDPOINT: &str = "https://speech.googleapis.com";

/// Opens a TLS-secured gRPC channel to `endpoint`. Channels are cheap to
/// clone and safe to share across streams.
pub async fn connect_channel(endpoint: &str) -> Result<tonic::transport::Channel, GoogleError> {
    let channel = tonic::transport::Channel::from_shared(endpoint.to_string())
        .map_err(|e| GoogleError::ConfigurationError(format!("invalid endpoint '{endpoint}': {e}")))?
        .tls_config(tonic::transport::ClientTlsConfig::new())
        .map_err(|e| GoogleError::ConnectionFailed(format!("TLS configuration failed: {e}")))?
        .connect()
        .await
        .map_err(|e| {
            error!(error = %e, endpoint, "failed to connect to Google API");
            GoogleError::ConnectionFailed(format!("connect to '{endpoint}' failed: {e}"))
        })?;

    debug!(endpoint, "connected to Google Cloud API");
    Ok(channel)
}

/// Fetches a bearer token and renders it as an `authorization` header value.
pub async fn authorization_header(
    token_provider: &Arc<dyn TokenProvider>,
) -> Result<String, GoogleError> {
    let token = token_provider.token().await?;
    Ok(format!("Bearer {token}"))
}

/// Builds a tonic interceptor that stamps the given pre-fetched header onto
/// every request of a stream.
pub fn bearer_interceptor(
    auth_header: &str,
) -> Result<
    impl FnMut(tonic::Request<()>) -> Result<tonic::Request<()>, tonic::Status> + Clone,
    GoogleError,
> {
    let value: tonic::metadata::MetadataValue<_> = auth_header.parse().map_err(|_| {
        GoogleError::AuthenticationFailed("authorization header is not valid metadata".to_string())
    })?;

    Ok(move |mut request: tonic::Request<()>| {
        request.metadata_mut().insert("authorization", value.clone());
        Ok(request)
    })
}
