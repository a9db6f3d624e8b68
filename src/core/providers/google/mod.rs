//! Shared Google Cloud client infrastructure: credentials, OAuth2 tokens,
//! gRPC channels and the common error type.

pub mod auth;
pub mod channel;
pub mod error;

pub use auth::{CredentialSource, GoogleAuthClient, StaticTokenProvider, TokenProvider};
pub use channel::{authorization_header, bearer_interceptor, connect_channel, SPEECH_ENDPOINT};
pub use error::GoogleError;
