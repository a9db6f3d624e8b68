use std::env;

/// Server configuration loaded from the environment (and `.env` when
/// present).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,

    /// Google Cloud credential string: empty for Application Default
    /// Credentials, inline service-account JSON, or a file path.
    pub google_credentials: String,
    /// Recognition model for streaming STT, optionally prefixed
    /// `project_id:`.
    pub stt_model: String,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let _ = dotenvy::dotenv();

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PORT")
            .unwrap_or_else(|_| "3002".to_string())
            .parse::<u16>()
            .map_err(|e| format!("Invalid port number: {e}"))?;

        let google_credentials = env::var("GOOGLE_CREDENTIALS").unwrap_or_default();
        let stt_model = env::var("STT_MODEL").unwrap_or_else(|_| "latest_long".to_string());

        Ok(ServerConfig {
            host,
            port,
            google_credentials,
            stt_model,
        })
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
