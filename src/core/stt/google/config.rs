//! Google-specific configuration for the Speech-to-Text v2 streaming API.

use crate::core::stt::base::{SttError, SttStreamConfig};

/// Stream configuration enriched with the project/location facts the v2 API
/// needs to address a recognizer.
#[derive(Debug, Clone)]
pub struct GoogleSttConfig {
    pub base: SttStreamConfig,
    pub project_id: String,
    pub location: String,
}

impl GoogleSttConfig {
    /// Builds the Google config, resolving the project id from the
    /// credentials when it is not embedded in the model field as
    /// `project_id:model`.
    pub fn resolve(base: &SttStreamConfig, project_from_creds: Option<String>) -> Result<Self, SttError> {
        let mut base = base.clone();

        let project_id = match base.model.split_once(':') {
            Some((project, model)) => {
                let project = project.to_string();
                base.model = model.to_string();
                project
            }
            None => project_from_creds.unwrap_or_default(),
        };

        if project_id.is_empty() {
            return Err(SttError::ConfigurationError(
                "Google Cloud project_id is required: embed it in the model field as \
                 'project_id:model' or use service account credentials carrying a project_id"
                    .to_string(),
            ));
        }

        Ok(Self {
            base,
            project_id,
            location: "global".to_string(),
        })
    }

    /// Fully qualified recognizer resource path. `recognizers/_` selects the
    /// ad-hoc recognizer configured per-stream.
    pub fn recognizer_path(&self) -> String {
        format!(
            "projects/{}/locations/{}/recognizers/_",
            self.project_id, self.location
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_from_model_field() {
        let base = SttStreamConfig {
            model: "my-project:chirp_2".to_string(),
            ..Default::default()
        };
        let config = GoogleSttConfig::resolve(&base, None).unwrap();
        assert_eq!(config.project_id, "my-project");
        assert_eq!(config.base.model, "chirp_2");
    }

    #[test]
    fn test_project_from_credentials() {
        let base = SttStreamConfig::default();
        let config = GoogleSttConfig::resolve(&base, Some("creds-project".to_string())).unwrap();
        assert_eq!(config.project_id, "creds-project");
        assert_eq!(config.base.model, "latest_long");
    }

    #[test]
    fn test_missing_project_is_an_error() {
        let base = SttStreamConfig::default();
        assert!(GoogleSttConfig::resolve(&base, None).is_err());
    }

    #[test]
    fn test_recognizer_path() {
        let base = SttStreamConfig::default();
        let config = GoogleSttConfig::resolve(&base, Some("p1".to_string())).unwrap();
        assert_eq!(
            config.recognizer_path(),
            "projects/p1/locations/global/recognizers/_"
        );
    }
}
