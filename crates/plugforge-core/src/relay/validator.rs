//! Final-plugin detection and validation.

use plugforge_types::config::ArtifactConfig;
use thiserror::Error;

/// Why a final plugin was rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationFailure {
    #[error("missing language marker '{0}'")]
    MissingLanguageMarker(String),

    #[error("missing header marker '{0}'")]
    MissingHeader(String),

    #[error("contains denied construct '{0}'")]
    DeniedConstruct(String),
}

/// Syntactic and safety gate over final plugin text.
#[derive(Debug, Clone)]
pub struct ArtifactValidator {
    header_marker: String,
    language_marker: String,
    deny_list: Vec<String>,
}

impl ArtifactValidator {
    pub fn new(config: &ArtifactConfig) -> Self {
        Self {
            header_marker: config.header_marker.clone(),
            language_marker: config.language_marker.clone(),
            deny_list: config.deny_list.clone(),
        }
    }

    pub fn check(&self, code: &str) -> Result<(), ValidationFailure> {
        if !code.contains(&self.language_marker) {
            return Err(ValidationFailure::MissingLanguageMarker(
                self.language_marker.clone(),
            ));
        }
        if !code.contains(&self.header_marker) {
            return Err(ValidationFailure::MissingHeader(self.header_marker.clone()));
        }
        if let Some(denied) = self.deny_list.iter().find(|d| code.contains(d.as_str())) {
            return Err(ValidationFailure::DeniedConstruct(denied.clone()));
        }
        Ok(())
    }

    pub fn validate(&self, code: &str) -> bool {
        self.check(code).is_ok()
    }
}

impl Default for ArtifactValidator {
    fn default() -> Self {
        Self::new(&ArtifactConfig::default())
    }
}

/// If `text` starts with `marker`, the trimmed remainder.
pub fn split_terminal<'a>(text: &'a str, marker: &str) -> Option<&'a str> {
    text.strip_prefix(marker).map(str::trim)
}
