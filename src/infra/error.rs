use thiserror::Error;

use crate::config::LoadError;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("telemetry initialization failed: {0}")]
    Telemetry(String),
    #[error("configuration error: {message}")]
    Configuration { message: String },
}

impl InfraError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn telemetry(message: impl Into<String>) -> Self {
        Self::Telemetry(message.into())
    }
}

impl From<LoadError> for InfraError {
    fn from(error: LoadError) -> Self {
        Self::configuration(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_errors_become_configuration_errors() {
        let error = crate::config::load_from_str("[feed]\npage_size = 0\n")
            .map_err(InfraError::from)
            .expect_err("invalid page size");

        assert!(matches!(error, InfraError::Configuration { .. }));
        assert!(error.to_string().contains("feed.page_size"));
    }
}
