//! Start-up error types.

use thiserror::Error;

/// Configuration errors. Any of these stops the process before the first
/// cycle runs.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    MissingSetting(String),

    #[error("Invalid value for {var}: {message}")]
    Invalid { var: &'static str, message: String },

    #[error("Configuration validation failed: {0}")]
    Validation(String),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

impl ConfigError {
    pub(crate) fn invalid(var: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            var,
            message: message.into(),
        }
    }

    /// Short hint printed next to the error when the process exits.
    pub fn hint(&self) -> &'static str {
        match self {
            ConfigError::MissingSetting(_) => "Set the variable in the environment or a .env file.",
            ConfigError::Invalid { .. } => "Check the variable's format.",
            ConfigError::Validation(_) => "Fix the listed settings and restart.",
            ConfigError::Logging(_) => "Check RUST_LOG.",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_names_the_variable() {
        let err = ConfigError::invalid("UNITS", "expected imperial or metric");
        assert_eq!(
            err.to_string(),
            "Invalid value for UNITS: expected imperial or metric"
        );
        assert_eq!(err.hint(), "Check the variable's format.");
    }
}
