use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Ошибки загрузки и валидации конфигурации шины.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("unsupported config version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("invalid value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("failed to load configuration: {reason}")]
    Load { reason: String },
}

impl ErrorExt for ConfigError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::UnsupportedVersion { .. } => StatusCode::UnsupportedVersion,
            Self::InvalidValue { .. } => StatusCode::InvalidConfig,
            Self::Load { .. } => StatusCode::ConfigLoadFailed,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_codes() {
        let err = ConfigError::UnsupportedVersion {
            found: 2,
            expected: 1,
        };
        assert_eq!(err.status_code(), StatusCode::UnsupportedVersion);
        assert!(err.status_code().is_config_error());

        let err = ConfigError::InvalidValue {
            field: "inbox_capacity",
            reason: "must be positive".to_string(),
        };
        assert!(err.to_string().contains("inbox_capacity"));
    }
}
