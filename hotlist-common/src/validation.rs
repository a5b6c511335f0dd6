//! Configuration validation.
//!
//! Checks that configured values are present and within valid ranges
//! before any service is started with them.

use anyhow::Context;
use std::path::Path;
use thiserror::Error;

use crate::config::{Config, ObservabilityConfig, StoreConfig, TushareConfig};

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validatable configuration sections.
pub trait Validate {
    /// Validate this configuration section.
    fn validate(&self) -> ValidationResult<()>;
}

impl Config {
    /// Validate the entire configuration.
    pub fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = self.observability.validate() {
            errors.push(e);
        }
        if let Err(e) = self.tushare.validate() {
            errors.push(e);
        }
        if let Err(e) = self.store.validate() {
            errors.push(e);
        }

        if errors.is_empty() {
            Ok(())
        } else if errors.len() == 1 {
            Err(errors.remove(0))
        } else {
            Err(ValidationError::Multiple(errors))
        }
    }

    /// Load from `path` (or the default location), apply environment
    /// overrides and validate.
    pub fn load_and_validate_from(path: Option<&Path>) -> anyhow::Result<Self> {
        let config = match path {
            Some(path) => {
                let mut config = Self::load_from(path)?;
                config.apply_env_overrides();
                config
            }
            None => Self::load_with_env()?,
        };
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("{}", e))
            .context("Invalid configuration")?;
        Ok(config)
    }

    /// Require a Tushare token, as needed by the vendor-backed adapters.
    pub fn require_tushare_token(&self) -> ValidationResult<&str> {
        self.tushare
            .token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ValidationError::MissingField {
                field: "tushare.token (or TUSHARE_TOKEN)".into(),
            })
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_level".into(),
                reason: format!("must be one of: {}", valid_levels.join(", ")),
            });
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.log_format.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_format".into(),
                reason: format!("must be one of: {}", valid_formats.join(", ")),
            });
        }

        Ok(())
    }
}

impl Validate for TushareConfig {
    fn validate(&self) -> ValidationResult<()> {
        if url::Url::parse(&self.base_url).is_err() {
            return Err(ValidationError::InvalidValue {
                field: "tushare.base_url".into(),
                reason: format!("not a valid URL: {}", self.base_url),
            });
        }
        if self.timeout_secs == 0 {
            return Err(ValidationError::InvalidValue {
                field: "tushare.timeout_secs".into(),
                reason: "must be greater than 0".into(),
            });
        }
        if self.requests_per_minute == 0 {
            return Err(ValidationError::InvalidValue {
                field: "tushare.requests_per_minute".into(),
                reason: "must be greater than 0".into(),
            });
        }
        Ok(())
    }
}

impl Validate for StoreConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.retention_days == 0 {
            return Err(ValidationError::InvalidValue {
                field: "store.retention_days".into(),
                reason: "must be greater than 0".into(),
            });
        }
        if self.max_range_days == 0 || self.max_range_days > self.retention_days {
            return Err(ValidationError::InvalidValue {
                field: "store.max_range_days".into(),
                reason: format!("must be between 1 and retention_days ({})", self.retention_days),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = Config::default();
        config.observability.log_level = "loud".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("observability.log_level"));
    }

    #[test]
    fn test_multiple_errors_collected() {
        let mut config = Config::default();
        config.observability.log_format = "xml".into();
        config.tushare.timeout_secs = 0;
        config.store.retention_days = 0;
        match config.validate() {
            Err(ValidationError::Multiple(errors)) => assert_eq!(errors.len(), 3),
            other => panic!("expected multiple errors, got {:?}", other),
        }
    }

    #[test]
    fn test_range_longer_than_retention() {
        let mut config = Config::default();
        config.store.retention_days = 30;
        config.store.max_range_days = 60;
        assert!(config.store.validate().is_err());
    }

    #[test]
    fn test_load_and_validate_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        std::fs::write(&path, r#"{ "store": { "max_range_days": 10 } }"#).unwrap();
        let config = Config::load_and_validate_from(Some(&path)).unwrap();
        assert_eq!(config.store.max_range_days, 10);

        std::fs::write(&path, r#"{ "store": { "retention_days": 0 } }"#).unwrap();
        let err = Config::load_and_validate_from(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("Invalid configuration"));
        assert!(format!("{:#}", err).contains("store.retention_days"));
    }

    #[test]
    fn test_require_token() {
        let mut config = Config::default();
        assert!(config.require_tushare_token().is_err());
        config.tushare.token = Some("t0k".into());
        assert_eq!(config.require_tushare_token().unwrap(), "t0k");
    }
}
