//! Configuration validation for Discraft.
//!
//! Startup refuses to continue on any of these errors.

use thiserror::Error;

use crate::config::{
    Config, DiscordConfig, LangConfig, LinkConfig, ObservabilityConfig, SessionConfig,
    StoreConfig, WebConfig,
};

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid port {port}: must be between 1 and 65535")]
    InvalidPort { port: u16, field: String },

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
        let sections: [&dyn Validate; 7] = [
            &self.discord,
            &self.lang,
            &self.store,
            &self.web,
            &self.session,
            &self.link,
            &self.observability,
        ];

        let mut errors: Vec<ValidationError> = sections
            .iter()
            .filter_map(|section| section.validate().err())
            .collect();

        if errors.is_empty() {
            Ok(())
        } else if errors.len() == 1 {
            Err(errors.remove(0))
        } else {
            Err(ValidationError::Multiple(errors))
        }
    }

    /// Load and validate configuration.
    pub fn load_and_validate(path: Option<&std::path::Path>) -> anyhow::Result<Self> {
        let config = match path {
            Some(path) => Self::load_from(path)?,
            None => Self::load()?,
        };
        config.validate().map_err(|e| anyhow::anyhow!("{}", e))?;
        Ok(config)
    }
}

/// Command prefixes must be a single non-empty word.
pub fn validate_prefix(prefix: &str) -> ValidationResult<()> {
    if prefix.is_empty() {
        return Err(ValidationError::MissingField {
            field: "discord.command_prefix".into(),
        });
    }
    if prefix.chars().any(char::is_whitespace) {
        return Err(ValidationError::InvalidValue {
            field: "discord.command_prefix".into(),
            reason: "cannot contain whitespace".into(),
        });
    }
    Ok(())
}

impl Validate for DiscordConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.bot_token.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "discord.bot_token".into(),
            });
        }
        validate_prefix(&self.command_prefix)
    }
}

impl Validate for LangConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.dir.is_empty() {
            return Err(ValidationError::MissingField {
                field: "lang.dir".into(),
            });
        }
        if self.bot_lang.is_empty() {
            return Err(ValidationError::MissingField {
                field: "lang.bot_lang".into(),
            });
        }
        Ok(())
    }
}

impl Validate for StoreConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.path.is_empty() {
            return Err(ValidationError::MissingField {
                field: "store.path".into(),
            });
        }
        if self.timeout_ms == 0 {
            return Err(ValidationError::InvalidValue {
                field: "store.timeout_ms".into(),
                reason: "must be greater than 0".into(),
            });
        }
        if self.retry_attempts > 1 {
            return Err(ValidationError::InvalidValue {
                field: "store.retry_attempts".into(),
                reason: "at most one retry is allowed".into(),
            });
        }
        Ok(())
    }
}

impl Validate for WebConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort {
                port: self.port,
                field: "web.port".into(),
            });
        }
        if self.host.parse::<std::net::IpAddr>().is_err() {
            return Err(ValidationError::InvalidValue {
                field: "web.host".into(),
                reason: format!("not an IP address: {}", self.host),
            });
        }
        Ok(())
    }
}

impl Validate for SessionConfig {
    fn validate(&self) -> ValidationResult<()> {
        for (field, value) in [
            ("session.flush_interval_ms", self.flush_interval_ms),
            ("session.idle_threshold_ms", self.idle_threshold_ms),
            ("session.sweep_interval_ms", self.sweep_interval_ms),
        ] {
            if value == 0 {
                return Err(ValidationError::InvalidValue {
                    field: field.into(),
                    reason: "must be greater than 0".into(),
                });
            }
        }
        Ok(())
    }
}

impl Validate for LinkConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.ttl_secs == 0 {
            return Err(ValidationError::InvalidValue {
                field: "link.ttl_secs".into(),
                reason: "must be greater than 0".into(),
            });
        }
        Ok(())
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

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.discord.bot_token = "token".into();
        config
    }

    #[test]
    fn test_valid_config() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_default_config_misses_token() {
        let result = Config::default().validate();
        match result {
            Err(ValidationError::MissingField { field }) => {
                assert_eq!(field, "discord.bot_token");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_prefix_with_whitespace() {
        let mut config = valid_config();
        config.discord.command_prefix = "!dis craft".into();
        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_empty_prefix() {
        assert!(validate_prefix("").is_err());
        assert!(validate_prefix("!d").is_ok());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = valid_config();
        config.observability.log_level = "invalid".into();
        if let Err(ValidationError::InvalidValue { field, .. }) = config.validate() {
            assert_eq!(field, "observability.log_level");
        } else {
            panic!("expected invalid log level");
        }
    }

    #[test]
    fn test_zero_port() {
        let mut config = valid_config();
        config.web.port = 0;
        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidPort { port: 0, .. })
        ));
    }

    #[test]
    fn test_multiple_errors_collected() {
        let mut config = Config::default();
        config.session.idle_threshold_ms = 0;
        config.link.ttl_secs = 0;
        match config.validate() {
            Err(ValidationError::Multiple(errors)) => assert_eq!(errors.len(), 3),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_second_retry_rejected() {
        let mut config = valid_config();
        config.store.retry_attempts = 2;
        assert!(config.validate().is_err());
    }
}
