//! Configuration validation.

use crate::config::types::ChimeConfig;
use crate::error::{Error, Result};

/// Validator for runtime configurations.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Creates a new validator.
    pub fn new() -> Self {
        Self
    }

    /// Validates a runtime configuration.
    pub fn validate(&self, config: &ChimeConfig) -> Result<()> {
        self.validate_volume(config)?;
        self.validate_tick_interval(config)?;
        self.validate_thread_name("coordinator_thread", &config.coordinator_thread)?;
        self.validate_thread_name("background_thread", &config.background_thread)?;
        Ok(())
    }

    fn validate_volume(&self, config: &ChimeConfig) -> Result<()> {
        if !(0.0..=1.0).contains(&config.default_volume) {
            return Err(Error::ConfigValidation(
                "default_volume".to_string(),
                format!("Volume must be between 0.0 and 1.0, got {}", config.default_volume),
            ));
        }
        Ok(())
    }

    fn validate_tick_interval(&self, config: &ChimeConfig) -> Result<()> {
        if config.tick_interval_ms == 0 {
            return Err(Error::ConfigValidation(
                "tick_interval_ms".to_string(),
                "Tick interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    fn validate_thread_name(&self, field: &str, name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(Error::ConfigValidation(
                field.to_string(),
                "Thread name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ConfigValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ConfigValidator::new().validate(&ChimeConfig::default()).is_ok());
    }

    #[test]
    fn test_volume_out_of_range() {
        let config = ChimeConfig {
            default_volume: 1.5,
            ..Default::default()
        };
        let result = ConfigValidator::new().validate(&config);
        assert!(matches!(result, Err(Error::ConfigValidation(field, _)) if field == "default_volume"));
    }

    #[test]
    fn test_zero_tick_interval() {
        let config = ChimeConfig {
            tick_interval_ms: 0,
            ..Default::default()
        };
        let result = ConfigValidator::new().validate(&config);
        assert!(matches!(result, Err(Error::ConfigValidation(field, _)) if field == "tick_interval_ms"));
    }

    #[test]
    fn test_blank_thread_name() {
        let config = ChimeConfig {
            background_thread: "  ".to_string(),
            ..Default::default()
        };
        assert!(ConfigValidator::new().validate(&config).is_err());
    }
}
