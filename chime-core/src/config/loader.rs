//! YAML configuration loading.

use std::fs;
use std::path::Path;

use crate::config::types::ChimeConfig;
use crate::config::validator::ConfigValidator;
use crate::error::{Error, Result};

/// Environment variable naming a YAML config file for the process-wide registry.
pub const CONFIG_ENV_VAR: &str = "CHIME_CONFIG";

impl ChimeConfig {
    /// Loads and validates a config file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| Error::ConfigLoad(path.display().to_string(), e.to_string()))?;

        let mut config = Self::parse(&content, &path.display().to_string())?;
        config.resolve_relative_dirs(path.parent());
        ConfigValidator::new().validate(&config)?;
        Ok(config)
    }

    /// Parses and validates a config from a YAML string.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config = Self::parse(content, "<string>")?;
        ConfigValidator::new().validate(&config)?;
        Ok(config)
    }

    /// Loads the config named by `CHIME_CONFIG`, falling back to defaults when
    /// the variable is unset or the file is unusable.
    pub fn from_env() -> Self {
        match std::env::var(CONFIG_ENV_VAR) {
            Ok(path) if !path.trim().is_empty() => match Self::load(&path) {
                Ok(config) => {
                    tracing::info!("Loaded chime config from {}", path);
                    config
                }
                Err(e) => {
                    tracing::warn!("Ignoring {}={}: {}", CONFIG_ENV_VAR, path, e);
                    Self::default()
                }
            },
            _ => Self::default(),
        }
    }

    fn parse(content: &str, origin: &str) -> Result<Self> {
        // An empty document deserializes as null rather than an empty mapping.
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).map_err(|e| Error::ConfigParse(origin.to_string(), e.to_string()))
    }

    /// Makes relative sound dirs relative to the config file's directory.
    fn resolve_relative_dirs(&mut self, base: Option<&Path>) {
        let Some(base) = base else { return };
        for dir in &mut self.sound_dirs {
            if dir.is_relative() {
                *dir = base.join(&*dir);
            }
        }
    }
}
