//! JSON settings file adapter.
//!
//! Implements [`ConfigPort`] on top of a single JSON document.  Writes go
//! to a sibling temp file first and are renamed into place, so a crash
//! mid-save leaves the previous settings intact.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::app::ports::ConfigPort;
use crate::config::MonitorConfig;
use crate::error::ConfigError;

pub struct JsonConfigFile {
    path: PathBuf,
}

impl JsonConfigFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigPort for JsonConfigFile {
    fn load(&self) -> Result<MonitorConfig, ConfigError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("JsonConfigFile: {} not found, using defaults", self.path.display());
                return Ok(MonitorConfig::default());
            }
            Err(e) => {
                warn!("JsonConfigFile: cannot read {}: {e}", self.path.display());
                return Err(ConfigError::Io);
            }
        };
        let config: MonitorConfig = serde_json::from_str(&text).map_err(|e| {
            warn!("JsonConfigFile: {} is not valid config: {e}", self.path.display());
            ConfigError::Corrupted
        })?;
        config.validate()?;
        info!("JsonConfigFile: loaded {}", self.path.display());
        Ok(config)
    }

    fn save(&self, config: &MonitorConfig) -> Result<(), ConfigError> {
        config.validate()?;
        let json = serde_json::to_string_pretty(config).map_err(|_| ConfigError::Io)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|_| ConfigError::Io)?;
        fs::rename(&tmp, &self.path).map_err(|_| ConfigError::Io)?;
        info!("JsonConfigFile: saved {}", self.path.display());
        Ok(())
    }
}
