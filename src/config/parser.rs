//! Configuration file parsing (JSON format).

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use crate::common::error::ConfigError;
use crate::config::types::Config;

/// Load configuration from a JSON file.
///
/// Returns `Ok(None)` when the file does not exist.
pub fn load_config(path: impl AsRef<Path>) -> Result<Option<Config>, ConfigError> {
    let path = path.as_ref();

    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(ConfigError::IoError {
                path: path.display().to_string(),
                source: e,
            })
        }
    };

    load_config_str(&content).map(Some)
}

/// Load configuration from a JSON string.
pub fn load_config_str(content: &str) -> Result<Config, ConfigError> {
    serde_json::from_str(content).map_err(|e| ConfigError::ParseError {
        message: e.to_string(),
    })
}

/// Write configuration back to disk (pretty-printed).
pub fn save_config(path: impl AsRef<Path>, config: &Config) -> Result<(), ConfigError> {
    let path = path.as_ref();
    let json = serde_json::to_string_pretty(config).map_err(|e| ConfigError::ParseError {
        message: e.to_string(),
    })?;

    fs::write(path, json).map_err(|e| ConfigError::WriteError {
        path: path.display().to_string(),
        source: e,
    })
}

/// Write the first-run template.
pub fn write_template(path: impl AsRef<Path>) -> Result<(), ConfigError> {
    save_config(path, &Config::template())
}
