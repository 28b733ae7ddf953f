//! Configuration parsing, validation and persistence.

pub mod env;
pub mod parser;
pub mod store;
pub mod types;
pub mod validate;

use std::path::Path;

pub use parser::{load_config, write_template};
pub use store::{ConfigFile, TokenStore};
pub use types::*;

use crate::common::error::ConfigError;

/// A config as found on disk and as the relay should use it.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Contents of the file, written back when the token changes.
    pub file: Config,
    /// File contents with environment overrides applied.
    pub effective: Config,
}

/// Load a config file, apply environment overrides, and validate it.
///
/// Returns `Ok(None)` when the file does not exist yet.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<Option<LoadedConfig>, ConfigError> {
    let Some(file) = load_config(path)? else {
        return Ok(None);
    };

    let effective = env::apply_env_overrides(file.clone());
    validate::validate_config(&effective)?;
    Ok(Some(LoadedConfig { file, effective }))
}
