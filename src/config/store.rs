//! Persisted configuration store.
//!
//! The SpacetimeDB server hands out a (possibly refreshed) token on every
//! connection; it is written back to the config file so the next start
//! can reuse it.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::debug;

use crate::common::error::ConfigError;
use crate::config::parser::save_config;
use crate::config::types::Config;

/// Somewhere to keep the most recent access token.
pub trait TokenStore: Send + Sync {
    fn persist_token(&self, token: &str) -> Result<(), ConfigError>;
}

/// The on-disk `config.json`, kept in memory and rewritten on change.
pub struct ConfigFile {
    path: PathBuf,
    config: Mutex<Config>,
}

impl ConfigFile {
    pub fn new(path: impl AsRef<Path>, config: Config) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            config: Mutex::new(config),
        }
    }
}

impl TokenStore for ConfigFile {
    fn persist_token(&self, token: &str) -> Result<(), ConfigError> {
        let mut config = self.config.lock();
        config.spacetime_db_last_access_token = token.to_string();
        save_config(&self.path, &config)?;
        debug!("Saved access token to {}", self.path.display());
        Ok(())
    }
}
