//! Environment variable overrides for configuration.
//!
//! Supports overriding config values with environment variables:
//! - `CHATLINK_DISCORD_TOKEN` - Discord bot token
//! - `CHATLINK_OUTPUT_CHANNEL` - Discord output channel ID
//! - `CHATLINK_ACCESS_TOKEN` - SpacetimeDB access token
//! - `CHATLINK_DB_URL` - SpacetimeDB host URL
//! - `CHATLINK_DB_NAME` - SpacetimeDB module name

use std::env;

use crate::config::types::Config;

/// Environment variable prefix for all config overrides.
const ENV_PREFIX: &str = "CHATLINK";

/// Apply environment variable overrides to a config.
///
/// This allows secrets to be provided via the environment instead
/// of the config file.
pub fn apply_env_overrides(config: Config) -> Config {
    apply_overrides_from(config, |name| env::var(name).ok())
}

fn apply_overrides_from(mut config: Config, lookup: impl Fn(&str) -> Option<String>) -> Config {
    let var = |suffix: &str| lookup(&format!("{}_{}", ENV_PREFIX, suffix));

    if let Some(token) = var("DISCORD_TOKEN") {
        config.discord_token = token;
    }
    if let Some(channel) = var("OUTPUT_CHANNEL") {
        config.discord_output_channel = channel;
    }
    if let Some(token) = var("ACCESS_TOKEN") {
        config.spacetime_db_access_token = token;
    }
    if let Some(url) = var("DB_URL") {
        config.spacetime_db_url = url;
    }
    if let Some(name) = var("DB_NAME") {
        config.spacetime_db_name = name;
    }

    config
}

/// Get the config file path from environment or use default.
///
/// Checks `CHATLINK_CONFIG`, otherwise returns "config.json".
pub fn get_config_path() -> String {
    env::var(format!("{}_CONFIG", ENV_PREFIX)).unwrap_or_else(|_| "config.json".to_string())
}
