//! Configuration validation.
//!
//! Validates configuration values and provides helpful error messages.

use crate::common::error::ConfigError;
use crate::config::types::{Config, PLACEHOLDER_CHANNEL_ID, PLACEHOLDER_DISCORD_TOKEN};

/// Validate a configuration and return detailed errors.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    // Discord
    if config.discord_token.is_empty() {
        errors.push("DiscordToken is required".to_string());
    }
    if config.discord_token == PLACEHOLDER_DISCORD_TOKEN {
        errors.push("DiscordToken has not been configured (still using placeholder)".to_string());
    }
    if config.discord_output_channel == PLACEHOLDER_CHANNEL_ID {
        errors.push(
            "DiscordOutputChannel has not been configured (still using placeholder)".to_string(),
        );
    } else if parse_snowflake(&config.discord_output_channel).is_none() {
        errors.push(format!(
            "DiscordOutputChannel must be a Discord channel ID (got '{}')",
            config.discord_output_channel
        ));
    }

    for (i, speaker) in config.allowed_speakers.iter().enumerate() {
        if !speaker.is_empty() && parse_snowflake(speaker).is_none() {
            errors.push(format!(
                "AllowedSpeakers[{}] is not a Discord user ID: '{}'",
                i, speaker
            ));
        }
    }

    for (name, id) in &config.discord_mentions {
        if name.trim().is_empty() {
            errors.push("DiscordMentions contains an empty name".to_string());
        }
        if parse_snowflake(id).is_none() {
            errors.push(format!(
                "DiscordMentions['{}'] is not a Discord user ID: '{}'",
                name, id
            ));
        }
    }

    // SpacetimeDB
    let url = config.spacetime_db_url.to_lowercase();
    if !["http://", "https://", "ws://", "wss://"]
        .iter()
        .any(|scheme| url.starts_with(scheme))
    {
        errors.push(format!(
            "SpacetimeDbUrl must start with http(s):// or ws(s):// (got '{}')",
            config.spacetime_db_url
        ));
    }
    if config.spacetime_db_access_token.trim().is_empty() {
        errors.push(
            "SpacetimeDbAccessToken is empty - log into BitCraft and paste your access token"
                .to_string(),
        );
    }
    if config.module_name().is_empty() {
        errors.push("SpacetimeDbName is required".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError {
            message: errors.join("\n"),
        })
    }
}

/// Parse a Discord snowflake ID (non-zero u64).
pub fn parse_snowflake(value: &str) -> Option<u64> {
    value.trim().parse::<u64>().ok().filter(|id| *id != 0)
}
