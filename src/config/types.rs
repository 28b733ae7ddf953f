//! Configuration type definitions.
//!
//! Keys are PascalCase so existing `config.json` files keep working.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Placeholder written into freshly generated configs.
pub const PLACEHOLDER_DISCORD_TOKEN: &str = "DiscordToken";
/// Placeholder for the output channel in freshly generated configs.
pub const PLACEHOLDER_CHANNEL_ID: &str = "ChannelId";

/// Root configuration structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Config {
    pub discord_token: String,
    #[serde(default)]
    pub discord_client_id: String,
    #[serde(default)]
    pub discord_output_guild: String,
    /// ID of the Discord channel messages are relayed to and read from.
    pub discord_output_channel: String,
    pub spacetime_db_url: String,
    pub spacetime_db_access_token: String,
    #[serde(default)]
    pub spacetime_db_name: String,
    /// Token handed back by the server on the most recent connection.
    #[serde(default)]
    pub spacetime_db_last_access_token: String,
    /// Relay every channel, not just Region chat.
    #[serde(default)]
    pub output_everything: bool,
    /// Write every observed row change to `raw.txt`.
    #[serde(default)]
    pub output_raw_log: bool,
    #[serde(default = "default_region")]
    pub bitcraft_region_number: u32,
    /// Discord user IDs allowed to speak into the game.
    #[serde(default)]
    pub allowed_speakers: Vec<String>,
    /// In-game name -> Discord user ID.
    #[serde(default)]
    pub discord_mentions: BTreeMap<String, String>,
    /// Delay before rebuilding a dropped SpacetimeDB connection.
    #[serde(default)]
    pub reconnect_delay_ms: u64,
    /// Delay before logging into Discord again after a disconnect.
    #[serde(default = "default_discord_retry_delay_ms")]
    pub discord_retry_delay_ms: u64,
}

fn default_region() -> u32 {
    6
}

fn default_discord_retry_delay_ms() -> u64 {
    5_000
}

impl Config {
    /// Defaults written on first run.
    pub fn template() -> Self {
        let mut discord_mentions = BTreeMap::new();
        discord_mentions.insert("aytimothy".to_string(), "108826894937374720".to_string());
        discord_mentions.insert("ayt".to_string(), "108826894937374720".to_string());

        Self {
            discord_token: PLACEHOLDER_DISCORD_TOKEN.to_string(),
            discord_client_id: "DiscordClientId".to_string(),
            discord_output_guild: "GuildId".to_string(),
            discord_output_channel: PLACEHOLDER_CHANNEL_ID.to_string(),
            spacetime_db_url: "https://bitcraft-early-access.spacetimedb.com".to_string(),
            spacetime_db_access_token: String::new(),
            spacetime_db_name: "bitcraft-6".to_string(),
            spacetime_db_last_access_token: "NA".to_string(),
            output_everything: false,
            output_raw_log: false,
            bitcraft_region_number: default_region(),
            allowed_speakers: vec![String::new()],
            discord_mentions,
            reconnect_delay_ms: 0,
            discord_retry_delay_ms: default_discord_retry_delay_ms(),
        }
    }

    /// Module name, falling back to the region's default database.
    pub fn module_name(&self) -> String {
        if self.spacetime_db_name.trim().is_empty() {
            format!("bitcraft-{}", self.bitcraft_region_number)
        } else {
            self.spacetime_db_name.clone()
        }
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn discord_retry_delay(&self) -> Duration {
        Duration::from_millis(self.discord_retry_delay_ms)
    }
}
