//! Canonical message types for relay communication.
//!
//! This module defines the single source of truth for the chat rows
//! observed on the BitCraft side and the messages received from Discord.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A row of the `chat_message_state` table.
///
/// Rows are owned by the game server; the relay only reads them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessageRecord {
    /// Primary key of the row (0 when the server did not send one).
    #[serde(default)]
    pub entity_id: u64,
    /// In-game channel (see [`ChannelIdentity`]).
    pub channel_id: i32,
    /// Sender's character name.
    pub username: String,
    /// Message content.
    pub text: String,
    /// Unix timestamp in seconds.
    pub timestamp: i64,
}

impl ChatMessageRecord {
    /// Channel this message was posted in.
    pub fn channel(&self) -> ChannelIdentity {
        ChannelIdentity::from_id(self.channel_id)
    }
}

/// BitCraft chat channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelIdentity {
    System,
    Local,
    Region,
    Claim,
    Empire,
    Unknown(i32),
}

impl ChannelIdentity {
    pub fn from_id(id: i32) -> Self {
        match id {
            1 => Self::System,
            2 => Self::Local,
            3 => Self::Region,
            4 => Self::Claim,
            5 => Self::Empire,
            other => Self::Unknown(other),
        }
    }

    /// Convert to the wire value. Inverse of `from_id()`.
    pub fn to_id(self) -> i32 {
        match self {
            Self::System => 1,
            Self::Local => 2,
            Self::Region => 3,
            Self::Claim => 4,
            Self::Empire => 5,
            Self::Unknown(id) => id,
        }
    }
}

impl fmt::Display for ChannelIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System => f.write_str("System"),
            Self::Local => f.write_str("Local"),
            Self::Region => f.write_str("Region"),
            Self::Claim => f.write_str("Claim"),
            Self::Empire => f.write_str("Empire"),
            Self::Unknown(id) => write!(f, "Unknown ({})", id),
        }
    }
}

/// Message received from Discord, reduced to what the relay needs.
#[derive(Debug, Clone)]
pub struct InboundChatMessage {
    /// Discord channel ID.
    pub channel_id: u64,
    /// Author's user ID.
    pub author_id: u64,
    /// Author's display name (for logging).
    pub author_name: String,
    /// Whether the author is a bot account.
    pub author_is_bot: bool,
    /// Whether the author is the Discord system user.
    pub author_is_system: bool,
    /// Message content with mentions rendered as plain names.
    pub content: String,
}

impl InboundChatMessage {
    /// True when a real person wrote this message.
    pub fn is_from_human(&self) -> bool {
        !self.author_is_bot && !self.author_is_system
    }
}
