//! Discord bot integration.
//!
//! This module provides the Discord side of the relay: the serenity
//! client and the `ChatSink` the relay sends through.

pub mod client;
pub mod sink;

use std::sync::Arc;

use crate::bridge::state::OutboundChannel;
use crate::common::error::DiscordError;

// Re-export main types for external use
pub use client::DiscordBot;
pub use sink::SerenitySink;

/// A resolved Discord text channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelHandle {
    pub id: u64,
    pub name: String,
}

/// Outbound side of the chat platform.
pub trait ChatSink: Send + Sync {
    /// Look up a text channel the bot can post in.
    fn resolve_channel(&self, channel_id: u64) -> Result<ChannelHandle, DiscordError>;

    /// Send without waiting for the result. If the channel turns out to
    /// be gone, `cache` is invalidated so the next message re-resolves it.
    fn send_message(&self, channel: &ChannelHandle, text: String, cache: Arc<OutboundChannel>);
}
