//! Sending relay output through serenity.

use std::sync::Arc;

use parking_lot::RwLock;
use serenity::builder::{CreateAllowedMentions, CreateMessage};
use serenity::cache::Cache;
use serenity::http::Http;
use serenity::model::channel::ChannelType;
use serenity::model::id::ChannelId;
use tracing::{debug, warn};

use crate::bridge::state::OutboundChannel;
use crate::common::error::DiscordError;
use crate::discord::{ChannelHandle, ChatSink};

/// Cache and HTTP handles of the current gateway session.
struct Session {
    cache: Arc<Cache>,
    http: Arc<Http>,
}

/// `ChatSink` backed by the live serenity client.
///
/// Empty until the first `ready` event.
#[derive(Default)]
pub struct SerenitySink {
    session: RwLock<Option<Session>>,
}

impl SerenitySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the handles of a freshly logged-in client.
    pub fn set_session(&self, cache: Arc<Cache>, http: Arc<Http>) {
        *self.session.write() = Some(Session { cache, http });
    }

    pub fn clear_session(&self) {
        *self.session.write() = None;
    }
}

impl ChatSink for SerenitySink {
    fn resolve_channel(&self, channel_id: u64) -> Result<ChannelHandle, DiscordError> {
        if channel_id == 0 {
            return Err(DiscordError::ChannelNotFound { channel_id });
        }

        let session = self.session.read();
        let Some(session) = session.as_ref() else {
            return Err(DiscordError::NotReady);
        };

        let channel = session
            .cache
            .channel(ChannelId::new(channel_id))
            .ok_or(DiscordError::ChannelNotFound { channel_id })?;

        if !matches!(channel.kind, ChannelType::Text | ChannelType::News) {
            warn!(
                "Channel #{} ({}) is not a text channel",
                channel.name, channel_id
            );
            return Err(DiscordError::ChannelNotFound { channel_id });
        }

        debug!("Resolved output channel #{} ({})", channel.name, channel_id);
        Ok(ChannelHandle {
            id: channel_id,
            name: channel.name.clone(),
        })
    }

    fn send_message(&self, channel: &ChannelHandle, text: String, cache: Arc<OutboundChannel>) {
        let Some(http) = self
            .session
            .read()
            .as_ref()
            .map(|session| Arc::clone(&session.http))
        else {
            warn!("Dropping message for #{}: Discord is not connected", channel.name);
            return;
        };

        let channel_id = channel.id;
        let channel_name = channel.name.clone();

        tokio::spawn(async move {
            let message = CreateMessage::new()
                .content(text)
                .allowed_mentions(CreateAllowedMentions::new().all_users(true));

            if let Err(e) = ChannelId::new(channel_id)
                .send_message(&*http, message)
                .await
            {
                warn!("Failed to send message to #{}: {}", channel_name, e);
                if is_unknown_channel(&e) {
                    cache.invalidate();
                }
            }
        });
    }
}

/// Whether a send failed because the channel no longer exists.
fn is_unknown_channel(error: &serenity::Error) -> bool {
    match error {
        serenity::Error::Http(e) => e
            .status_code()
            .is_some_and(|status| status.as_u16() == 404),
        _ => false,
    }
}
