//! In-memory stand-ins for Discord, the game connection and the config
//! file, shared by the bridge tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::bridge::state::OutboundChannel;
use crate::common::error::{ConfigError, DiscordError, GameError, GameResult};
use crate::common::ChannelIdentity;
use crate::config::TokenStore;
use crate::discord::{ChannelHandle, ChatSink};
use crate::game::{ConnectionParams, GameConnection, GameConnector, GameEvent};

/// Records sends instead of talking to Discord.
pub struct MockSink {
    unavailable: AtomicBool,
    resolve_calls: AtomicUsize,
    sent: Mutex<Vec<(u64, String)>>,
}

impl Default for MockSink {
    fn default() -> Self {
        Self {
            unavailable: AtomicBool::new(false),
            resolve_calls: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
        }
    }
}

impl MockSink {
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    pub fn resolve_calls(&self) -> usize {
        self.resolve_calls.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().iter().map(|(_, text)| text.clone()).collect()
    }

    pub fn sent_to(&self) -> Vec<u64> {
        self.sent.lock().iter().map(|(id, _)| *id).collect()
    }
}

impl ChatSink for MockSink {
    fn resolve_channel(&self, channel_id: u64) -> Result<ChannelHandle, DiscordError> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DiscordError::NotReady);
        }
        Ok(ChannelHandle {
            id: channel_id,
            name: "bitcraft".to_string(),
        })
    }

    fn send_message(&self, channel: &ChannelHandle, text: String, _cache: Arc<OutboundChannel>) {
        self.sent.lock().push((channel.id, text));
    }
}

/// Remembers persisted tokens.
#[derive(Default)]
pub struct MockTokens {
    saved: Mutex<Vec<String>>,
}

impl MockTokens {
    pub fn saved(&self) -> Vec<String> {
        self.saved.lock().clone()
    }
}

impl TokenStore for MockTokens {
    fn persist_token(&self, token: &str) -> Result<(), ConfigError> {
        self.saved.lock().push(token.to_string());
        Ok(())
    }
}

/// A connection whose events are pushed by the test.
#[derive(Default)]
pub struct MockConnection {
    pending: Mutex<Vec<GameEvent>>,
    subscriptions: Mutex<Vec<String>>,
    posts: Mutex<Vec<(String, ChannelIdentity, u64)>>,
    ticks: AtomicUsize,
    disconnected: AtomicBool,
}

impl MockConnection {
    /// Queue an event for the next tick.
    pub fn push(&self, event: GameEvent) {
        self.pending.lock().push(event);
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().clone()
    }

    pub fn posts(&self) -> Vec<(String, ChannelIdentity, u64)> {
        self.posts.lock().clone()
    }

    pub fn ticks(&self) -> usize {
        self.ticks.load(Ordering::SeqCst)
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }
}

impl GameConnection for MockConnection {
    fn frame_tick(&self) -> Vec<GameEvent> {
        self.ticks.fetch_add(1, Ordering::SeqCst);
        std::mem::take(&mut *self.pending.lock())
    }

    fn subscribe(&self, queries: &[&str]) -> GameResult<()> {
        self.subscriptions
            .lock()
            .extend(queries.iter().map(|q| q.to_string()));
        Ok(())
    }

    fn post_chat_message(
        &self,
        text: &str,
        channel: ChannelIdentity,
        target_id: u64,
    ) -> GameResult<()> {
        if self.is_disconnected() {
            return Err(GameError::NotConnected);
        }
        self.posts.lock().push((text.to_string(), channel, target_id));
        Ok(())
    }

    fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }
}

/// Hands out `MockConnection`s and keeps them for inspection.
#[derive(Default)]
pub struct MockConnector {
    connections: Mutex<Vec<Arc<MockConnection>>>,
}

impl MockConnector {
    pub fn connections(&self) -> Vec<Arc<MockConnection>> {
        self.connections.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.connections.lock().len()
    }
}

impl GameConnector for MockConnector {
    fn connect(&self, _params: &ConnectionParams) -> Arc<dyn GameConnection> {
        let connection = Arc::new(MockConnection::default());
        self.connections.lock().push(Arc::clone(&connection));
        connection
    }
}
