//! BitCraft game-server (SpacetimeDB) connection.
//!
//! This module contains:
//! - The connection seam used by the relay (`GameConnection`, `GameConnector`)
//! - The JSON wire protocol
//! - A websocket client implementation

pub mod client;
pub mod protocol;

use std::sync::Arc;

use crate::common::error::{GameError, GameResult};
use crate::common::{ChannelIdentity, ChatMessageRecord};

pub use client::WsConnector;

/// Table the relay subscribes to.
pub const CHAT_MESSAGE_TABLE: &str = "chat_message_state";

/// Subscription query for the chat table.
pub const CHAT_MESSAGE_QUERY: &str = "SELECT * FROM chat_message_state";

/// Where and how to connect.
#[derive(Debug, Clone)]
pub struct ConnectionParams {
    /// Host URL (`https://...` or `wss://...`).
    pub uri: String,
    /// Database/module name.
    pub module_name: String,
    /// Bearer token.
    pub token: String,
}

/// Events produced by a connection, drained by `frame_tick()`.
#[derive(Debug)]
pub enum GameEvent {
    /// Handshake finished; the server assigned an identity and token.
    Connected {
        identity: String,
        connection_id: String,
        token: String,
    },
    /// The connection was lost (or closed by the server).
    Disconnected(Option<GameError>),
    /// The connection could not be established.
    ConnectError(GameError),
    /// The initial rows of the subscription have all been delivered.
    SubscriptionApplied,
    /// The server rejected the subscription.
    SubscriptionError(String),
    RowInserted(ChatMessageRecord),
    RowUpdated {
        old: ChatMessageRecord,
        new: ChatMessageRecord,
    },
    RowDeleted(ChatMessageRecord),
    /// A reducer we called failed.
    ReducerError { reducer: String, message: String },
}

/// A live connection to the game database.
///
/// Events are queued by the connection and only handed out on
/// `frame_tick()`, so all relay handlers run on the polling loop.
pub trait GameConnection: Send + Sync {
    /// Drain every event received since the previous tick.
    fn frame_tick(&self) -> Vec<GameEvent>;

    /// Subscribe to the given SQL queries.
    fn subscribe(&self, queries: &[&str]) -> GameResult<()>;

    /// Call the chat post reducer. Failures surface as `ReducerError` events.
    fn post_chat_message(&self, text: &str, channel: ChannelIdentity, target_id: u64)
        -> GameResult<()>;

    /// Close the connection. No `Disconnected` event follows.
    fn disconnect(&self);
}

/// Builds fresh connections.
pub trait GameConnector: Send + Sync {
    fn connect(&self, params: &ConnectionParams) -> Arc<dyn GameConnection>;
}
