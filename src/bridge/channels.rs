//! Relay channel management.
//!
//! The relay never calls the supervisor or the Discord client directly;
//! it sends requests over these channels instead.

use tokio::sync::mpsc;

/// Ask the supervisor to rebuild the SpacetimeDB connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectRequest;

/// Ask the Discord client to (re)start its login sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginRequest;

/// Sending halves held by the relay.
#[derive(Debug, Clone)]
pub struct RelaySenders {
    pub reconnect_tx: mpsc::UnboundedSender<ReconnectRequest>,
    pub login_tx: mpsc::UnboundedSender<LoginRequest>,
}

/// Bundle of all channels wired up in `main`.
pub struct ChannelBundle {
    /// Handed to the relay.
    pub relay: RelaySenders,
    /// Receiver for reconnect requests (supervisor listens).
    pub reconnect_rx: mpsc::UnboundedReceiver<ReconnectRequest>,
    /// Receiver for login requests (Discord client listens).
    pub login_rx: mpsc::UnboundedReceiver<LoginRequest>,
}

impl ChannelBundle {
    pub fn new() -> Self {
        let (reconnect_tx, reconnect_rx) = mpsc::unbounded_channel();
        let (login_tx, login_rx) = mpsc::unbounded_channel();

        Self {
            relay: RelaySenders {
                reconnect_tx,
                login_tx,
            },
            reconnect_rx,
            login_rx,
        }
    }
}

impl Default for ChannelBundle {
    fn default() -> Self {
        Self::new()
    }
}
