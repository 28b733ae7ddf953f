//! Relay state management.
//!
//! - `ConnectionState`: readiness flags for both endpoints plus the
//!   caught-up flag of the chat subscription
//! - `OutboundChannel`: the lazily resolved Discord output channel

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::info;

use crate::common::error::DiscordError;
use crate::discord::ChannelHandle;

/// Connection flags shared between the relay and the readiness gate.
#[derive(Debug, Default)]
pub struct ConnectionState {
    discord_ready: AtomicBool,
    remote_ready: AtomicBool,
    caught_up: AtomicBool,
}

impl ConnectionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn discord_ready(&self) -> bool {
        self.discord_ready.load(Ordering::Acquire)
    }

    pub fn set_discord_ready(&self, ready: bool) {
        self.discord_ready.store(ready, Ordering::Release);
    }

    pub fn remote_ready(&self) -> bool {
        self.remote_ready.load(Ordering::Acquire)
    }

    pub fn set_remote_ready(&self, ready: bool) {
        self.remote_ready.store(ready, Ordering::Release);
    }

    /// Whether the initial backfill of the subscription has been applied.
    pub fn caught_up(&self) -> bool {
        self.caught_up.load(Ordering::Acquire)
    }

    pub fn set_caught_up(&self, caught_up: bool) {
        self.caught_up.store(caught_up, Ordering::Release);
    }

    /// Human readable list of endpoints still logging in.
    pub fn pending_endpoints(&self) -> Option<&'static str> {
        match (self.discord_ready(), self.remote_ready()) {
            (false, false) => Some("Discord and SpacetimeDB"),
            (false, true) => Some("Discord"),
            (true, false) => Some("SpacetimeDB"),
            (true, true) => None,
        }
    }
}

/// The single configured output channel, resolved on first use.
#[derive(Debug)]
pub struct OutboundChannel {
    channel_id: u64,
    cached: Mutex<Option<ChannelHandle>>,
    /// Set between a failed resolution and the next successful one.
    unavailable: AtomicBool,
}

impl OutboundChannel {
    pub fn new(channel_id: u64) -> Self {
        Self {
            channel_id,
            cached: Mutex::new(None),
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn channel_id(&self) -> u64 {
        self.channel_id
    }

    /// Return the cached handle, resolving it first if needed.
    ///
    /// Failures are not cached, so the next call tries again.
    pub fn get_or_resolve(
        &self,
        resolve: impl FnOnce(u64) -> Result<ChannelHandle, DiscordError>,
    ) -> Result<ChannelHandle, DiscordError> {
        let mut cached = self.cached.lock();
        if let Some(handle) = cached.as_ref() {
            return Ok(handle.clone());
        }

        let handle = resolve(self.channel_id)?;
        *cached = Some(handle.clone());
        if self.unavailable.swap(false, Ordering::AcqRel) {
            info!("Output channel #{} is available again", handle.name);
        }
        Ok(handle)
    }

    /// Record a failed resolution. True only for the first failure of an
    /// outage.
    pub fn mark_unavailable(&self) -> bool {
        !self.unavailable.swap(true, Ordering::AcqRel)
    }

    /// Forget the cached handle.
    pub fn invalidate(&self) {
        *self.cached.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    fn handle(id: u64) -> ChannelHandle {
        ChannelHandle {
            id,
            name: "bitcraft-chat".to_string(),
        }
    }

    #[test]
    fn test_pending_endpoints() {
        let state = ConnectionState::new();
        assert_eq!(state.pending_endpoints(), Some("Discord and SpacetimeDB"));

        state.set_remote_ready(true);
        assert_eq!(state.pending_endpoints(), Some("Discord"));

        state.set_discord_ready(true);
        assert_eq!(state.pending_endpoints(), None);
    }

    #[test]
    fn test_channel_resolved_once() {
        let outbound = OutboundChannel::new(55);
        let calls = Cell::new(0);
        let resolve = |id| {
            calls.set(calls.get() + 1);
            Ok(handle(id))
        };

        assert_eq!(outbound.get_or_resolve(resolve).unwrap().id, 55);
        assert_eq!(outbound.get_or_resolve(resolve).unwrap().id, 55);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_failure_is_not_cached() {
        let outbound = OutboundChannel::new(55);

        let result =
            outbound.get_or_resolve(|id| Err(DiscordError::ChannelNotFound { channel_id: id }));
        assert!(result.is_err());

        let calls = Cell::new(0);
        let resolve = |id| {
            calls.set(calls.get() + 1);
            Ok(handle(id))
        };
        assert!(outbound.get_or_resolve(resolve).is_ok());
        assert!(outbound.get_or_resolve(resolve).is_ok());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_outage_reported_once_until_recovery() {
        let outbound = OutboundChannel::new(55);

        assert!(outbound.mark_unavailable());
        assert!(!outbound.mark_unavailable());
        assert!(!outbound.mark_unavailable());

        outbound.get_or_resolve(|id| Ok(handle(id))).unwrap();
        assert!(outbound.mark_unavailable());
    }

    #[test]
    fn test_invalidate_forces_resolution() {
        let outbound = OutboundChannel::new(55);
        outbound.get_or_resolve(|id| Ok(handle(id))).unwrap();

        outbound.invalidate();
        let resolved = outbound.get_or_resolve(|id| {
            Ok(ChannelHandle {
                id,
                name: "renamed".to_string(),
            })
        });
        assert_eq!(resolved.unwrap().name, "renamed");
    }
}
