//! Relay between BitCraft chat and Discord.
//!
//! ## Module Structure
//!
//! - `relay`: event handlers for both sides (`Relay`)
//! - `state`: connection flags and the cached output channel
//! - `transform`: text sanitizing and mention substitution
//! - `audit`: `log.txt` and `raw.txt` writers
//! - `supervisor`: SpacetimeDB reconnects and the polling loop
//! - `gate`: startup readiness gate
//! - `channels`: request channels from the relay to the other tasks

pub mod audit;
pub mod channels;
pub mod gate;
pub mod relay;
pub mod state;
pub mod supervisor;
pub mod transform;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export main types for convenience
pub use channels::{ChannelBundle, LoginRequest};
pub use gate::ReadinessGate;
pub use relay::{Relay, RelayLogs, RelaySettings};
pub use supervisor::Supervisor;
