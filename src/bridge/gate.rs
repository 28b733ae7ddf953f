//! Startup readiness gate.

use std::future;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::bridge::state::ConnectionState;

/// Blocks until both Discord and SpacetimeDB have logged in.
pub struct ReadinessGate {
    state: Arc<ConnectionState>,
    poll_interval: Duration,
    /// Log the pending endpoints every this many polls.
    status_every: u32,
}

impl ReadinessGate {
    pub fn new(state: Arc<ConnectionState>) -> Self {
        Self {
            state,
            poll_interval: Duration::from_secs(1),
            status_every: 30,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Status line for poll number `polls`, if one is due.
    fn status_line(&self, polls: u32) -> Option<String> {
        let pending = self.state.pending_endpoints()?;
        (polls % self.status_every.max(1) == 0)
            .then(|| format!("Waiting for {} to log in...", pending))
    }

    /// Resolve once both endpoints are ready. Returns the number of polls.
    pub async fn wait(&self) -> u32 {
        let mut polls = 0;

        while self.state.pending_endpoints().is_some() {
            if let Some(line) = self.status_line(polls) {
                info!("{}", line);
            }
            polls += 1;
            tokio::time::sleep(self.poll_interval).await;
        }

        info!("Discord and SpacetimeDB are ready, relaying messages");
        polls
    }

    /// Wait for readiness, then park forever.
    pub async fn run(self) {
        self.wait().await;
        future::pending::<()>().await;
    }
}
