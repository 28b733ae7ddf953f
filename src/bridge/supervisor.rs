//! SpacetimeDB connection supervisor.
//!
//! Owns the current connection's polling loop. Each reconnect request
//! tears the loop down and starts over with a brand new connection.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bridge::channels::ReconnectRequest;
use crate::bridge::relay::Relay;
use crate::game::{ConnectionParams, GameConnection, GameConnector};

/// How often a connection's event queue is drained.
pub const FRAME_TICK_INTERVAL: Duration = Duration::from_millis(100);

struct PollLoop {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct Supervisor {
    relay: Arc<Relay>,
    connector: Arc<dyn GameConnector>,
    params: ConnectionParams,
    tick_interval: Duration,
    reconnect_delay: Duration,
    current: Option<PollLoop>,
}

impl Supervisor {
    pub fn new(
        relay: Arc<Relay>,
        connector: Arc<dyn GameConnector>,
        params: ConnectionParams,
    ) -> Self {
        Self {
            relay,
            connector,
            params,
            tick_interval: FRAME_TICK_INTERVAL,
            reconnect_delay: Duration::ZERO,
            current: None,
        }
    }

    /// Wait this long before acting on a reconnect request.
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Connect, then reconnect once per request until `shutdown` fires.
    pub async fn run(
        mut self,
        mut requests: mpsc::UnboundedReceiver<ReconnectRequest>,
        shutdown: CancellationToken,
    ) {
        self.reconnect().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                request = requests.recv() => {
                    if request.is_none() {
                        debug!("Reconnect channel closed");
                        break;
                    }
                    if !self.reconnect_delay.is_zero() {
                        info!("Reconnecting to SpacetimeDB in {:?}", self.reconnect_delay);
                        tokio::select! {
                            _ = shutdown.cancelled() => break,
                            _ = tokio::time::sleep(self.reconnect_delay) => {}
                        }
                    }
                    self.reconnect().await;
                }
            }
        }

        self.stop().await;
        self.relay.detach_connection();
        info!("Connection supervisor stopped");
    }

    /// Replace the current connection and its polling loop.
    pub async fn reconnect(&mut self) {
        self.stop().await;
        self.relay.state().set_caught_up(false);

        let connection = self.connector.connect(&self.params);
        self.relay.attach_connection(Arc::clone(&connection));

        let cancel = CancellationToken::new();
        let task = tokio::spawn(poll_loop(
            Arc::clone(&self.relay),
            connection,
            self.tick_interval,
            cancel.clone(),
        ));
        self.current = Some(PollLoop { cancel, task });
    }

    async fn stop(&mut self) {
        let Some(previous) = self.current.take() else {
            return;
        };
        previous.cancel.cancel();
        if let Err(e) = previous.task.await {
            warn!("Polling loop ended abnormally: {}", e);
        }
    }
}

/// Drain `connection` every `interval` until cancelled, then disconnect it.
async fn poll_loop(
    relay: Arc<Relay>,
    connection: Arc<dyn GameConnection>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                for event in connection.frame_tick() {
                    relay.handle_game_event(connection.as_ref(), event);
                }
            }
        }
    }

    connection.disconnect();
}
