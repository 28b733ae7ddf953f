//! Discord bot client.
//!
//! Wraps the serenity client and its login lifecycle. The bot logs in on
//! each `LoginRequest`; when the gateway session ends the relay is told
//! and decides when to ask for the next login.

use std::sync::Arc;
use std::time::Duration;

use backon::BackoffBuilder;
use serenity::async_trait;
use serenity::http::HttpBuilder;
use serenity::model::channel::Message;
use serenity::model::gateway::Ready;
use serenity::prelude::*;
use serenity::Client;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bridge::channels::LoginRequest;
use crate::bridge::relay::Relay;
use crate::common::error::DiscordError;
use crate::common::InboundChatMessage;
use crate::discord::sink::SerenitySink;

/// Forwards gateway events to the relay.
struct RelayEvents {
    relay: Arc<Relay>,
    sink: Arc<SerenitySink>,
}

#[async_trait]
impl EventHandler for RelayEvents {
    async fn ready(&self, context: Context, ready: Ready) {
        info!("Discord bot connected as {}", ready.user.name);
        self.sink
            .set_session(Arc::clone(&context.cache), Arc::clone(&context.http));
        self.relay
            .on_chat_platform_logged_in(ready.application.id.get());
    }

    async fn message(&self, context: Context, message: Message) {
        let inbound = InboundChatMessage {
            channel_id: message.channel_id.get(),
            author_id: message.author.id.get(),
            author_name: message.author.name.clone(),
            author_is_bot: message.author.bot,
            author_is_system: message.author.system,
            content: message.content_safe(&context.cache),
        };
        self.relay.on_chat_platform_message_received(&inbound);
    }
}

/// Backoff for rebuilding the client: 5s initial, 5min max, factor 1.1,
/// with jitter, unlimited retries.
fn discord_backoff() -> impl Iterator<Item = Duration> {
    backon::ExponentialBuilder::default()
        .with_min_delay(Duration::from_secs(5))
        .with_max_delay(Duration::from_secs(5 * 60))
        .with_factor(1.1)
        .with_jitter()
        .without_max_times()
        .build()
}

async fn build_client(
    token: &str,
    relay: Arc<Relay>,
    sink: Arc<SerenitySink>,
) -> Result<Client, DiscordError> {
    let intents =
        GatewayIntents::GUILD_MESSAGES | GatewayIntents::MESSAGE_CONTENT | GatewayIntents::GUILDS;

    // Build a custom reqwest client with timeout settings
    let reqwest_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(15))
        .connect_timeout(Duration::from_secs(10))
        .build()?;

    let http = HttpBuilder::new(token).client(reqwest_client).build();

    let client = serenity::client::ClientBuilder::new_with_http(http, intents)
        .event_handler(RelayEvents { relay, sink })
        .await?;
    Ok(client)
}

pub struct DiscordBot {
    token: String,
    relay: Arc<Relay>,
    sink: Arc<SerenitySink>,
    login_rx: mpsc::UnboundedReceiver<LoginRequest>,
}

impl DiscordBot {
    pub fn new(
        token: String,
        relay: Arc<Relay>,
        sink: Arc<SerenitySink>,
        login_rx: mpsc::UnboundedReceiver<LoginRequest>,
    ) -> Self {
        Self {
            token,
            relay,
            sink,
            login_rx,
        }
    }

    /// Log in on every request until `shutdown` fires.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut backoff = discord_backoff();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                request = self.login_rx.recv() => {
                    if request.is_none() {
                        debug!("Login channel closed");
                        break;
                    }
                }
            }

            info!("Logging into Discord...");
            let mut client = loop {
                match build_client(&self.token, Arc::clone(&self.relay), Arc::clone(&self.sink))
                    .await
                {
                    Ok(client) => {
                        backoff = discord_backoff();
                        break client;
                    }
                    Err(e) => {
                        error!("Failed to build Discord client: {}", e);
                        let delay = backoff.next().unwrap_or(Duration::from_secs(5 * 60));
                        warn!("Retrying in {:.1}s...", delay.as_secs_f64());
                        tokio::select! {
                            _ = shutdown.cancelled() => return,
                            _ = sleep(delay) => {}
                        }
                    }
                }
            };

            let shard_manager = client.shard_manager.clone();
            let result = tokio::select! {
                result = client.start() => result,
                _ = shutdown.cancelled() => {
                    info!("Initiating graceful Discord shutdown...");
                    shard_manager.shutdown_all().await;
                    self.sink.clear_session();
                    info!("Discord shutdown complete");
                    break;
                }
            };

            self.sink.clear_session();
            if let Err(e) = &result {
                error!("Discord client error: {}", e);
            }
            // The retry task runs on its own and sends the next LoginRequest.
            drop(
                self.relay
                    .on_chat_platform_disconnected(result.err().map(|e| e.to_string())),
            );
        }

        info!("Discord task ended");
    }
}
