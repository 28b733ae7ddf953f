//! Chatlink - BitCraft-Discord chat relay
//!
//! Subscribes to the chat table of a BitCraft SpacetimeDB module and
//! relays messages between the game and a Discord channel.

mod bridge;
mod common;
mod config;
mod discord;
mod game;

use std::sync::Arc;

use anyhow::Result;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use bridge::audit::{ChatLog, RawChangeLog};
use bridge::{
    ChannelBundle, LoginRequest, ReadinessGate, Relay, RelayLogs, RelaySettings, Supervisor,
};
use config::{env::get_config_path, load_and_validate, write_template, ConfigFile};
use discord::{DiscordBot, SerenitySink};
use game::{ConnectionParams, WsConnector, CHAT_MESSAGE_TABLE};

const CHAT_LOG_PATH: &str = "log.txt";
const RAW_LOG_PATH: &str = "raw.txt";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Chatlink v{} starting...", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config_path = get_config_path();
    info!("Loading configuration from {}...", config_path);

    let loaded = match load_and_validate(&config_path) {
        Ok(Some(loaded)) => loaded,
        Ok(None) => {
            match write_template(&config_path) {
                Ok(()) => error!(
                    "No configuration found. A template was written to {}; fill it in and restart.",
                    config_path
                ),
                Err(e) => error!("No configuration found and the template could not be written: {}", e),
            }
            std::process::exit(1);
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            error!("Please ensure {} is properly formatted.", config_path);
            std::process::exit(1);
        }
    };
    let config = loaded.effective;

    info!("Configuration loaded successfully");
    info!("  SpacetimeDB: {}", config.spacetime_db_url);
    info!("  Module: {}", config.module_name());
    info!("  Region: {}", config.bitcraft_region_number);
    info!("  Output channel: {}", config.discord_output_channel);
    info!("  Output everything: {}", config.output_everything);
    info!("  Raw log: {}", config.output_raw_log);

    // ============================================================
    // Build the relay
    // ============================================================
    let logs = RelayLogs {
        chat: ChatLog::open(CHAT_LOG_PATH)?,
        raw: if config.output_raw_log {
            Some(RawChangeLog::open(RAW_LOG_PATH, CHAT_MESSAGE_TABLE)?)
        } else {
            None
        },
    };

    let channels = ChannelBundle::new();
    let sink = Arc::new(SerenitySink::new());
    let token_store = Arc::new(ConfigFile::new(&config_path, loaded.file));

    let settings = RelaySettings::from_config(&config);
    info!("  Mentions: {}", settings.mentions.len());

    let relay = Arc::new(Relay::new(
        settings,
        sink.clone(),
        token_store,
        logs,
        channels.relay.clone(),
    ));

    let shutdown = CancellationToken::new();

    // ============================================================
    // Start the SpacetimeDB supervisor
    // ============================================================
    let params = ConnectionParams {
        uri: config.spacetime_db_url.clone(),
        module_name: config.module_name(),
        token: config.spacetime_db_access_token.clone(),
    };
    let supervisor = Supervisor::new(Arc::clone(&relay), Arc::new(WsConnector), params)
        .with_reconnect_delay(config.reconnect_delay());
    let mut supervisor_task =
        tokio::spawn(supervisor.run(channels.reconnect_rx, shutdown.clone()));

    // ============================================================
    // Start the Discord bot
    // ============================================================
    info!("Starting Discord bot...");
    let discord_bot = DiscordBot::new(
        config.discord_token.clone(),
        Arc::clone(&relay),
        sink,
        channels.login_rx,
    );
    if channels.relay.login_tx.send(LoginRequest).is_err() {
        warn!("Discord login channel closed before startup");
    }
    let mut discord_task = tokio::spawn(discord_bot.run(shutdown.clone()));

    // ============================================================
    // Wait for readiness, then run until shutdown
    // ============================================================
    let gate = ReadinessGate::new(relay.state());

    let graceful = tokio::select! {
        biased;
        _ = shutdown_signal() => {
            info!("Shutdown signal received - stopping relay...");
            true
        }
        _ = gate.run() => false,
        _ = &mut supervisor_task => false,
        _ = &mut discord_task => false,
    };

    shutdown.cancel();
    if graceful {
        let timeout = tokio::time::Duration::from_secs(5);
        match tokio::time::timeout(timeout, async {
            if let Err(e) = supervisor_task.await {
                warn!("Supervisor task panicked: {}", e);
            }
            if let Err(e) = discord_task.await {
                warn!("Discord task panicked: {}", e);
            }
        })
        .await
        {
            Ok(()) => debug!("All tasks stopped"),
            Err(_) => warn!("Shutdown timed out"),
        }
    }

    info!("Exiting...");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
