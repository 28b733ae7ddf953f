//! The relay core.
//!
//! Every event from either side ends up in one of the `on_*` handlers
//! below. Handlers are synchronous, never fail, and log whatever goes
//! wrong at the point where they see it.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::bridge::audit::{format_timestamp, ChatLog, RawChangeLog};
use crate::bridge::channels::{LoginRequest, ReconnectRequest, RelaySenders};
use crate::bridge::state::{ConnectionState, OutboundChannel};
use crate::bridge::transform::{
    channel_name, resolve_mentions, sanitize_inbound, sanitize_outbound, MentionTable,
};
use crate::common::error::GameError;
use crate::common::{ChannelIdentity, ChatMessageRecord, InboundChatMessage};
use crate::config::validate::parse_snowflake;
use crate::config::{Config, TokenStore};
use crate::discord::ChatSink;
use crate::game::{GameConnection, GameEvent, CHAT_MESSAGE_QUERY};

/// Relay behaviour derived from the configuration.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    /// Discord channel messages are sent to and read from.
    pub output_channel_id: u64,
    /// Forward every channel instead of only Region chat.
    pub output_everything: bool,
    /// Discord users whose messages are posted into the game.
    pub allowed_speakers: HashSet<u64>,
    pub mentions: MentionTable,
    /// Delay before logging into Discord again.
    pub login_retry_delay: Duration,
}

impl RelaySettings {
    pub fn from_config(config: &Config) -> Self {
        let allowed_speakers = config
            .allowed_speakers
            .iter()
            .filter_map(|speaker| parse_snowflake(speaker))
            .collect();

        Self {
            output_channel_id: parse_snowflake(&config.discord_output_channel).unwrap_or_default(),
            output_everything: config.output_everything,
            allowed_speakers,
            mentions: MentionTable::new(&config.discord_mentions),
            login_retry_delay: config.discord_retry_delay(),
        }
    }
}

/// Where the relay writes its transcripts.
pub struct RelayLogs {
    pub chat: ChatLog,
    /// Present only when raw logging is enabled.
    pub raw: Option<RawChangeLog>,
}

/// Ties the SpacetimeDB feed and Discord together.
pub struct Relay {
    settings: RelaySettings,
    state: Arc<ConnectionState>,
    outbound: Arc<OutboundChannel>,
    sink: Arc<dyn ChatSink>,
    tokens: Arc<dyn TokenStore>,
    logs: RelayLogs,
    /// The connection inbound messages are posted through.
    connection: RwLock<Option<Arc<dyn GameConnection>>>,
    /// Identity of the current connection, for log lines.
    identity: Mutex<String>,
    senders: RelaySenders,
}

impl Relay {
    pub fn new(
        settings: RelaySettings,
        sink: Arc<dyn ChatSink>,
        tokens: Arc<dyn TokenStore>,
        logs: RelayLogs,
        senders: RelaySenders,
    ) -> Self {
        let outbound = Arc::new(OutboundChannel::new(settings.output_channel_id));

        Self {
            settings,
            state: Arc::new(ConnectionState::new()),
            outbound,
            sink,
            tokens,
            logs,
            connection: RwLock::new(None),
            identity: Mutex::new(String::new()),
            senders,
        }
    }

    /// Shared connection flags.
    pub fn state(&self) -> Arc<ConnectionState> {
        Arc::clone(&self.state)
    }

    /// Make `connection` the one inbound messages are posted through.
    pub fn attach_connection(&self, connection: Arc<dyn GameConnection>) {
        *self.connection.write() = Some(connection);
    }

    pub fn detach_connection(&self) {
        *self.connection.write() = None;
    }

    /// Dispatch one event drained from `connection`.
    pub fn handle_game_event(&self, connection: &dyn GameConnection, event: GameEvent) {
        match event {
            GameEvent::Connected {
                identity,
                connection_id,
                token,
            } => self.on_remote_connected(connection, &identity, &connection_id, &token),
            GameEvent::Disconnected(error) => self.on_remote_disconnected(error),
            GameEvent::ConnectError(error) => self.on_remote_connect_error(error),
            GameEvent::SubscriptionApplied => self.on_remote_subscription_caught_up(),
            GameEvent::SubscriptionError(message) => {
                error!("Subscription to chat messages failed: {}", message);
            }
            GameEvent::RowInserted(row) => self.on_remote_row_inserted(&row),
            GameEvent::RowUpdated { old, new } => self.on_remote_row_updated(&old, &new),
            GameEvent::RowDeleted(row) => self.on_remote_row_deleted(&row),
            GameEvent::ReducerError { reducer, message } => {
                self.on_remote_reducer_error(&reducer, &message)
            }
        }
    }

    pub fn on_remote_connected(
        &self,
        connection: &dyn GameConnection,
        identity: &str,
        connection_id: &str,
        token: &str,
    ) {
        info!(
            "Connected to SpacetimeDB as {} (connection {})",
            identity, connection_id
        );
        *self.identity.lock() = identity.to_string();

        if !token.is_empty() {
            if let Err(e) = self.tokens.persist_token(token) {
                warn!("Failed to save access token: {}", e);
            }
        }

        self.state.set_remote_ready(true);

        if let Err(e) = connection.subscribe(&[CHAT_MESSAGE_QUERY]) {
            error!("Failed to subscribe to chat messages: {}", e);
        }
    }

    pub fn on_remote_subscription_caught_up(&self) {
        self.state.set_caught_up(true);
        info!("Caught up to latest messages");
    }

    pub fn on_remote_row_inserted(&self, row: &ChatMessageRecord) {
        if let Some(raw) = &self.logs.raw {
            if let Err(e) = raw.record_insert(row) {
                warn!("Failed to write raw log: {}", e);
            }
        }

        // Backfill from the initial subscription is not relayed.
        if !self.state.caught_up() {
            return;
        }

        let channel = channel_name(row.channel_id);
        let line = format!(
            "[{}] [{}] {}: {}",
            format_timestamp(row.timestamp),
            channel,
            row.username,
            row.text
        );
        if let Err(e) = self.logs.chat.append(&line) {
            warn!("Failed to write chat log: {}", e);
        }
        info!("{}", line);

        if row.channel() != ChannelIdentity::Region && !self.settings.output_everything {
            return;
        }

        let handle = match self
            .outbound
            .get_or_resolve(|channel_id| self.sink.resolve_channel(channel_id))
        {
            Ok(handle) => handle,
            Err(e) => {
                if self.outbound.mark_unavailable() {
                    warn!(
                        "Dropping messages, output channel {} is unavailable: {}",
                        self.outbound.channel_id(),
                        e
                    );
                } else {
                    debug!("Dropping message, output channel still unavailable: {}", e);
                }
                return;
            }
        };

        let text = resolve_mentions(&sanitize_outbound(&row.text), &self.settings.mentions);
        let content = format!("[{}] {}: {}", channel, row.username, text);
        self.sink
            .send_message(&handle, content, Arc::clone(&self.outbound));
    }

    pub fn on_remote_row_updated(&self, old: &ChatMessageRecord, new: &ChatMessageRecord) {
        if let Some(raw) = &self.logs.raw {
            if let Err(e) = raw.record_update(old, new) {
                warn!("Failed to write raw log: {}", e);
            }
        }
    }

    pub fn on_remote_row_deleted(&self, row: &ChatMessageRecord) {
        if let Some(raw) = &self.logs.raw {
            if let Err(e) = raw.record_delete(row) {
                warn!("Failed to write raw log: {}", e);
            }
        }
    }

    pub fn on_remote_reducer_error(&self, reducer: &str, message: &str) {
        error!(
            "REDUCER ERROR [{}] on connection {}: {}",
            reducer,
            self.identity.lock(),
            message
        );
    }

    pub fn on_remote_disconnected(&self, error: Option<GameError>) {
        self.state.set_caught_up(false);

        match error {
            Some(e) => {
                warn!("Disconnected from SpacetimeDB: {}", e);
                if e.suggests_stale_token() {
                    warn!(
                        "The server closed the connection without a close handshake. \
                         Your access token may be stale; update SpacetimeDbAccessToken \
                         if this keeps happening."
                    );
                }
            }
            None => warn!("Disconnected from SpacetimeDB"),
        }

        self.request_reconnect();
    }

    pub fn on_remote_connect_error(&self, error: GameError) {
        error!("Could not connect to SpacetimeDB: {}", error);
        self.request_reconnect();
    }

    fn request_reconnect(&self) {
        if self.senders.reconnect_tx.send(ReconnectRequest).is_err() {
            debug!("Reconnect supervisor has stopped, not reconnecting");
        }
    }

    pub fn on_chat_platform_logged_in(&self, application_id: u64) {
        self.state.set_discord_ready(true);
        info!("Logged in to Discord");
        info!(
            "Invite the bot with https://discord.com/api/oauth2/authorize?client_id={}&permissions=2048&scope=bot%20applications.commands",
            application_id
        );
    }

    /// Schedule a new login after the configured delay.
    pub fn on_chat_platform_disconnected(&self, error: Option<String>) -> JoinHandle<()> {
        match error {
            Some(e) => warn!("Logged out of Discord: {}", e),
            None => info!("Logged out of Discord"),
        }

        let delay = self.settings.login_retry_delay;
        let login_tx = self.senders.login_tx.clone();
        info!("Logging into Discord again in {:?}", delay);

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if login_tx.send(LoginRequest).is_err() {
                debug!("Discord client has stopped, not logging in again");
            }
        })
    }

    pub fn on_chat_platform_message_received(&self, message: &InboundChatMessage) {
        if message.channel_id != self.settings.output_channel_id || !message.is_from_human() {
            return;
        }
        if !self.settings.allowed_speakers.contains(&message.author_id) {
            debug!(
                "Ignoring message from {} ({}): not an allowed speaker",
                message.author_name, message.author_id
            );
            return;
        }

        let text = sanitize_inbound(&message.content);
        let Some(connection) = self.connection.read().clone() else {
            warn!(
                "Dropping message from {}: not connected to SpacetimeDB",
                message.author_name
            );
            return;
        };

        info!("Discord -> BitCraft: {}: {}", message.author_name, text);
        if let Err(e) = connection.post_chat_message(&text, ChannelIdentity::Region, 0) {
            error!("Failed to post chat message: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::{tempdir, TempDir};
    use tokio::sync::mpsc;
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::bridge::channels::ChannelBundle;
    use crate::bridge::test_support::{MockConnection, MockSink, MockTokens};
    use crate::game::CHAT_MESSAGE_TABLE;

    const OUTPUT_CHANNEL: u64 = 555;
    const SPEAKER: u64 = 42;

    struct Harness {
        relay: Relay,
        sink: Arc<MockSink>,
        tokens: Arc<MockTokens>,
        reconnect_rx: mpsc::UnboundedReceiver<ReconnectRequest>,
        login_rx: mpsc::UnboundedReceiver<LoginRequest>,
        dir: TempDir,
    }

    impl Harness {
        fn new(output_everything: bool, raw_log: bool) -> Self {
            let dir = tempdir().unwrap();
            let settings = RelaySettings {
                output_channel_id: OUTPUT_CHANNEL,
                output_everything,
                allowed_speakers: HashSet::from([SPEAKER]),
                mentions: MentionTable::default(),
                login_retry_delay: Duration::from_millis(10),
            };
            let logs = RelayLogs {
                chat: ChatLog::open(dir.path().join("log.txt")).unwrap(),
                raw: raw_log.then(|| {
                    RawChangeLog::open(dir.path().join("raw.txt"), CHAT_MESSAGE_TABLE).unwrap()
                }),
            };
            let sink = Arc::new(MockSink::default());
            let tokens = Arc::new(MockTokens::default());
            let channels = ChannelBundle::new();

            let relay = Relay::new(
                settings,
                sink.clone(),
                tokens.clone(),
                logs,
                channels.relay,
            );

            Self {
                relay,
                sink,
                tokens,
                reconnect_rx: channels.reconnect_rx,
                login_rx: channels.login_rx,
                dir,
            }
        }

        fn read(&self, name: &str) -> String {
            let path = self.dir.path().join(name);
            if path.exists() {
                fs::read_to_string(path).unwrap()
            } else {
                String::new()
            }
        }
    }

    fn row(channel_id: i32, username: &str, text: &str) -> ChatMessageRecord {
        ChatMessageRecord {
            entity_id: 1,
            channel_id,
            username: username.to_string(),
            text: text.to_string(),
            timestamp: 1_700_000_000,
        }
    }

    fn inbound(channel_id: u64, author_id: u64, content: &str) -> InboundChatMessage {
        InboundChatMessage {
            channel_id,
            author_id,
            author_name: "alice".to_string(),
            author_is_bot: false,
            author_is_system: false,
            content: content.to_string(),
        }
    }

    #[test]
    fn test_region_insert_after_catch_up_is_logged_and_sent() {
        let harness = Harness::new(false, false);
        harness.relay.on_remote_subscription_caught_up();

        harness.relay.on_remote_row_inserted(&row(3, "Bob", "hi"));

        let expected = format!("[{}] [Region] Bob: hi\n", format_timestamp(1_700_000_000));
        assert_eq!(harness.read("log.txt"), expected);
        assert_eq!(harness.sink.sent(), vec!["[Region] Bob: hi".to_string()]);
        assert_eq!(harness.sink.sent_to(), vec![OUTPUT_CHANNEL]);
    }

    #[test]
    fn test_backfill_is_only_raw_logged() {
        let harness = Harness::new(true, true);

        harness.relay.on_remote_row_inserted(&row(3, "Bob", "old news"));

        assert_eq!(harness.read("log.txt"), "");
        assert!(harness.sink.sent().is_empty());
        let raw = harness.read("raw.txt");
        assert!(raw.starts_with("[chat_message_state] +"));
        assert!(raw.contains("old news"));
    }

    #[test]
    fn test_raw_log_disabled() {
        let harness = Harness::new(false, false);
        harness.relay.on_remote_row_inserted(&row(3, "Bob", "hi"));
        assert_eq!(harness.read("raw.txt"), "");
    }

    #[test]
    fn test_non_region_forwarding_needs_output_everything() {
        let harness = Harness::new(false, false);
        harness.relay.on_remote_subscription_caught_up();
        harness.relay.on_remote_row_inserted(&row(2, "Bob", "local"));
        harness.relay.on_remote_row_inserted(&row(9, "Bob", "odd"));

        assert!(harness.sink.sent().is_empty());
        assert_eq!(harness.read("log.txt").lines().count(), 2);

        let harness = Harness::new(true, false);
        harness.relay.on_remote_subscription_caught_up();
        harness.relay.on_remote_row_inserted(&row(2, "Bob", "local"));
        harness.relay.on_remote_row_inserted(&row(9, "Bob", "odd"));

        assert_eq!(
            harness.sink.sent(),
            vec![
                "[Local] Bob: local".to_string(),
                "[Unknown (9)] Bob: odd".to_string()
            ]
        );
    }

    #[test]
    fn test_outbound_text_is_sanitized_and_mentioned() {
        let mut harness = Harness::new(false, false);
        harness.relay.settings.mentions =
            MentionTable::new(&[("ayt".to_string(), "1".to_string())].into());
        harness.relay.on_remote_subscription_caught_up();

        harness
            .relay
            .on_remote_row_inserted(&row(3, "Bob", "*hey* ayt @everyone"));

        assert_eq!(
            harness.sink.sent(),
            vec!["[Region] Bob: \\*hey\\* <@1> @\u{200B}everyone".to_string()]
        );
    }

    #[test]
    fn test_unresolvable_channel_drops_message_and_retries_later() {
        let harness = Harness::new(false, false);
        harness.sink.set_available(false);
        harness.relay.on_remote_subscription_caught_up();

        harness.relay.on_remote_row_inserted(&row(3, "Bob", "lost"));
        assert!(harness.sink.sent().is_empty());
        assert_eq!(harness.read("log.txt").lines().count(), 1);

        harness.sink.set_available(true);
        harness.relay.on_remote_row_inserted(&row(3, "Bob", "found"));
        harness.relay.on_remote_row_inserted(&row(3, "Bob", "again"));
        assert_eq!(harness.sink.sent().len(), 2);
        assert_eq!(harness.sink.resolve_calls(), 2);
    }

    #[test]
    fn test_mentions_with_underscores_in_relayed_text() {
        let mut harness = Harness::new(false, false);
        harness.relay.settings.mentions = MentionTable::new(
            &[
                ("ayt".to_string(), "1".to_string()),
                ("bob_x".to_string(), "2".to_string()),
            ]
            .into(),
        );
        harness.relay.on_remote_subscription_caught_up();

        harness.relay.on_remote_row_inserted(&row(3, "Ann", "hi ayt_x"));
        harness.relay.on_remote_row_inserted(&row(3, "Ann", "hi bob_x"));

        assert_eq!(
            harness.sink.sent(),
            vec![
                "[Region] Ann: hi ayt\\_x".to_string(),
                "[Region] Ann: hi <@2>".to_string()
            ]
        );
    }

    #[test]
    fn test_outage_is_reported_once() {
        let harness = Harness::new(false, false);
        harness.sink.set_available(false);
        harness.relay.on_remote_subscription_caught_up();

        harness.relay.on_remote_row_inserted(&row(3, "Bob", "one"));
        harness.relay.on_remote_row_inserted(&row(3, "Bob", "two"));
        assert!(!harness.relay.outbound.mark_unavailable());

        harness.sink.set_available(true);
        harness.relay.on_remote_row_inserted(&row(3, "Bob", "three"));
        assert_eq!(harness.sink.sent(), vec!["[Region] Bob: three".to_string()]);
        assert!(harness.relay.outbound.mark_unavailable());
    }

    #[test]
    fn test_updates_and_deletes_are_never_forwarded() {
        let harness = Harness::new(true, true);
        harness.relay.on_remote_subscription_caught_up();

        harness
            .relay
            .on_remote_row_updated(&row(3, "Bob", "a"), &row(3, "Bob", "b"));
        harness.relay.on_remote_row_deleted(&row(3, "Bob", "b"));

        assert!(harness.sink.sent().is_empty());
        assert_eq!(harness.read("log.txt"), "");
        let raw = harness.read("raw.txt");
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("[chat_message_state] *"));
        assert!(lines[1].starts_with("[chat_message_state] -"));
    }

    #[test]
    fn test_connected_persists_token_and_subscribes() {
        let harness = Harness::new(false, false);
        let connection = MockConnection::default();

        harness.relay.handle_game_event(
            &connection,
            GameEvent::Connected {
                identity: "c200abc".to_string(),
                connection_id: "17".to_string(),
                token: "fresh-token".to_string(),
            },
        );

        assert!(harness.relay.state().remote_ready());
        assert_eq!(harness.tokens.saved(), vec!["fresh-token".to_string()]);
        assert_eq!(connection.subscriptions(), vec![CHAT_MESSAGE_QUERY.to_string()]);
    }

    #[test]
    fn test_allowed_speaker_posts_to_region() {
        let harness = Harness::new(false, false);
        let connection = Arc::new(MockConnection::default());
        harness.relay.attach_connection(connection.clone());

        harness
            .relay
            .on_chat_platform_message_received(&inbound(OUTPUT_CHANNEL, SPEAKER, "<b>hi</b> <3"));

        assert_eq!(
            connection.posts(),
            vec![("hi <3".to_string(), ChannelIdentity::Region, 0)]
        );
    }

    #[test]
    fn test_ineligible_inbound_messages_are_ignored() {
        let harness = Harness::new(false, false);
        let connection = Arc::new(MockConnection::default());
        harness.relay.attach_connection(connection.clone());

        harness
            .relay
            .on_chat_platform_message_received(&inbound(OUTPUT_CHANNEL, 7, "not allowed"));
        harness
            .relay
            .on_chat_platform_message_received(&inbound(999, SPEAKER, "wrong channel"));

        let mut bot = inbound(OUTPUT_CHANNEL, SPEAKER, "beep");
        bot.author_is_bot = true;
        harness.relay.on_chat_platform_message_received(&bot);

        let mut system = inbound(OUTPUT_CHANNEL, SPEAKER, "system");
        system.author_is_system = true;
        harness.relay.on_chat_platform_message_received(&system);

        assert!(connection.posts().is_empty());
    }

    #[test]
    fn test_disconnect_clears_caught_up_and_requests_reconnect() {
        let mut harness = Harness::new(false, false);
        harness.relay.on_remote_subscription_caught_up();

        harness
            .relay
            .on_remote_disconnected(Some(GameError::ClosedWithoutHandshake));

        assert!(!harness.relay.state().caught_up());
        assert_ok!(harness.reconnect_rx.try_recv());
        assert_err!(harness.reconnect_rx.try_recv());
    }

    #[test]
    fn test_connect_error_requests_reconnect() {
        let mut harness = Harness::new(false, false);
        let connection = MockConnection::default();

        harness.relay.handle_game_event(
            &connection,
            GameEvent::ConnectError(GameError::ConnectFailed {
                url: "wss://host".to_string(),
                message: "refused".to_string(),
            }),
        );

        assert_ok!(harness.reconnect_rx.try_recv());
    }

    #[tokio::test]
    async fn test_discord_disconnect_schedules_login() {
        let mut harness = Harness::new(false, false);
        harness.relay.on_chat_platform_logged_in(1234);
        assert!(harness.relay.state().discord_ready());

        let retry = harness
            .relay
            .on_chat_platform_disconnected(Some("gateway closed".to_string()));
        assert_err!(harness.login_rx.try_recv());

        retry.await.unwrap();
        assert_eq!(harness.login_rx.try_recv().unwrap(), LoginRequest);
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = Config::template();
        config.discord_output_channel = "987654321".to_string();
        config.allowed_speakers = vec!["".to_string(), "42".to_string(), "bogus".to_string()];
        config.output_everything = true;

        let settings = RelaySettings::from_config(&config);

        assert_eq!(settings.output_channel_id, 987654321);
        assert_eq!(settings.allowed_speakers, HashSet::from([42]));
        assert!(settings.output_everything);
        assert_eq!(settings.mentions.len(), 2);
        assert_eq!(settings.login_retry_delay, Duration::from_secs(5));
    }
}
