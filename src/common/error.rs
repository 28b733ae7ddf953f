//! Error types for the application.

use thiserror::Error;

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write config file '{path}': {source}")]
    WriteError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {message}")]
    ParseError { message: String },

    #[error("Config validation failed: {message}")]
    ValidationError { message: String },
}

/// Errors raised by the SpacetimeDB connection.
#[derive(Debug, Error)]
pub enum GameError {
    #[error("Failed to connect to {url}: {message}")]
    ConnectFailed { url: String, message: String },

    /// The server dropped the socket without completing the close handshake.
    #[error("Connection closed without completing the close handshake")]
    ClosedWithoutHandshake,

    #[error("Connection closed by remote")]
    ConnectionClosed,

    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Invalid message: {message}")]
    InvalidMessage { message: String },

    #[error("Connection is not active")]
    NotConnected,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GameError {
    /// Whether this failure usually means the access token went stale.
    pub fn suggests_stale_token(&self) -> bool {
        matches!(self, Self::ClosedWithoutHandshake)
    }
}

/// Discord-related errors.
#[derive(Debug, Error)]
pub enum DiscordError {
    #[error("Discord session is not ready")]
    NotReady,

    #[error("Channel not found: {channel_id}")]
    ChannelNotFound { channel_id: u64 },

    #[error("Serenity error: {0}")]
    Serenity(#[from] serenity::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for game connection operations.
pub type GameResult<T> = std::result::Result<T, GameError>;
