//! SpacetimeDB JSON websocket protocol (`v1.json.spacetimedb`).
//!
//! Only the messages the relay needs are modelled. Server messages are
//! externally tagged objects (`{"IdentityToken": {...}}`); anything else
//! is ignored.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::common::error::GameError;
use crate::common::ChatMessageRecord;
use crate::game::GameEvent;

/// Websocket subprotocol for the JSON encoding.
pub const JSON_SUBPROTOCOL: &str = "v1.json.spacetimedb";

/// Reducer that posts a chat message.
pub const CHAT_POST_REDUCER: &str = "chat_post_message";

/// Column order used when rows arrive as positional arrays.
pub const CHAT_MESSAGE_COLUMNS: [&str; 5] =
    ["entity_id", "username", "channel_id", "text", "timestamp"];

/// Messages sent to the server.
#[derive(Debug, Clone, Serialize)]
pub enum ClientMessage {
    Subscribe {
        query_strings: Vec<String>,
        request_id: u32,
    },
    CallReducer {
        reducer: String,
        /// JSON-encoded argument list.
        args: String,
        request_id: u32,
        flags: u8,
    },
}

impl ClientMessage {
    /// Build a `chat_post_message(text, channel_id, target_id)` call.
    pub fn post_chat_message(
        text: &str,
        channel_id: i32,
        target_id: u64,
        request_id: u32,
    ) -> Result<Self, GameError> {
        let args = serde_json::to_string(&serde_json::json!([text, channel_id, target_id]))?;
        Ok(Self::CallReducer {
            reducer: CHAT_POST_REDUCER.to_string(),
            args,
            request_id,
            flags: 0,
        })
    }
}

/// Messages received from the server.
#[derive(Debug, Clone)]
pub enum ServerMessage {
    IdentityToken(IdentityToken),
    InitialSubscription(InitialSubscription),
    TransactionUpdate(TransactionUpdate),
    SubscriptionError(SubscriptionError),
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdentityToken {
    pub identity: Value,
    pub token: String,
    #[serde(default)]
    pub connection_id: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InitialSubscription {
    pub database_update: DatabaseUpdate,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransactionUpdate {
    /// `{"Committed": DatabaseUpdate}`, `{"Failed": "reason"}` or `"OutOfEnergy"`.
    pub status: Value,
    #[serde(default)]
    pub reducer_call: Option<ReducerCallInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReducerCallInfo {
    #[serde(default)]
    pub reducer_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionError {
    #[serde(default)]
    pub error: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseUpdate {
    #[serde(default)]
    pub tables: Vec<TableUpdate>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TableUpdate {
    pub table_name: String,
    /// Query updates, each `{"deletes": [...], "inserts": [...]}`,
    /// possibly wrapped as `{"Uncompressed": {...}}`.
    #[serde(default)]
    pub updates: Vec<Value>,
}

/// Decode one text frame. Unknown message kinds yield `Ok(None)`.
pub fn decode_server_message(text: &str) -> Result<Option<ServerMessage>, GameError> {
    let value: Value = serde_json::from_str(text)?;
    let Value::Object(map) = value else {
        return Err(GameError::InvalidMessage {
            message: "expected a JSON object".to_string(),
        });
    };
    let Some((kind, body)) = map.into_iter().next() else {
        return Err(GameError::InvalidMessage {
            message: "empty message".to_string(),
        });
    };

    let message = match kind.as_str() {
        "IdentityToken" => ServerMessage::IdentityToken(serde_json::from_value(body)?),
        "InitialSubscription" => ServerMessage::InitialSubscription(serde_json::from_value(body)?),
        "TransactionUpdate" => ServerMessage::TransactionUpdate(serde_json::from_value(body)?),
        "SubscriptionError" => ServerMessage::SubscriptionError(serde_json::from_value(body)?),
        _ => return Ok(None),
    };
    Ok(Some(message))
}

/// Translate a server message into relay events for `table`.
pub fn events_for(message: ServerMessage, table: &str) -> Vec<GameEvent> {
    match message {
        ServerMessage::IdentityToken(identity) => vec![GameEvent::Connected {
            identity: display_id(&identity.identity, "__identity__"),
            connection_id: display_id(&identity.connection_id, "__connection_id__"),
            token: identity.token,
        }],
        ServerMessage::InitialSubscription(initial) => {
            let mut events = table_events(&initial.database_update, table);
            events.push(GameEvent::SubscriptionApplied);
            events
        }
        ServerMessage::TransactionUpdate(update) => {
            let reducer = update
                .reducer_call
                .map(|call| call.reducer_name)
                .unwrap_or_default();
            match &update.status {
                Value::Object(status) => {
                    if let Some(committed) = status.get("Committed") {
                        match serde_json::from_value::<DatabaseUpdate>(committed.clone()) {
                            Ok(db_update) => table_events(&db_update, table),
                            Err(e) => {
                                warn!("Skipping malformed transaction update: {}", e);
                                Vec::new()
                            }
                        }
                    } else if let Some(failed) = status.get("Failed") {
                        vec![GameEvent::ReducerError {
                            reducer,
                            message: failed
                                .as_str()
                                .map(str::to_string)
                                .unwrap_or_else(|| failed.to_string()),
                        }]
                    } else {
                        Vec::new()
                    }
                }
                Value::String(status) if status == "OutOfEnergy" => vec![GameEvent::ReducerError {
                    reducer,
                    message: "out of energy".to_string(),
                }],
                _ => Vec::new(),
            }
        }
        ServerMessage::SubscriptionError(error) => vec![GameEvent::SubscriptionError(error.error)],
    }
}

/// Row events for one table in a database update.
///
/// A delete and an insert of the same entity within one update are
/// reported as a single `RowUpdated`.
pub fn table_events(update: &DatabaseUpdate, table: &str) -> Vec<GameEvent> {
    let mut deletes = Vec::new();
    let mut inserts = Vec::new();

    for table_update in update.tables.iter().filter(|t| t.table_name == table) {
        for query_update in &table_update.updates {
            let query_update = query_update.get("Uncompressed").unwrap_or(query_update);
            deletes.extend(decode_rows(query_update.get("deletes")));
            inserts.extend(decode_rows(query_update.get("inserts")));
        }
    }

    let mut inserted_events = Vec::with_capacity(inserts.len());
    for row in inserts {
        let replaced = (row.entity_id != 0)
            .then(|| deletes.iter().position(|old: &ChatMessageRecord| old.entity_id == row.entity_id))
            .flatten();
        match replaced {
            Some(index) => inserted_events.push(GameEvent::RowUpdated {
                old: deletes.remove(index),
                new: row,
            }),
            None => inserted_events.push(GameEvent::RowInserted(row)),
        }
    }

    let mut events: Vec<GameEvent> = deletes.into_iter().map(GameEvent::RowDeleted).collect();
    events.extend(inserted_events);
    events
}

fn decode_rows(rows: Option<&Value>) -> Vec<ChatMessageRecord> {
    let Some(Value::Array(rows)) = rows else {
        return Vec::new();
    };

    rows.iter()
        .filter_map(|row| match decode_row(row) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Skipping undecodable chat row {}: {}", row, e);
                None
            }
        })
        .collect()
}

/// Decode a chat row sent as an object, a positional array, or a JSON string of either.
pub fn decode_row(row: &Value) -> Result<ChatMessageRecord, GameError> {
    match row {
        Value::String(encoded) => {
            let inner: Value = serde_json::from_str(encoded)?;
            if inner.is_string() {
                return Err(GameError::InvalidMessage {
                    message: "row is a doubly encoded string".to_string(),
                });
            }
            decode_row(&inner)
        }
        Value::Object(_) => Ok(serde_json::from_value(row.clone())?),
        Value::Array(columns) => {
            if columns.len() < CHAT_MESSAGE_COLUMNS.len() {
                return Err(GameError::InvalidMessage {
                    message: format!(
                        "expected {} columns, got {}",
                        CHAT_MESSAGE_COLUMNS.len(),
                        columns.len()
                    ),
                });
            }
            let named: serde_json::Map<String, Value> = CHAT_MESSAGE_COLUMNS
                .iter()
                .zip(columns)
                .map(|(name, value)| (name.to_string(), value.clone()))
                .collect();
            Ok(serde_json::from_value(Value::Object(named))?)
        }
        other => Err(GameError::InvalidMessage {
            message: format!("unexpected row shape: {}", other),
        }),
    }
}

/// Render an identity-like value (`{"__identity__": "0x.."}`) for logs.
fn display_id(value: &Value, key: &str) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(map) => match map.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => value.to_string(),
        },
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
