//! Websocket client for the SpacetimeDB JSON protocol.
//!
//! Each connection runs one socket task. Decoded events are queued and
//! handed to the relay on `frame_tick()`; outgoing messages are queued the
//! other way and written by the same task.

use std::io::ErrorKind;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{header, HeaderValue};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::common::error::{GameError, GameResult};
use crate::common::ChannelIdentity;
use crate::game::protocol::{decode_server_message, events_for, ClientMessage, JSON_SUBPROTOCOL};
use crate::game::{ConnectionParams, GameConnection, GameConnector, GameEvent, CHAT_MESSAGE_TABLE};

/// Builds websocket connections.
#[derive(Debug, Default)]
pub struct WsConnector;

impl GameConnector for WsConnector {
    fn connect(&self, params: &ConnectionParams) -> Arc<dyn GameConnection> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        tokio::spawn(run_socket(
            params.clone(),
            events_tx,
            outgoing_rx,
            cancel.clone(),
        ));

        Arc::new(WsConnection {
            events: Mutex::new(events_rx),
            outgoing: outgoing_tx,
            cancel,
            next_request_id: AtomicU32::new(1),
        })
    }
}

/// A websocket connection to one database.
pub struct WsConnection {
    events: Mutex<mpsc::UnboundedReceiver<GameEvent>>,
    outgoing: mpsc::UnboundedSender<ClientMessage>,
    cancel: CancellationToken,
    next_request_id: AtomicU32,
}

impl WsConnection {
    fn request_id(&self) -> u32 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    fn send(&self, message: ClientMessage) -> GameResult<()> {
        if self.cancel.is_cancelled() {
            return Err(GameError::NotConnected);
        }
        self.outgoing.send(message).map_err(|_| GameError::NotConnected)
    }
}

impl GameConnection for WsConnection {
    fn frame_tick(&self) -> Vec<GameEvent> {
        let mut events_rx = self.events.lock();
        let mut events = Vec::new();
        while let Ok(event) = events_rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn subscribe(&self, queries: &[&str]) -> GameResult<()> {
        let request_id = self.request_id();
        self.send(ClientMessage::Subscribe {
            query_strings: queries.iter().map(|q| q.to_string()).collect(),
            request_id,
        })
    }

    fn post_chat_message(
        &self,
        text: &str,
        channel: ChannelIdentity,
        target_id: u64,
    ) -> GameResult<()> {
        let message =
            ClientMessage::post_chat_message(text, channel.to_id(), target_id, self.request_id())?;
        self.send(message)
    }

    fn disconnect(&self) {
        self.cancel.cancel();
    }
}

impl Drop for WsConnection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// `https://host` -> `wss://host/v1/database/{module}/subscribe`.
pub fn subscribe_url(uri: &str, module_name: &str) -> String {
    let base = uri.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        base.to_string()
    };
    format!("{}/v1/database/{}/subscribe", base, module_name)
}

fn build_request(url: &str, token: &str) -> GameResult<Request> {
    let connect_failed = |message: String| GameError::ConnectFailed {
        url: url.to_string(),
        message,
    };

    let mut request = url
        .into_client_request()
        .map_err(|e| connect_failed(e.to_string()))?;
    let headers = request.headers_mut();
    headers.insert(
        header::SEC_WEBSOCKET_PROTOCOL,
        HeaderValue::from_static(JSON_SUBPROTOCOL),
    );
    if !token.is_empty() {
        let bearer = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| connect_failed(format!("invalid token: {}", e)))?;
        headers.insert(header::AUTHORIZATION, bearer);
    }
    Ok(request)
}

/// Map a websocket error onto the relay's error taxonomy.
fn classify(error: WsError) -> GameError {
    match error {
        WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
            GameError::ClosedWithoutHandshake
        }
        WsError::Io(ref io)
            if matches!(io.kind(), ErrorKind::ConnectionReset | ErrorKind::UnexpectedEof) =>
        {
            GameError::ClosedWithoutHandshake
        }
        WsError::ConnectionClosed | WsError::AlreadyClosed => GameError::ConnectionClosed,
        other => GameError::Transport {
            message: other.to_string(),
        },
    }
}

fn emit(events_tx: &mpsc::UnboundedSender<GameEvent>, event: GameEvent) {
    if let Err(e) = events_tx.send(event) {
        debug!("Game event queue closed, dropping {:?}", e.0);
    }
}

async fn run_socket(
    params: ConnectionParams,
    events_tx: mpsc::UnboundedSender<GameEvent>,
    mut outgoing_rx: mpsc::UnboundedReceiver<ClientMessage>,
    cancel: CancellationToken,
) {
    let url = subscribe_url(&params.uri, &params.module_name);
    let request = match build_request(&url, &params.token) {
        Ok(request) => request,
        Err(e) => {
            emit(&events_tx, GameEvent::ConnectError(e));
            return;
        }
    };

    info!("Connecting to SpacetimeDB at {}...", url);
    let connected = tokio::select! {
        _ = cancel.cancelled() => return,
        result = connect_async(request) => result,
    };
    let (socket, _response) = match connected {
        Ok(connected) => connected,
        Err(e) => {
            emit(
                &events_tx,
                GameEvent::ConnectError(GameError::ConnectFailed {
                    url,
                    message: e.to_string(),
                }),
            );
            return;
        }
    };

    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                if let Err(e) = sink.send(Message::Close(None)).await {
                    debug!("Close frame not delivered: {}", e);
                }
                break;
            }

            Some(message) = outgoing_rx.recv() => {
                let json = match serde_json::to_string(&message) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!("Failed to encode {:?}: {}", message, e);
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::text(json)).await {
                    emit(&events_tx, GameEvent::Disconnected(Some(classify(e))));
                    break;
                }
            }

            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => match decode_server_message(text.as_str()) {
                    Ok(Some(message)) => {
                        for event in events_for(message, CHAT_MESSAGE_TABLE) {
                            emit(&events_tx, event);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!("Ignoring undecodable server message: {}", e),
                },
                Some(Ok(Message::Binary(data))) => {
                    debug!("Ignoring {} byte binary frame", data.len());
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!("Server closed the connection: {:?}", frame);
                    emit(&events_tx, GameEvent::Disconnected(None));
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    emit(&events_tx, GameEvent::Disconnected(Some(classify(e))));
                    break;
                }
                None => {
                    emit(
                        &events_tx,
                        GameEvent::Disconnected(Some(GameError::ConnectionClosed)),
                    );
                    break;
                }
            }
        }
    }

    debug!("Socket task for {} ended", url);
}
