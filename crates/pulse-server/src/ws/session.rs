//! Per-client session lifecycle.
//!
//! A session runs from a successful upgrade to transport close: admit into
//! the registry, acknowledge, pump outbound traffic, dispatch inbound
//! control messages, and tear down exactly once.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use pulse_core::{ConnectionId, ServerMessage, SubjectId};

use crate::config::ServerConfig;
use crate::metrics::{
    WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_CONNECTION_DURATION_SECONDS,
    WS_DISCONNECTIONS_TOTAL,
};

use super::connection::{ClientConnection, SendOutcome};
use super::dispatcher::BroadcastDispatcher;
use super::handler::{MessageContext, handle_message};
use super::publisher::MetricsPublisher;
use super::registry::ConnectionRegistry;

/// Run a WebSocket session for a verified client.
///
/// 1. Admits the connection (empty subscription set) and sends the
///    `connected` acknowledgment
/// 2. Spawns the outbound pump: forwards the send queue, emits transport
///    Ping frames, disconnects unresponsive clients, closes on shutdown
/// 3. Dispatches inbound frames through the message handler
/// 4. Tears down once: publisher cancelled, topics purged, registry entry
///    removed
#[instrument(skip_all, fields(subject = %subject))]
pub async fn run_ws_session(
    socket: WebSocket,
    subject: SubjectId,
    registry: Arc<ConnectionRegistry>,
    dispatcher: Arc<BroadcastDispatcher>,
    publisher: Arc<MetricsPublisher>,
    config: Arc<ServerConfig>,
    shutdown: CancellationToken,
) {
    let connection_id = ConnectionId::for_subject(&subject);
    let (mut ws_tx, mut ws_rx) = socket.split();

    let (send_tx, mut send_rx) = mpsc::channel::<Arc<String>>(config.send_queue_capacity);
    let connection = Arc::new(ClientConnection::new(
        connection_id.clone(),
        subject.clone(),
        send_tx,
    ));

    if let Err(e) = registry.admit(connection.clone()).await {
        warn!(error = %e, "connection admission failed");
        let _ = ws_tx.send(Message::Close(None)).await;
        return;
    }

    let connection_start = Instant::now();
    info!(client_id = %connection_id, total = registry.count(), "client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    // Acknowledge before the pump takes ownership of the sink.
    if let Ok(json) = ServerMessage::connected(connection_id.clone()).to_json() {
        let _ = ws_tx.send(Message::Text(json.into())).await;
    }

    let ping_interval = Duration::from_secs(config.heartbeat_interval_secs);
    let pong_timeout = Duration::from_secs(config.heartbeat_timeout_secs);
    let pump_conn = connection.clone();
    let pump_shutdown = shutdown.clone();
    let outbound = tokio::spawn(async move {
        let mut ping_ticker = tokio::time::interval(ping_interval);
        // Skip the immediate first tick
        let _ = ping_ticker.tick().await;

        loop {
            tokio::select! {
                msg = send_rx.recv() => {
                    match msg {
                        Some(text) => {
                            if ws_tx.send(Message::Text(text.as_str().to_owned().into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping_ticker.tick() => {
                    if !pump_conn.check_alive()
                        && pump_conn.last_pong_elapsed() > pong_timeout
                    {
                        warn!(client_id = %pump_conn.id, "client unresponsive for {pong_timeout:?}, disconnecting");
                        break;
                    }
                    if ws_tx.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
                () = pump_shutdown.cancelled() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    let ctx = MessageContext {
        connection_id: connection_id.clone(),
        subject,
        registry: registry.clone(),
        dispatcher,
        publisher,
    };

    loop {
        let frame = tokio::select! {
            frame = ws_rx.next() => frame,
            () = shutdown.cancelled() => break,
        };
        let Some(Ok(msg)) = frame else { break };

        // Extract text from either Text or Binary frames
        let text = match msg {
            Message::Text(ref t) => Some(t.to_string()),
            Message::Binary(ref data) => {
                if let Ok(s) = std::str::from_utf8(data) {
                    Some(s.to_owned())
                } else {
                    info!(client_id = %connection_id, len = data.len(), "non-UTF8 binary frame ignored");
                    None
                }
            }
            Message::Close(_) => {
                info!(client_id = %connection_id, "client sent close frame");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {
                connection.mark_alive();
                None
            }
        };
        let Some(text) = text else { continue };

        connection.mark_alive();
        if let Some(reply) = handle_message(&text, &ctx).await {
            if connection.send_json(&reply) == SendOutcome::Closed {
                break;
            }
        }
    }

    info!(client_id = %connection_id, "client disconnected");
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(connection_start.elapsed().as_secs_f64());
    let _ = registry.teardown(&connection_id).await;
    outbound.abort();
}

#[cfg(test)]
mod tests {
    // Session flows over a live socket are covered by the integration tests
    // in `tests/ws_server.rs`. The helpers here validate the ack shape.

    use pulse_core::{ConnectionId, ServerMessage};

    #[test]
    fn connected_ack_has_required_fields() {
        let msg = ServerMessage::connected(ConnectionId::from("alice-01"));
        let v: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(v["type"], "connected");
        assert_eq!(v["payload"]["clientId"], "alice-01");
        assert!(v["payload"]["timestamp"].is_string());
    }
}
