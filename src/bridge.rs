//! Loopback WebSocket bridge between a running watcher and the control surface.
//!
//! Clients send `{"action":"getStats"}` and get `{"addedCount":..,"isEnabled":..}`
//! back. Every status message the watcher emits is pushed to every connected
//! client. Nothing is queued for clients that are not connected.

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::error::{CartwatchError, Result};
use crate::watcher::{BroadcastNotifier, ControlRequest, Stats, StatusMessage};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

/// Bind the bridge listener on the loopback interface.
pub async fn bind(port: u16) -> Result<TcpListener> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    TcpListener::bind(&addr)
        .await
        .map_err(|e| CartwatchError::BridgeError(format!("Failed to bind to {}: {}", addr, e)))
}

/// Accept control-surface connections until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    stats: watch::Receiver<Stats>,
    notifier: BroadcastNotifier,
    shutdown: CancellationToken,
) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!("Status bridge listening on ws://{}", addr);
    }

    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted.map_err(|e| {
                CartwatchError::BridgeError(format!("Accept failed: {}", e))
            })?,
        };

        // Only accept connections from loopback addresses.
        if !peer.ip().is_loopback() {
            tracing::warn!("Rejected non-loopback connection from {}", peer);
            continue;
        }

        tracing::debug!("Control client connected from {}", peer);
        tokio::spawn(handle_connection(
            stream,
            stats.clone(),
            notifier.subscribe(),
            shutdown.clone(),
        ));
    }

    tracing::info!("Status bridge stopped");
    Ok(())
}

async fn handle_connection(
    stream: TcpStream,
    stats: watch::Receiver<Stats>,
    mut updates: broadcast::Receiver<StatusMessage>,
    shutdown: CancellationToken,
) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::debug!("WebSocket handshake failed: {}", e);
            return;
        }
    };
    let (mut write, mut read) = ws.split();

    loop {
        let outgoing = tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => reply_to(text.as_str(), &stats),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    tracing::debug!("Control client error: {}", e);
                    break;
                }
            },
            update = updates.recv() => match update {
                Ok(message) => serde_json::to_string(&message).ok(),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::debug!("Control client missed {} status messages", missed);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        };

        if let Some(payload) = outgoing {
            if write.send(Message::Text(payload.into())).await.is_err() {
                break;
            }
        }
    }

    let _ = write.close().await;
}

/// Answer one request frame. Malformed requests get an error object back.
fn reply_to(text: &str, stats: &watch::Receiver<Stats>) -> Option<String> {
    let reply = match serde_json::from_str::<ControlRequest>(text) {
        Ok(ControlRequest::GetStats) => serde_json::to_value(*stats.borrow()).ok()?,
        Err(e) => {
            tracing::debug!("Unknown control request {}: {}", text, e);
            serde_json::json!({ "error": "unknown_request", "message": e.to_string() })
        }
    };
    Some(reply.to_string())
}

async fn connect(
    port: u16,
) -> Result<tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>>> {
    let url = format!("ws://127.0.0.1:{}", port);
    let (ws, _) = connect_async(&url).await.map_err(|e| {
        CartwatchError::BridgeError(format!(
            "Cannot connect to {}. Is `cartwatch run` running? ({})",
            url, e
        ))
    })?;
    Ok(ws)
}

/// Ask a running watcher for its stats.
pub async fn request_stats(port: u16) -> Result<Stats> {
    let mut ws = connect(port).await?;

    let request = serde_json::to_string(&ControlRequest::GetStats)?;
    ws.send(Message::Text(request.into()))
        .await
        .map_err(|e| CartwatchError::BridgeError(format!("Send failed: {}", e)))?;

    let wait = async {
        while let Some(frame) = ws.next().await {
            match frame {
                // Status pushes may arrive before the reply; they don't parse as Stats.
                Ok(Message::Text(text)) => {
                    if let Ok(stats) = serde_json::from_str::<Stats>(text.as_str()) {
                        return Ok(stats);
                    }
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    return Err(CartwatchError::BridgeError(format!("WebSocket error: {}", e)))
                }
            }
        }
        Err(CartwatchError::BridgeError(
            "Connection closed without response".to_string(),
        ))
    };

    let result = tokio::time::timeout(REQUEST_TIMEOUT, wait)
        .await
        .map_err(|_| CartwatchError::Timeout("Watcher did not answer getStats".to_string()))?;

    let _ = ws.close(None).await;
    result
}

/// Receive status messages until `on_message` returns false or the watcher goes away.
pub async fn follow<F>(port: u16, mut on_message: F) -> Result<()>
where
    F: FnMut(StatusMessage) -> bool,
{
    let mut ws = connect(port).await?;

    while let Some(frame) = ws.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<StatusMessage>(text.as_str()) {
                Ok(message) => {
                    if !on_message(message) {
                        break;
                    }
                }
                Err(e) => tracing::debug!("Ignoring frame {}: {}", text.as_str(), e),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                return Err(CartwatchError::BridgeError(format!("WebSocket error: {}", e)));
            }
        }
    }

    let _ = ws.close(None).await;
    Ok(())
}

/// Check if a watcher's bridge is listening on the given port.
/// Uses a plain TCP connect to avoid leaving orphan WebSocket connections on the bridge.
pub async fn is_bridge_running(port: u16) -> bool {
    TcpStream::connect(format!("127.0.0.1:{}", port))
        .await
        .is_ok()
}
