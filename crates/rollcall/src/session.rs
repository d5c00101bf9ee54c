//! Device WebSocket session.
//!
//! One task per connection reads device messages; a writer task drains the
//! session's directive queue into the socket. When the registry drops the
//! entry (eviction after a failed send, or shutdown) the channel's eviction
//! token fires, the reader stops, and the writer sends a Close so the device
//! reconnects.

use crate::registry::{self, DeviceRegistry};
use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use rollproto::{DeviceId, DeviceMessage, ServerMessage};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

const WRITER_LINGER: Duration = Duration::from_secs(1);

pub struct SessionContext {
    pub registry: Arc<DeviceRegistry>,
    pub channel_capacity: usize,
    pub shutdown: CancellationToken,
}

/// Drive one device connection until it closes or the server shuts down.
pub async fn run(socket: WebSocket, device_id: DeviceId, remote_addr: Option<SocketAddr>, ctx: SessionContext) {
    let (channel, mut outbound) = registry::channel(ctx.channel_capacity);
    let session_id = channel.session_id();
    let own_tx = channel.sender().clone();
    let evicted = channel.evicted().clone();
    ctx.registry.register(device_id.clone(), channel, remote_addr);

    let (mut sink, mut stream) = socket.split();

    let mut writer = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            if sink.send(Message::Text(message.to_text().into())).await.is_err() {
                break;
            }
        }
        let _ = sink.send(Message::Close(None)).await;
    });

    loop {
        tokio::select! {
            _ = ctx.shutdown.cancelled() => {
                tracing::debug!(device.id = %device_id, "Closing session for shutdown");
                break;
            }
            _ = evicted.cancelled() => {
                tracing::info!(device.id = %device_id, session.id = %session_id, "Session evicted, hanging up");
                break;
            }
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => handle_text(&device_id, text.as_str(), &own_tx),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(device.id = %device_id, error = %e, "Session read error");
                    break;
                }
            }
        }
    }

    ctx.registry.unregister(&device_id, session_id);
    drop(own_tx);
    if tokio::time::timeout(WRITER_LINGER, &mut writer).await.is_err() {
        // Stalled peer; dropping the sink closes the connection
        writer.abort();
        tracing::debug!(device.id = %device_id, "Session writer did not finish in time, aborted");
    }
    tracing::info!(device.id = %device_id, session.id = %session_id, "Session ended");
}

/// Never waits on the outbound queue; a pong that does not fit is dropped.
fn handle_text(device_id: &DeviceId, text: &str, reply: &mpsc::Sender<ServerMessage>) {
    match DeviceMessage::from_text(text) {
        Ok(DeviceMessage::Ping) => match reply.try_send(ServerMessage::pong_now()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::debug!(device.id = %device_id, "Pong dropped, outbound queue full");
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(device.id = %device_id, "Pong dropped, writer gone");
            }
        },
        Ok(DeviceMessage::Status { fields }) => {
            tracing::info!(
                device.id = %device_id,
                status = %serde_json::Value::Object(fields),
                "Device status"
            );
        }
        Err(e) => {
            tracing::warn!(device.id = %device_id, error = %e, "Ignoring malformed session message");
        }
    }
}
