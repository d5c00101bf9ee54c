//! Directive delivery to device sessions.
//!
//! Fire and forget with explicit failure: a send that fails evicts the
//! session so later sends fail fast until the device reconnects. Nothing here
//! retries.

use crate::registry::DeviceRegistry;
use rollproto::{DeviceId, ServerMessage};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::error::SendTimeoutError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("Device {0} is not connected")]
    DeviceOffline(DeviceId),

    #[error("Send to device {device_id} failed: {reason}")]
    SendFailed { device_id: DeviceId, reason: String },
}

pub struct Dispatcher {
    registry: Arc<DeviceRegistry>,
    send_timeout: Duration,
}

impl Dispatcher {
    pub fn new(registry: Arc<DeviceRegistry>, send_timeout: Duration) -> Self {
        Self {
            registry,
            send_timeout,
        }
    }

    pub async fn send(&self, device_id: &DeviceId, message: ServerMessage) -> Result<(), DispatchError> {
        let Some(channel) = self.registry.get(device_id) else {
            tracing::debug!(device.id = %device_id, "Dispatch skipped, device offline");
            return Err(DispatchError::DeviceOffline(device_id.clone()));
        };

        match channel.sender().send_timeout(message, self.send_timeout).await {
            Ok(()) => {
                tracing::debug!(device.id = %device_id, session.id = %channel.session_id(), "Directive queued");
                Ok(())
            }
            Err(e) => {
                let reason = match e {
                    SendTimeoutError::Timeout(_) => format!("queue full for {:?}", self.send_timeout),
                    SendTimeoutError::Closed(_) => "session closed".to_string(),
                };
                tracing::warn!(
                    device.id = %device_id,
                    session.id = %channel.session_id(),
                    reason = %reason,
                    "Directive send failed, evicting session"
                );
                self.registry.unregister(device_id, channel.session_id());
                Err(DispatchError::SendFailed {
                    device_id: device_id.clone(),
                    reason,
                })
            }
        }
    }
}
