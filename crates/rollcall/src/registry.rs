//! Device session registry.
//!
//! Maps each device id to the one live channel that reaches it. A device that
//! reconnects replaces its old entry (last registration wins), and every
//! channel carries a [`SessionId`] so a late unregister from the superseded
//! connection cannot evict the new one.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rollproto::{DeviceId, DeviceInfo, ServerMessage};
use std::collections::BTreeSet;
use std::fmt;
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// Identity of one connection, distinct across reconnects of the same device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sending half of a device session.
///
/// `evicted` fires when the registry drops this session, so the connection
/// serving it can hang up and the device reconnects.
#[derive(Debug, Clone)]
pub struct DeviceChannel {
    session_id: SessionId,
    tx: mpsc::Sender<ServerMessage>,
    evicted: CancellationToken,
}

impl DeviceChannel {
    pub fn new(tx: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            session_id: SessionId::new(),
            tx,
            evicted: CancellationToken::new(),
        }
    }

    /// Cancelled once this session is unregistered or evicted.
    pub fn evicted(&self) -> &CancellationToken {
        &self.evicted
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn sender(&self) -> &mpsc::Sender<ServerMessage> {
        &self.tx
    }
}

/// Create a channel with room for `capacity` queued directives.
pub fn channel(capacity: usize) -> (DeviceChannel, mpsc::Receiver<ServerMessage>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (DeviceChannel::new(tx), rx)
}

#[derive(Debug, Clone)]
struct DeviceSession {
    channel: DeviceChannel,
    connected_at: DateTime<Utc>,
    remote_addr: Option<SocketAddr>,
}

#[derive(Debug, Default)]
pub struct DeviceRegistry {
    sessions: DashMap<DeviceId, DeviceSession>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the session for `device_id`.
    ///
    /// Returns the superseded channel, if any. It may still be draining; sends
    /// on it are best effort.
    pub fn register(
        &self,
        device_id: DeviceId,
        channel: DeviceChannel,
        remote_addr: Option<SocketAddr>,
    ) -> Option<DeviceChannel> {
        let session_id = channel.session_id();
        let previous = self.sessions.insert(
            device_id.clone(),
            DeviceSession {
                channel,
                connected_at: Utc::now(),
                remote_addr,
            },
        );

        match &previous {
            Some(old) => info!(
                device.id = %device_id,
                session.id = %session_id,
                superseded = %old.channel.session_id(),
                "Device re-registered, previous session superseded"
            ),
            None => info!(
                device.id = %device_id,
                session.id = %session_id,
                remote = ?remote_addr,
                "Device registered"
            ),
        }

        previous.map(|s| s.channel)
    }

    /// Remove the entry only if it still belongs to `session_id`.
    pub fn unregister(&self, device_id: &DeviceId, session_id: SessionId) -> bool {
        let removed = match self
            .sessions
            .remove_if(device_id, |_, s| s.channel.session_id() == session_id)
        {
            Some((_, session)) => {
                session.channel.evicted.cancel();
                true
            }
            None => false,
        };

        if removed {
            info!(device.id = %device_id, session.id = %session_id, "Device unregistered");
        } else {
            debug!(
                device.id = %device_id,
                session.id = %session_id,
                "Stale unregister ignored"
            );
        }
        removed
    }

    pub fn get(&self, device_id: &DeviceId) -> Option<DeviceChannel> {
        self.sessions.get(device_id).map(|s| s.channel.clone())
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    pub fn list_ids(&self) -> BTreeSet<DeviceId> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    /// Connection details for every live device, sorted by id.
    pub fn devices(&self) -> Vec<DeviceInfo> {
        let mut devices: Vec<DeviceInfo> = self
            .sessions
            .iter()
            .map(|e| DeviceInfo {
                device_id: e.key().clone(),
                remote_addr: e.value().remote_addr.map(|a| a.to_string()),
                connected_at: e.value().connected_at,
                last_recorded_at: None,
            })
            .collect();
        devices.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        devices
    }

    /// Drop every session. Writers see their channel close and hang up.
    pub fn close_all(&self) -> usize {
        let count = self.sessions.len();
        self.sessions.retain(|_, session| {
            session.channel.evicted.cancel();
            false
        });
        if count > 0 {
            info!(sessions = count, "Closed all device sessions");
        }
        count
    }
}
