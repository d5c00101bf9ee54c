//! Messages carried on a device's WebSocket session.
//!
//! ```text
//! device -> server   {"type":"ping"}
//! server -> device   {"type":"pong","timestamp":"2026-10-19T08:00:00Z"}
//! device -> server   {"type":"status","temperature":51.2,...}
//! server -> device   {"type":"led_control","color":"green","duration":2}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Errors decoding a session message.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed session message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Inbound message from a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceMessage {
    /// Keepalive; answered with [`ServerMessage::Pong`].
    Ping,
    /// Free-form device status report. Logged, never answered.
    Status {
        #[serde(flatten)]
        fields: Map<String, Value>,
    },
}

impl DeviceMessage {
    pub fn from_text(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Indicator colour on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorColor {
    Green,
    Red,
}

/// Outbound message to a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Light the indicator for `duration` seconds.
    LedControl { color: IndicatorColor, duration: u32 },
    Pong { timestamp: DateTime<Utc> },
}

impl ServerMessage {
    pub fn pong_now() -> Self {
        Self::Pong {
            timestamp: Utc::now(),
        }
    }

    pub fn to_text(&self) -> String {
        // Plain enums of strings and numbers cannot fail to serialize
        serde_json::to_string(self).unwrap_or_default()
    }
}
