//! Read-only views: health, devices, attendance.

use crate::ids::{DeviceId, EntityId};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// What a commit did to the day's record for an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitOutcome {
    /// First record of the day.
    New,
    /// Existing record moved to a new time or device.
    Updated,
    /// Existing record already had this time and device.
    Unchanged,
}

/// One attendance record: at most one per entity per day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub entity_id: EntityId,
    pub day: NaiveDate,
    pub recorded_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<DeviceId>,
}

/// Body of `POST /api/attendance`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualAttendanceRequest {
    pub entity_id: EntityId,
    #[serde(default)]
    pub device_id: Option<DeviceId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualAttendanceResponse {
    pub success: bool,
    pub entity_id: EntityId,
    pub result: CommitOutcome,
}

/// Worker pool load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub capacity: usize,
    pub in_flight: usize,
    pub queued: usize,
}

/// Body of `GET /api/health`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub uptime_secs: u64,
    pub gallery_loaded: bool,
    pub gallery_size: usize,
    pub registered_device_count: usize,
    pub registered_device_ids: BTreeSet<DeviceId>,
    pub pool: PoolSnapshot,
}

/// Entry of `GET /api/devices`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_id: DeviceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_addr: Option<String>,
    pub connected_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_recorded_at: Option<DateTime<Utc>>,
}

/// Entry of `GET /api/entities`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityInfo {
    pub entity_id: EntityId,
    pub name: String,
}
