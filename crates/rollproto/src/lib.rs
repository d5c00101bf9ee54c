//! rollproto - wire types for the rollcall attendance system
//!
//! Everything a device or dashboard exchanges with the server is defined here
//! so both ends agree on field names and tags:
//!
//! - `session` - messages on the per-device WebSocket (`ping`, `status`,
//!   `led_control`, `pong`)
//! - `frame` - frame submission request and the attendance response
//! - `status` - health snapshot, device listing, attendance records
//!
//! All messages are JSON. Enums are internally tagged with `"type"` or use
//! lowercase/snake_case string values.

pub mod frame;
pub mod ids;
pub mod session;
pub mod status;

pub use frame::{FrameRequest, FrameResponse, FrameStatus};
pub use ids::{DeviceId, EntityId};
pub use session::{DeviceMessage, IndicatorColor, ProtocolError, ServerMessage};
pub use status::{
    AttendanceRecord, CommitOutcome, DeviceInfo, EntityInfo, HealthSnapshot,
    ManualAttendanceRequest, ManualAttendanceResponse, PoolSnapshot,
};
