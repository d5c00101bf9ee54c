//! Bootstrap configuration - seeds runtime components, then runtime owns it.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// External model service endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// Face encoding service (receives raw image bytes on `/encode`).
    #[serde(default = "ModelsConfig::default_face_encoder")]
    pub face_encoder: String,
}

impl ModelsConfig {
    fn default_face_encoder() -> String {
        "http://127.0.0.1:2010".to_string()
    }
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            face_encoder: Self::default_face_encoder(),
        }
    }
}

/// Gallery matching policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionConfig {
    /// Maximum encoding distance accepted as a match. Lower is stricter.
    #[serde(default = "RecognitionConfig::default_tolerance")]
    pub tolerance: f32,
}

impl RecognitionConfig {
    fn default_tolerance() -> f32 {
        0.6
    }
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            tolerance: Self::default_tolerance(),
        }
    }
}

/// Attendance commit policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceConfig {
    /// Repeat matches of an entity within this window do not commit again.
    #[serde(default = "AttendanceConfig::default_cooldown_secs")]
    pub cooldown_secs: u64,
}

impl AttendanceConfig {
    fn default_cooldown_secs() -> u64 {
        300
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

impl Default for AttendanceConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: Self::default_cooldown_secs(),
        }
    }
}

/// Frame pipeline and worker pool limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Concurrent matching slots.
    #[serde(default = "PipelineConfig::default_workers")]
    pub workers: usize,

    /// Caller gives up on a match after this long.
    #[serde(default = "PipelineConfig::default_match_timeout_ms")]
    pub match_timeout_ms: u64,

    /// A pool slot is reclaimed after this long even if the task is still running.
    #[serde(default = "PipelineConfig::default_task_hard_cap_ms")]
    pub task_hard_cap_ms: u64,

    /// In-flight frames allowed per device. 0 = unbounded, 1 = strict order.
    #[serde(default)]
    pub max_inflight_per_device: usize,
}

impl PipelineConfig {
    fn default_workers() -> usize {
        4
    }

    fn default_match_timeout_ms() -> u64 {
        10_000
    }

    fn default_task_hard_cap_ms() -> u64 {
        30_000
    }

    pub fn match_timeout(&self) -> Duration {
        Duration::from_millis(self.match_timeout_ms)
    }

    pub fn task_hard_cap(&self) -> Duration {
        Duration::from_millis(self.task_hard_cap_ms)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: Self::default_workers(),
            match_timeout_ms: Self::default_match_timeout_ms(),
            task_hard_cap_ms: Self::default_task_hard_cap_ms(),
            max_inflight_per_device: 0,
        }
    }
}

/// Indicator durations sent back to devices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorConfig {
    /// Positive indicator after a committed attendance.
    #[serde(default = "IndicatorConfig::default_positive_secs")]
    pub positive_secs: u32,

    /// Negative indicator after an unrecognized face.
    #[serde(default = "IndicatorConfig::default_negative_secs")]
    pub negative_secs: u32,
}

impl IndicatorConfig {
    fn default_positive_secs() -> u32 {
        2
    }

    fn default_negative_secs() -> u32 {
        1
    }
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            positive_secs: Self::default_positive_secs(),
            negative_secs: Self::default_negative_secs(),
        }
    }
}

/// Device session channel limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DevicesConfig {
    /// Outbound messages buffered per session.
    #[serde(default = "DevicesConfig::default_channel_capacity")]
    pub channel_capacity: usize,

    /// A directive that cannot be queued within this time counts as a send failure.
    #[serde(default = "DevicesConfig::default_send_timeout_ms")]
    pub send_timeout_ms: u64,
}

impl DevicesConfig {
    fn default_channel_capacity() -> usize {
        32
    }

    fn default_send_timeout_ms() -> u64 {
        1_000
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

impl Default for DevicesConfig {
    fn default() -> Self {
        Self {
            channel_capacity: Self::default_channel_capacity(),
            send_timeout_ms: Self::default_send_timeout_ms(),
        }
    }
}

/// Bootstrap configuration - seeds runtime, then runtime owns it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BootstrapConfig {
    #[serde(default)]
    pub models: ModelsConfig,

    #[serde(default)]
    pub recognition: RecognitionConfig,

    #[serde(default)]
    pub attendance: AttendanceConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub indicators: IndicatorConfig,

    #[serde(default)]
    pub devices: DevicesConfig,
}
