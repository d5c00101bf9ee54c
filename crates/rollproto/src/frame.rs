//! Frame submission (`POST /api/frames`).

use crate::ids::{DeviceId, EntityId};
use crate::status::CommitOutcome;
use serde::{Deserialize, Serialize};

/// A captured frame from a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRequest {
    /// Submitting device. May instead arrive in the `X-Device-ID` header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<DeviceId>,

    /// Base64-encoded JPEG or PNG.
    pub image: String,
}

/// Coarse result of processing one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameStatus {
    Recognized,
    Unknown,
    NoFace,
    Error,
}

/// Response to a frame submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameResponse {
    pub status: FrameStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<EntityId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,

    /// True only when this frame produced a new attendance commit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub committed: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<CommitOutcome>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub faces_found: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl FrameResponse {
    fn bare(status: FrameStatus) -> Self {
        Self {
            status,
            entity_id: None,
            name: None,
            confidence: None,
            committed: None,
            result: None,
            faces_found: None,
            message: None,
        }
    }

    /// Matched entity; `result` is `Some` when a commit happened.
    pub fn recognized(
        entity_id: EntityId,
        confidence: f32,
        result: Option<CommitOutcome>,
    ) -> Self {
        Self {
            entity_id: Some(entity_id),
            confidence: Some(confidence),
            committed: Some(result.is_some()),
            message: result
                .is_none()
                .then(|| "Already recorded within cooldown window".to_string()),
            result,
            ..Self::bare(FrameStatus::Recognized)
        }
    }

    pub fn unknown(faces_found: usize) -> Self {
        Self {
            faces_found: Some(faces_found),
            message: Some("Face not recognized".to_string()),
            ..Self::bare(FrameStatus::Unknown)
        }
    }

    pub fn no_face() -> Self {
        Self {
            faces_found: Some(0),
            message: Some("No face detected".to_string()),
            ..Self::bare(FrameStatus::NoFace)
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::bare(FrameStatus::Error)
        }
    }

    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.name = name;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_request_device_id_is_optional() {
        let req: FrameRequest = serde_json::from_str(r#"{"image":"aGk="}"#).unwrap();
        assert_eq!(req.device_id, None);

        let req: FrameRequest =
            serde_json::from_str(r#"{"device_id":"cam-1","image":"aGk="}"#).unwrap();
        assert_eq!(req.device_id, Some(DeviceId::from("cam-1")));
    }

    #[test]
    fn test_committed_response_shape() {
        let resp = FrameResponse::recognized(EntityId(7), 0.75, Some(CommitOutcome::New))
            .with_name(Some("Ana Rojas".to_string()));
        assert_eq!(
            serde_json::to_value(&resp).unwrap(),
            json!({
                "status": "recognized",
                "entity_id": 7,
                "name": "Ana Rojas",
                "confidence": 0.75,
                "committed": true,
                "result": "new"
            })
        );
    }

    #[test]
    fn test_cooldown_response_is_not_committed() {
        let resp = FrameResponse::recognized(EntityId(7), 0.5, None);
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["status"], "recognized");
        assert_eq!(value["committed"], false);
        assert!(value.get("result").is_none());
    }

    #[test]
    fn test_no_face_status_is_snake_case() {
        let value = serde_json::to_value(FrameResponse::no_face()).unwrap();
        assert_eq!(value["status"], "no_face");
    }
}
