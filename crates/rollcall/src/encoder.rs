//! Face encoding backend.
//!
//! The encoder locates faces and returns one embedding per face. The shipped
//! implementation calls an HTTP model service:
//!
//! ```text
//! POST {base}/encode   (body: raw JPEG/PNG, Content-Type: image/*)
//! 200 {"faces": [{"encoding": [f32; 128], "location": [top, right, bottom, left]}]}
//! ```

use crate::decode::EncodedImage;
use crate::matcher::MatcherError;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use std::time::Duration;
use tokio::runtime::Handle;

const ENCODE_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FaceEncoding {
    pub encoding: Vec<f32>,
    #[serde(default)]
    pub location: Option<[i32; 4]>,
}

/// Locates faces and embeds them. Called from worker pool threads only.
pub trait FaceEncoder: Send + Sync {
    fn encode(&self, image: &EncodedImage) -> Result<Vec<FaceEncoding>, MatcherError>;
}

#[derive(Debug, Deserialize)]
struct EncodeResponse {
    faces: Vec<FaceEncoding>,
}

/// Client for the face-encoding model service.
///
/// Holds the async client and a runtime handle; `encode` blocks the calling
/// pool thread on the request, never a runtime worker.
#[derive(Clone)]
pub struct HttpFaceEncoder {
    client: reqwest::Client,
    endpoint: String,
    runtime: Handle,
}

impl HttpFaceEncoder {
    pub fn new(base_url: &str, runtime: Handle) -> Result<Self, MatcherError> {
        let client = reqwest::Client::builder()
            .timeout(ENCODE_TIMEOUT)
            .build()
            .map_err(|e| MatcherError::Backend(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}/encode", base_url.trim_end_matches('/')),
            runtime,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn request(&self, image: &EncodedImage) -> Result<Vec<FaceEncoding>, MatcherError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, image.mime_type())
            .body(image.bytes().clone())
            .send()
            .await
            .map_err(|e| MatcherError::Backend(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MatcherError::Backend(format!("HTTP {}: {}", status, body)));
        }

        let parsed: EncodeResponse = response
            .json()
            .await
            .map_err(|e| MatcherError::Malformed(e.to_string()))?;
        Ok(parsed.faces)
    }
}

impl FaceEncoder for HttpFaceEncoder {
    fn encode(&self, image: &EncodedImage) -> Result<Vec<FaceEncoding>, MatcherError> {
        let faces = self.runtime.block_on(self.request(image))?;
        tracing::debug!(endpoint = %self.endpoint, faces = faces.len(), "Face encoder responded");
        Ok(faces)
    }
}
