//! Frame payload decoding.
//!
//! Only cheap work happens here: base64, format sniffing and the image header.
//! Pixel decoding belongs to the matcher and runs on the worker pool.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use image::{ImageFormat, ImageReader};
use std::io::Cursor;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("Frame payload is empty")]
    Empty,

    #[error("Frame payload is not valid base64: {0}")]
    Base64(String),

    #[error("Frame payload is not a recognizable image")]
    UnknownFormat,

    #[error("Unsupported image format {0:?}, expected JPEG or PNG")]
    Unsupported(ImageFormat),

    #[error("Corrupt image header: {0}")]
    Corrupt(String),

    #[error("Image has zero width or height")]
    ZeroSize,
}

/// Decode a base64 transport payload, tolerating a `data:image/...;base64,` prefix.
pub fn decode_base64(data: &str) -> Result<Bytes, DecodeError> {
    let data = data.trim();
    let data = match data.strip_prefix("data:") {
        Some(rest) => rest.split_once(',').map(|(_, b64)| b64).unwrap_or(""),
        None => data,
    };

    if data.is_empty() {
        return Err(DecodeError::Empty);
    }

    STANDARD
        .decode(data)
        .map(Bytes::from)
        .map_err(|e| DecodeError::Base64(e.to_string()))
}

/// A validated still image, still in its compressed form.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    bytes: Bytes,
    format: ImageFormat,
    width: u32,
    height: u32,
}

impl EncodedImage {
    /// Sniff the format and read dimensions without decoding pixels.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Result<Self, DecodeError> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(DecodeError::Empty);
        }

        let reader = ImageReader::new(Cursor::new(&bytes[..]))
            .with_guessed_format()
            .map_err(|e| DecodeError::Corrupt(e.to_string()))?;

        let format = reader.format().ok_or(DecodeError::UnknownFormat)?;
        if !matches!(format, ImageFormat::Jpeg | ImageFormat::Png) {
            return Err(DecodeError::Unsupported(format));
        }

        let (width, height) = reader
            .into_dimensions()
            .map_err(|e| DecodeError::Corrupt(e.to_string()))?;
        if width == 0 || height == 0 {
            return Err(DecodeError::ZeroSize);
        }

        Ok(Self {
            bytes,
            format,
            width,
            height,
        })
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn mime_type(&self) -> &'static str {
        self.format.to_mime_type()
    }
}
