//! Candidate matching seam.
//!
//! A [`Matcher`] is synchronous and may be slow; the pipeline only ever calls
//! it from the worker pool.

use crate::decode::EncodedImage;
use crate::encoder::FaceEncoder;
use crate::gallery::GalleryStore;
use rollproto::EntityId;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MatcherError {
    #[error("Face encoder unavailable: {0}")]
    Backend(String),

    #[error("Face encoder returned a malformed response: {0}")]
    Malformed(String),

    #[error("No entities registered in the gallery")]
    GalleryEmpty,

    #[error("Face encoding has {found} dimensions, gallery uses {expected}")]
    DimensionMismatch { expected: usize, found: usize },
}

/// One ranked match.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub entity_id: EntityId,
    /// In `[0, 1]`, higher is better.
    pub confidence: f32,
}

/// What the matcher saw in one image.
///
/// `faces_found == 0` means no face was located at all, which is distinct
/// from faces located with no candidate above threshold.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchReport {
    pub faces_found: usize,
    /// Ordered best first.
    pub candidates: Vec<Candidate>,
}

impl MatchReport {
    pub fn no_face() -> Self {
        Self::default()
    }

    pub fn best(&self) -> Option<Candidate> {
        select_best(&self.candidates)
    }
}

/// Highest confidence wins; ties keep the matcher's order. NaN never wins.
pub fn select_best(candidates: &[Candidate]) -> Option<Candidate> {
    let mut best: Option<Candidate> = None;
    for candidate in candidates {
        if candidate.confidence.is_nan() {
            continue;
        }
        if best.map_or(true, |b| candidate.confidence > b.confidence) {
            best = Some(*candidate);
        }
    }
    best
}

pub trait Matcher: Send + Sync + 'static {
    fn find_matches(&self, image: &EncodedImage) -> Result<MatchReport, MatcherError>;
}

/// Matches located faces against the gallery by encoding distance.
pub struct GalleryMatcher<E> {
    encoder: E,
    gallery: Arc<GalleryStore>,
    tolerance: f32,
}

impl<E: FaceEncoder> GalleryMatcher<E> {
    pub fn new(encoder: E, gallery: Arc<GalleryStore>, tolerance: f32) -> Self {
        Self {
            encoder,
            gallery,
            tolerance,
        }
    }
}

impl<E: FaceEncoder + 'static> Matcher for GalleryMatcher<E> {
    fn find_matches(&self, image: &EncodedImage) -> Result<MatchReport, MatcherError> {
        let faces = self.encoder.encode(image)?;
        if faces.is_empty() {
            return Ok(MatchReport::no_face());
        }

        let gallery = self.gallery.snapshot();
        let Some(expected) = gallery.dimensions() else {
            return Err(MatcherError::GalleryEmpty);
        };

        let mut ranked = Vec::with_capacity(faces.len());
        for face in &faces {
            if face.encoding.len() != expected {
                return Err(MatcherError::DimensionMismatch {
                    expected,
                    found: face.encoding.len(),
                });
            }
            if let Some((entry, distance)) = gallery.nearest(&face.encoding) {
                if distance <= self.tolerance {
                    ranked.push((distance, entry.entity_id));
                }
            }
        }
        ranked.sort_by(|a, b| a.0.total_cmp(&b.0));

        tracing::debug!(
            faces = faces.len(),
            matched = ranked.len(),
            tolerance = self.tolerance,
            "Gallery match complete"
        );

        Ok(MatchReport {
            faces_found: faces.len(),
            candidates: ranked
                .into_iter()
                .map(|(distance, entity_id)| Candidate {
                    entity_id,
                    confidence: (1.0 - distance).clamp(0.0, 1.0),
                })
                .collect(),
        })
    }
}
