//! Known-entity gallery: one face encoding per registered person.
//!
//! The gallery file is JSON produced by the enrollment tooling:
//!
//! ```json
//! [{"entity_id": 7, "name": "Ada", "encoding": [0.01, -0.12, ...]}]
//! ```

use rollproto::{EntityId, EntityInfo};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GalleryError {
    #[error("Failed to read gallery {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse gallery {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Entity {0} has an empty encoding")]
    EmptyEncoding(EntityId),

    #[error("Entity {entity_id} encoding has {found} dimensions, expected {expected}")]
    DimensionMismatch {
        entity_id: EntityId,
        expected: usize,
        found: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GalleryEntry {
    pub entity_id: EntityId,
    pub name: String,
    pub encoding: Vec<f32>,
}

/// An immutable, validated set of gallery entries.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
}

impl Gallery {
    /// Build a gallery, checking every encoding has the same non-zero length.
    pub fn new(entries: Vec<GalleryEntry>) -> Result<Self, GalleryError> {
        let mut expected = None;
        for entry in &entries {
            if entry.encoding.is_empty() {
                return Err(GalleryError::EmptyEncoding(entry.entity_id));
            }
            match expected {
                None => expected = Some(entry.encoding.len()),
                Some(len) if len != entry.encoding.len() => {
                    return Err(GalleryError::DimensionMismatch {
                        entity_id: entry.entity_id,
                        expected: len,
                        found: entry.encoding.len(),
                    });
                }
                Some(_) => {}
            }
        }
        Ok(Self { entries })
    }

    pub fn from_file(path: &Path) -> Result<Self, GalleryError> {
        let raw = std::fs::read_to_string(path).map_err(|source| GalleryError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let entries = serde_json::from_str(&raw).map_err(|source| GalleryError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Self::new(entries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Encoding length shared by all entries, if any.
    pub fn dimensions(&self) -> Option<usize> {
        self.entries.first().map(|e| e.encoding.len())
    }

    pub fn name_of(&self, entity_id: EntityId) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.entity_id == entity_id)
            .map(|e| e.name.as_str())
    }

    /// Closest entry to `encoding` by Euclidean distance, in one pass.
    ///
    /// Ties keep the earlier entry. The caller checks dimensions first.
    pub fn nearest(&self, encoding: &[f32]) -> Option<(&GalleryEntry, f32)> {
        let mut best: Option<(&GalleryEntry, f32)> = None;
        for entry in &self.entries {
            let distance = euclidean(&entry.encoding, encoding);
            if distance.is_nan() {
                continue;
            }
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((entry, distance));
            }
        }
        best
    }

    pub fn entity_infos(&self) -> Vec<EntityInfo> {
        self.entries
            .iter()
            .map(|e| EntityInfo {
                entity_id: e.entity_id,
                name: e.name.clone(),
            })
            .collect()
    }
}

fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// The live gallery plus the file it reloads from.
///
/// Readers take a cheap `Arc` snapshot; a reload swaps the whole gallery so a
/// match in progress never sees a half-loaded set.
#[derive(Debug)]
pub struct GalleryStore {
    path: PathBuf,
    current: RwLock<Arc<Gallery>>,
    loaded: AtomicBool,
}

impl GalleryStore {
    /// Load from `path`. A missing file yields an empty, not-loaded gallery.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, GalleryError> {
        let path = path.into();
        let store = Self::with_gallery(path.clone(), Gallery::default());
        if path.exists() {
            store.reload()?;
        } else {
            tracing::warn!(path = %path.display(), "Gallery file not found, starting with no known entities");
        }
        Ok(store)
    }

    /// Wrap an in-memory gallery. Reloads still read from `path`.
    pub fn with_gallery(path: impl Into<PathBuf>, gallery: Gallery) -> Self {
        let loaded = !gallery.is_empty();
        Self {
            path: path.into(),
            current: RwLock::new(Arc::new(gallery)),
            loaded: AtomicBool::new(loaded),
        }
    }

    pub fn snapshot(&self) -> Arc<Gallery> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Re-read the gallery file, replacing the current set on success.
    pub fn reload(&self) -> Result<usize, GalleryError> {
        let gallery = Gallery::from_file(&self.path)?;
        let count = gallery.len();
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(gallery);
        self.loaded.store(true, Ordering::Release);
        tracing::info!(path = %self.path.display(), entities = count, "Gallery loaded");
        Ok(count)
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
