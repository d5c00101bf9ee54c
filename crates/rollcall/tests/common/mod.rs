//! Shared fixtures for integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{TimeZone, Utc};
use image::{ImageFormat, Rgb, RgbImage};
use rollcall::decode::EncodedImage;
use rollcall::dispatch::Dispatcher;
use rollcall::gallery::{Gallery, GalleryEntry, GalleryStore};
use rollcall::ledger::{AttendanceLedger, LedgerDecision, LedgerError, ManualClock, MemoryLedger};
use rollcall::matcher::{Candidate, MatchReport, Matcher, MatcherError};
use rollcall::pipeline::{Pipeline, PipelineSettings};
use rollcall::pool::WorkerPool;
use rollcall::registry::DeviceRegistry;
use rollcall::web::AppState;
use rollconf::{CorsConfig, IndicatorConfig};
use rollproto::{AttendanceRecord, CommitOutcome, DeviceId, EntityId};
use std::io::Cursor;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Image width this small means "no face in frame".
pub const NO_FACE_WIDTH: u32 = 1;
/// A face that matches nobody.
pub const STRANGER_WIDTH: u32 = 2;
/// Frames this tall make the matcher panic.
pub const PANIC_HEIGHT: u32 = 13;

pub const ADA: EntityId = EntityId(10);
pub const GRACE: EntityId = EntityId(11);

/// Reads the answer off the image size: width >= 10 is the entity id.
pub struct SizeMatcher;

impl Matcher for SizeMatcher {
    fn find_matches(&self, image: &EncodedImage) -> Result<MatchReport, MatcherError> {
        let (width, height) = image.dimensions();
        if height == PANIC_HEIGHT {
            panic!("matcher fault");
        }
        match width {
            NO_FACE_WIDTH => Ok(MatchReport::no_face()),
            STRANGER_WIDTH => Ok(MatchReport {
                faces_found: 1,
                candidates: vec![],
            }),
            id => Ok(MatchReport {
                faces_found: 1,
                candidates: vec![Candidate {
                    entity_id: EntityId(i64::from(id)),
                    confidence: 0.87,
                }],
            }),
        }
    }
}

/// A ledger whose backing store is down.
pub struct DownLedger;

#[async_trait]
impl AttendanceLedger for DownLedger {
    async fn is_in_cooldown(&self, _: EntityId, _: Duration) -> Result<bool, LedgerError> {
        Err(LedgerError::Unavailable("connection refused".into()))
    }

    async fn commit_attendance(
        &self,
        _: EntityId,
        _: Option<&DeviceId>,
    ) -> Result<CommitOutcome, LedgerError> {
        Err(LedgerError::Unavailable("connection refused".into()))
    }

    async fn record_unless_cooling(
        &self,
        _: EntityId,
        _: Option<&DeviceId>,
        _: Duration,
    ) -> Result<LedgerDecision, LedgerError> {
        Err(LedgerError::Unavailable("connection refused".into()))
    }

    async fn records_today(&self) -> Result<Vec<AttendanceRecord>, LedgerError> {
        Err(LedgerError::Unavailable("connection refused".into()))
    }
}

pub fn png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb([90, 90, 90]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

pub fn png_b64(width: u32, height: u32) -> String {
    STANDARD.encode(png(width, height))
}

pub fn gallery() -> Arc<GalleryStore> {
    let entries = vec![
        GalleryEntry {
            entity_id: ADA,
            name: "Ada Lovelace".into(),
            encoding: vec![0.1, 0.2],
        },
        GalleryEntry {
            entity_id: GRACE,
            name: "Grace Hopper".into(),
            encoding: vec![0.3, 0.4],
        },
    ];
    Arc::new(GalleryStore::with_gallery(
        "/nonexistent/gallery.json",
        Gallery::new(entries).unwrap(),
    ))
}

pub fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 9, 1, 8, 30, 0).unwrap()))
}

pub struct TestApp {
    pub state: AppState,
    pub registry: Arc<DeviceRegistry>,
    pub clock: Arc<ManualClock>,
}

impl TestApp {
    pub fn new() -> Self {
        let clock = clock();
        Self::build(Arc::new(MemoryLedger::new(clock.clone())), clock)
    }

    pub fn with_ledger(ledger: Arc<dyn AttendanceLedger>) -> Self {
        Self::build(ledger, clock())
    }

    fn build(ledger: Arc<dyn AttendanceLedger>, clock: Arc<ManualClock>) -> Self {
        let registry = Arc::new(DeviceRegistry::new());
        let pool = Arc::new(WorkerPool::new(2, Duration::from_secs(5)));
        let dispatcher = Arc::new(Dispatcher::new(registry.clone(), Duration::from_millis(100)));
        let pipeline = Arc::new(Pipeline::new(
            Arc::new(SizeMatcher),
            pool.clone(),
            ledger.clone(),
            dispatcher,
            PipelineSettings {
                cooldown: Duration::from_secs(300),
                match_timeout: Duration::from_secs(2),
                indicators: IndicatorConfig {
                    positive_secs: 2,
                    negative_secs: 1,
                },
                max_inflight_per_device: 0,
            },
        ));

        let state = AppState {
            registry: registry.clone(),
            pipeline,
            ledger,
            gallery: gallery(),
            pool,
            channel_capacity: 8,
            started_at: Instant::now(),
            shutdown: CancellationToken::new(),
        };
        Self {
            state,
            registry,
            clock,
        }
    }

    pub fn router(&self) -> axum::Router {
        rollcall::web::router(self.state.clone(), &CorsConfig::default())
    }
}
