//! Frame processing pipeline.
//!
//! ```text
//! decode (event path) -> match (worker pool, with timeout) -> best candidate
//!   -> cooldown-guarded commit (ledger) -> directive (dispatcher)
//! ```
//!
//! Every frame yields exactly one [`AttendanceOutcome`]. Frames from different
//! devices never wait on each other except inside the ledger's per-commit
//! lock. Directive delivery never changes the outcome.

use crate::decode::{self, DecodeError, EncodedImage};
use crate::dispatch::Dispatcher;
use crate::ledger::{AttendanceLedger, LedgerDecision, LedgerError};
use crate::matcher::{Candidate, MatchReport, Matcher, MatcherError};
use crate::pool::{PoolError, WorkerPool};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use opentelemetry::metrics::Counter;
use opentelemetry::KeyValue;
use rollconf::{BootstrapConfig, IndicatorConfig};
use rollproto::{CommitOutcome, DeviceId, FrameResponse, IndicatorColor, ServerMessage};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error("Could not decode frame: {0}")]
    Decode(#[from] DecodeError),

    #[error("Matcher failed: {0}")]
    Matcher(#[from] MatcherError),

    #[error("Match did not finish within {0:?}")]
    MatchTimeout(Duration),

    #[error("Worker pool: {0}")]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Store(#[from] LedgerError),
}

impl PipelineError {
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode(_))
    }

    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Self::Store(LedgerError::Unavailable(_)))
    }
}

#[derive(Debug, Clone)]
pub enum FramePayload {
    /// Base64 text as it arrived on the wire.
    Base64(String),
    /// Already-binary JPEG or PNG.
    Raw(Bytes),
}

impl FramePayload {
    fn decode(self) -> Result<EncodedImage, DecodeError> {
        match self {
            Self::Base64(text) => EncodedImage::from_bytes(decode::decode_base64(&text)?),
            Self::Raw(bytes) => EncodedImage::from_bytes(bytes),
        }
    }
}

/// One submitted frame. Lives for a single pipeline run.
#[derive(Debug, Clone)]
pub struct Frame {
    pub device_id: DeviceId,
    pub payload: FramePayload,
    pub received_at: DateTime<Utc>,
}

impl Frame {
    pub fn new(device_id: DeviceId, payload: FramePayload) -> Self {
        Self {
            device_id,
            payload,
            received_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttendanceOutcome {
    Committed {
        candidate: Candidate,
        result: CommitOutcome,
    },
    Cooldown {
        candidate: Candidate,
    },
    Unrecognized {
        faces_found: usize,
    },
    NoFaceDetected,
    ProcessingError(PipelineError),
}

impl AttendanceOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Committed { .. } => "committed",
            Self::Cooldown { .. } => "cooldown",
            Self::Unrecognized { .. } => "unrecognized",
            Self::NoFaceDetected => "no_face",
            Self::ProcessingError(_) => "error",
        }
    }

    pub fn candidate(&self) -> Option<Candidate> {
        match self {
            Self::Committed { candidate, .. } | Self::Cooldown { candidate } => Some(*candidate),
            _ => None,
        }
    }

    /// Directive for the device. A pure function of the outcome.
    pub fn directive(&self, indicators: &IndicatorConfig) -> Option<Directive> {
        match self {
            Self::Committed { .. } => Some(Directive {
                color: IndicatorColor::Green,
                duration_secs: indicators.positive_secs,
            }),
            Self::Unrecognized { .. } => Some(Directive {
                color: IndicatorColor::Red,
                duration_secs: indicators.negative_secs,
            }),
            Self::Cooldown { .. } | Self::NoFaceDetected | Self::ProcessingError(_) => None,
        }
    }

    pub fn to_response(&self) -> FrameResponse {
        match self {
            Self::Committed { candidate, result } => {
                FrameResponse::recognized(candidate.entity_id, candidate.confidence, Some(*result))
            }
            Self::Cooldown { candidate } => {
                FrameResponse::recognized(candidate.entity_id, candidate.confidence, None)
            }
            Self::Unrecognized { faces_found } => FrameResponse::unknown(*faces_found),
            Self::NoFaceDetected => FrameResponse::no_face(),
            Self::ProcessingError(e) => FrameResponse::error(e.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Directive {
    pub color: IndicatorColor,
    pub duration_secs: u32,
}

impl From<Directive> for ServerMessage {
    fn from(d: Directive) -> Self {
        ServerMessage::LedControl {
            color: d.color,
            duration: d.duration_secs,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub cooldown: Duration,
    pub match_timeout: Duration,
    pub indicators: IndicatorConfig,
    /// 0 = unbounded.
    pub max_inflight_per_device: usize,
}

impl PipelineSettings {
    pub fn from_config(config: &BootstrapConfig) -> Self {
        Self {
            cooldown: config.attendance.cooldown(),
            match_timeout: config.pipeline.match_timeout(),
            indicators: config.indicators.clone(),
            max_inflight_per_device: config.pipeline.max_inflight_per_device,
        }
    }
}

#[derive(Debug, Default)]
struct OutcomeCounters {
    committed: AtomicU64,
    cooldown: AtomicU64,
    unrecognized: AtomicU64,
    no_face: AtomicU64,
    errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeStats {
    pub committed: u64,
    pub cooldown: u64,
    pub unrecognized: u64,
    pub no_face: u64,
    pub errors: u64,
}

impl OutcomeCounters {
    fn record(&self, outcome: &AttendanceOutcome) {
        let counter = match outcome {
            AttendanceOutcome::Committed { .. } => &self.committed,
            AttendanceOutcome::Cooldown { .. } => &self.cooldown,
            AttendanceOutcome::Unrecognized { .. } => &self.unrecognized,
            AttendanceOutcome::NoFaceDetected => &self.no_face,
            AttendanceOutcome::ProcessingError(_) => &self.errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> OutcomeStats {
        OutcomeStats {
            committed: self.committed.load(Ordering::Relaxed),
            cooldown: self.cooldown.load(Ordering::Relaxed),
            unrecognized: self.unrecognized.load(Ordering::Relaxed),
            no_face: self.no_face.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

pub struct Pipeline {
    matcher: Arc<dyn Matcher>,
    pool: Arc<WorkerPool>,
    ledger: Arc<dyn AttendanceLedger>,
    dispatcher: Arc<Dispatcher>,
    settings: PipelineSettings,
    device_gates: DashMap<DeviceId, Arc<Semaphore>>,
    counters: OutcomeCounters,
    frames_metric: Counter<u64>,
}

impl Pipeline {
    pub fn new(
        matcher: Arc<dyn Matcher>,
        pool: Arc<WorkerPool>,
        ledger: Arc<dyn AttendanceLedger>,
        dispatcher: Arc<Dispatcher>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            matcher,
            pool,
            ledger,
            dispatcher,
            settings,
            device_gates: DashMap::new(),
            counters: OutcomeCounters::default(),
            frames_metric: opentelemetry::global::meter("rollcall")
                .u64_counter("rollcall.frames")
                .with_description("Frames processed, by outcome")
                .build(),
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn stats(&self) -> OutcomeStats {
        self.counters.snapshot()
    }

    /// Run one frame to its outcome and send the matching directive.
    pub async fn process(&self, frame: Frame) -> AttendanceOutcome {
        let device_id = frame.device_id.clone();
        let received_at = frame.received_at;
        let outcome = self.evaluate(frame).await;
        let latency_ms = (Utc::now() - received_at).num_milliseconds();
        self.counters.record(&outcome);
        self.frames_metric.add(1, &[KeyValue::new("outcome", outcome.label())]);

        match &outcome {
            AttendanceOutcome::ProcessingError(e) => tracing::warn!(
                device.id = %device_id,
                frame.outcome = outcome.label(),
                latency_ms,
                error = %e,
                "Frame processing failed"
            ),
            _ => tracing::info!(
                device.id = %device_id,
                frame.outcome = outcome.label(),
                entity.id = outcome.candidate().map(|c| c.entity_id.0),
                confidence = outcome.candidate().map(|c| c.confidence),
                latency_ms,
                "Frame processed"
            ),
        }

        if let Some(directive) = outcome.directive(&self.settings.indicators) {
            if let Err(e) = self.dispatcher.send(&device_id, directive.into()).await {
                tracing::info!(device.id = %device_id, error = %e, "Indicator directive not delivered");
            }
        }

        outcome
    }

    async fn evaluate(&self, frame: Frame) -> AttendanceOutcome {
        let image = match frame.payload.decode() {
            Ok(image) => image,
            Err(e) => return AttendanceOutcome::ProcessingError(e.into()),
        };

        let _gate = self.device_gate(&frame.device_id).await;

        let report = match self.run_match(image).await {
            Ok(report) => report,
            Err(e) => return AttendanceOutcome::ProcessingError(e),
        };

        if report.faces_found == 0 {
            return AttendanceOutcome::NoFaceDetected;
        }
        let Some(candidate) = report.best() else {
            return AttendanceOutcome::Unrecognized {
                faces_found: report.faces_found,
            };
        };

        match self
            .ledger
            .record_unless_cooling(candidate.entity_id, Some(&frame.device_id), self.settings.cooldown)
            .await
        {
            Ok(LedgerDecision::CoolingDown) => AttendanceOutcome::Cooldown { candidate },
            Ok(LedgerDecision::Committed(result)) => AttendanceOutcome::Committed { candidate, result },
            Err(e) => AttendanceOutcome::ProcessingError(e.into()),
        }
    }

    async fn run_match(&self, image: EncodedImage) -> Result<MatchReport, PipelineError> {
        let matcher = self.matcher.clone();
        let ticket = self.pool.submit(move || matcher.find_matches(&image))?;

        match tokio::time::timeout(self.settings.match_timeout, ticket).await {
            Ok(Ok(Ok(report))) => Ok(report),
            Ok(Ok(Err(e))) => Err(e.into()),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(PipelineError::MatchTimeout(self.settings.match_timeout)),
        }
    }

    /// Per-device in-flight limit, when configured.
    async fn device_gate(&self, device_id: &DeviceId) -> Option<DeviceGate<'_>> {
        let limit = self.settings.max_inflight_per_device;
        if limit == 0 {
            return None;
        }
        let gate = self
            .device_gates
            .entry(device_id.clone())
            .or_insert_with(|| Arc::new(Semaphore::new(limit)))
            .clone();
        // Built before waiting so a cancelled wait still cleans up
        let mut guard = DeviceGate {
            gates: &self.device_gates,
            device_id: device_id.clone(),
            limit,
            permit: None,
        };
        guard.permit = gate.acquire_owned().await.ok();
        Some(guard)
    }
}

/// Held for one frame. The last holder removes the device's gate, so the map
/// only tracks devices with frames in flight.
struct DeviceGate<'a> {
    gates: &'a DashMap<DeviceId, Arc<Semaphore>>,
    device_id: DeviceId,
    limit: usize,
    permit: Option<OwnedSemaphorePermit>,
}

impl Drop for DeviceGate<'_> {
    fn drop(&mut self) {
        drop(self.permit.take());
        // Waiters hold a clone of the Arc, so a count of 1 means nobody is queued
        self.gates.remove_if(&self.device_id, |_, gate| {
            Arc::strong_count(gate) == 1 && gate.available_permits() == self.limit
        });
    }
}
