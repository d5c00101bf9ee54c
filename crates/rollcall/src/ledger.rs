//! Attendance ledger: one record per entity per calendar day.
//!
//! The ledger owns the cooldown rule. [`AttendanceLedger::record_unless_cooling`]
//! is the call the pipeline uses; it checks and commits under one lock so two
//! frames for the same entity can never both commit inside the window.

use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate, Utc};
use rollproto::{AttendanceRecord, CommitOutcome, DeviceId, EntityId};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("Attendance store unavailable: {0}")]
    Unavailable(String),
}

/// Result of the atomic cooldown check plus commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerDecision {
    CoolingDown,
    Committed(CommitOutcome),
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Calendar day attendance is filed under.
    fn today(&self) -> NaiveDate {
        self.now().with_timezone(&Local).date_naive()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Test clock. Days roll over at UTC midnight.
#[derive(Debug)]
pub struct ManualClock {
    now: std::sync::Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: std::sync::Mutex::new(now),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += chrono::Duration::from_std(by).unwrap_or(chrono::Duration::zero());
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

#[async_trait]
pub trait AttendanceLedger: Send + Sync {
    /// True when `entity` was recorded today less than `window` ago.
    async fn is_in_cooldown(&self, entity: EntityId, window: Duration) -> Result<bool, LedgerError>;

    /// Upsert today's record for `entity`. No cooldown check.
    async fn commit_attendance(
        &self,
        entity: EntityId,
        device: Option<&DeviceId>,
    ) -> Result<CommitOutcome, LedgerError>;

    /// Check the cooldown and commit as one atomic step.
    async fn record_unless_cooling(
        &self,
        entity: EntityId,
        device: Option<&DeviceId>,
        window: Duration,
    ) -> Result<LedgerDecision, LedgerError>;

    async fn records_today(&self) -> Result<Vec<AttendanceRecord>, LedgerError>;
}

type RecordKey = (EntityId, NaiveDate);

/// In-process ledger with an optional JSON snapshot on disk.
pub struct MemoryLedger {
    records: Mutex<HashMap<RecordKey, AttendanceRecord>>,
    clock: Arc<dyn Clock>,
    snapshot_path: Option<PathBuf>,
}

impl MemoryLedger {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            clock,
            snapshot_path: None,
        }
    }

    /// Load `path` if it exists and write every commit back to it.
    pub async fn open(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Result<Self, LedgerError> {
        let path = path.into();
        let mut records = HashMap::new();

        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => {
                let stored: Vec<AttendanceRecord> = serde_json::from_str(&raw).map_err(|e| {
                    LedgerError::Unavailable(format!("corrupt snapshot {}: {}", path.display(), e))
                })?;
                for record in stored {
                    records.insert((record.entity_id, record.day), record);
                }
                tracing::info!(path = %path.display(), records = records.len(), "Attendance snapshot loaded");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "No attendance snapshot, starting empty");
            }
            Err(e) => {
                return Err(LedgerError::Unavailable(format!(
                    "read {}: {}",
                    path.display(),
                    e
                )))
            }
        }

        Ok(Self {
            records: Mutex::new(records),
            clock,
            snapshot_path: Some(path),
        })
    }

    fn cooling(
        records: &HashMap<RecordKey, AttendanceRecord>,
        entity: EntityId,
        day: NaiveDate,
        now: DateTime<Utc>,
        window: Duration,
    ) -> bool {
        let Ok(window) = chrono::Duration::from_std(window) else {
            return true;
        };
        records
            .get(&(entity, day))
            .is_some_and(|r| r.recorded_at > now - window)
    }

    /// Apply a commit and return the outcome plus the prior record for rollback.
    fn apply(
        records: &mut HashMap<RecordKey, AttendanceRecord>,
        entity: EntityId,
        device: Option<&DeviceId>,
        day: NaiveDate,
        now: DateTime<Utc>,
    ) -> (CommitOutcome, Option<AttendanceRecord>) {
        match records.get_mut(&(entity, day)) {
            None => {
                records.insert(
                    (entity, day),
                    AttendanceRecord {
                        entity_id: entity,
                        day,
                        recorded_at: now,
                        device_id: device.cloned(),
                    },
                );
                (CommitOutcome::New, None)
            }
            Some(existing)
                if existing.recorded_at.timestamp() == now.timestamp()
                    && existing.device_id.as_ref() == device =>
            {
                (CommitOutcome::Unchanged, None)
            }
            Some(existing) => {
                let previous = existing.clone();
                existing.recorded_at = now;
                existing.device_id = device.cloned();
                (CommitOutcome::Updated, Some(previous))
            }
        }
    }

    async fn commit_locked(
        &self,
        records: &mut HashMap<RecordKey, AttendanceRecord>,
        entity: EntityId,
        device: Option<&DeviceId>,
        day: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<CommitOutcome, LedgerError> {
        let (outcome, previous) = Self::apply(records, entity, device, day, now);
        if outcome == CommitOutcome::Unchanged {
            return Ok(outcome);
        }

        if let Err(e) = self.persist(records).await {
            match previous {
                Some(prev) => {
                    records.insert((entity, day), prev);
                }
                None => {
                    records.remove(&(entity, day));
                }
            }
            return Err(e);
        }

        tracing::info!(
            entity.id = %entity,
            device.id = device.map(DeviceId::as_str).unwrap_or("-"),
            result = ?outcome,
            "Attendance committed"
        );
        Ok(outcome)
    }

    async fn persist(&self, records: &HashMap<RecordKey, AttendanceRecord>) -> Result<(), LedgerError> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };

        let mut sorted: Vec<&AttendanceRecord> = records.values().collect();
        sorted.sort_by_key(|r| (r.day, r.entity_id));

        write_snapshot(path, &sorted)
            .await
            .map_err(|e| LedgerError::Unavailable(format!("write {}: {}", path.display(), e)))
    }
}

/// Write-then-rename so a crash never leaves a torn snapshot.
async fn write_snapshot(path: &Path, records: &[&AttendanceRecord]) -> std::io::Result<()> {
    let json = serde_json::to_string_pretty(records)?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, json).await?;
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

#[async_trait]
impl AttendanceLedger for MemoryLedger {
    async fn is_in_cooldown(&self, entity: EntityId, window: Duration) -> Result<bool, LedgerError> {
        let records = self.records.lock().await;
        Ok(Self::cooling(
            &records,
            entity,
            self.clock.today(),
            self.clock.now(),
            window,
        ))
    }

    async fn commit_attendance(
        &self,
        entity: EntityId,
        device: Option<&DeviceId>,
    ) -> Result<CommitOutcome, LedgerError> {
        let mut records = self.records.lock().await;
        let (day, now) = (self.clock.today(), self.clock.now());
        self.commit_locked(&mut records, entity, device, day, now).await
    }

    async fn record_unless_cooling(
        &self,
        entity: EntityId,
        device: Option<&DeviceId>,
        window: Duration,
    ) -> Result<LedgerDecision, LedgerError> {
        let mut records = self.records.lock().await;
        let (day, now) = (self.clock.today(), self.clock.now());

        if Self::cooling(&records, entity, day, now, window) {
            tracing::debug!(entity.id = %entity, "Entity in cooldown, not committing");
            return Ok(LedgerDecision::CoolingDown);
        }

        let outcome = self.commit_locked(&mut records, entity, device, day, now).await?;
        Ok(LedgerDecision::Committed(outcome))
    }

    async fn records_today(&self) -> Result<Vec<AttendanceRecord>, LedgerError> {
        let today = self.clock.today();
        let records = self.records.lock().await;
        let mut out: Vec<AttendanceRecord> = records
            .values()
            .filter(|r| r.day == today)
            .cloned()
            .collect();
        out.sort_by_key(|r| r.recorded_at);
        Ok(out)
    }
}
