//! Bounded worker pool for CPU-bound work.
//!
//! At most `capacity` tasks run at once, no matter how many devices are
//! connected. Waiters are admitted in FIFO order (tokio's semaphore is fair).
//! Each task runs on a blocking thread; a task that overruns the hard cap
//! gives its slot back and is left to finish on its own.

use futures::future::FutureExt;
use rollproto::PoolSnapshot;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{oneshot, Semaphore};
use tokio_util::task::TaskTracker;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("Worker pool is closed")]
    Closed,

    #[error("Task panicked: {0}")]
    Panicked(String),

    #[error("Task exceeded hard cap of {0:?}")]
    HardCapExceeded(Duration),

    #[error("Task was dropped before it reported a result")]
    Dropped,
}

pub struct WorkerPool {
    capacity: usize,
    permits: Arc<Semaphore>,
    queued: Arc<AtomicUsize>,
    hard_cap: Duration,
    tracker: TaskTracker,
    closed: AtomicBool,
}

/// Handle to a submitted task's result.
///
/// Dropping the ticket abandons the result, not the task.
#[must_use = "a ticket does nothing unless awaited"]
pub struct PoolTicket<T> {
    rx: oneshot::Receiver<Result<T, PoolError>>,
}

impl<T> Future for PoolTicket<T> {
    type Output = Result<T, PoolError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.rx
            .poll_unpin(cx)
            .map(|received| received.unwrap_or(Err(PoolError::Dropped)))
    }
}

impl WorkerPool {
    pub fn new(capacity: usize, hard_cap: Duration) -> Self {
        let capacity = capacity.max(1);
        tracing::info!(capacity, hard_cap_ms = hard_cap.as_millis() as u64, "Worker pool ready");
        Self {
            capacity,
            permits: Arc::new(Semaphore::new(capacity)),
            queued: Arc::new(AtomicUsize::new(0)),
            hard_cap,
            tracker: TaskTracker::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Queue `task`. Fails only when the pool has been closed.
    pub fn submit<F, T>(&self, task: F) -> Result<PoolTicket<T>, PoolError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if self.closed.load(Ordering::Acquire) {
            return Err(PoolError::Closed);
        }

        let (tx, rx) = oneshot::channel();
        let permits = self.permits.clone();
        let queued = self.queued.clone();
        let hard_cap = self.hard_cap;

        queued.fetch_add(1, Ordering::AcqRel);
        self.tracker.spawn(async move {
            let permit = permits.acquire_owned().await;
            queued.fetch_sub(1, Ordering::AcqRel);
            let Ok(permit) = permit else {
                let _ = tx.send(Err(PoolError::Closed));
                return;
            };
            if tx.is_closed() {
                tracing::debug!("Pool task abandoned before it started, skipping");
                return;
            }

            let handle = tokio::task::spawn_blocking(task);
            let result = match tokio::time::timeout(hard_cap, handle).await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(join_err)) => {
                    let reason = panic_reason(join_err);
                    tracing::error!(reason = %reason, "Pool task panicked");
                    Err(PoolError::Panicked(reason))
                }
                Err(_) => {
                    tracing::warn!(
                        hard_cap_ms = hard_cap.as_millis() as u64,
                        "Pool task overran hard cap, releasing its slot"
                    );
                    Err(PoolError::HardCapExceeded(hard_cap))
                }
            };

            drop(permit);
            let _ = tx.send(result);
        });

        Ok(PoolTicket { rx })
    }

    pub fn in_flight(&self) -> usize {
        self.capacity - self.permits.available_permits()
    }

    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            capacity: self.capacity,
            in_flight: self.in_flight(),
            queued: self.queued(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop accepting work. Already-submitted tasks keep running.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.tracker.close();
            tracing::info!(
                in_flight = self.in_flight(),
                queued = self.queued(),
                "Worker pool closed"
            );
        }
    }

    /// Close and wait for every submitted task to report.
    pub async fn drain(&self) {
        self.close();
        self.tracker.wait().await;
        tracing::info!("Worker pool drained");
    }
}

fn panic_reason(err: tokio::task::JoinError) -> String {
    if err.is_cancelled() {
        return "cancelled".to_string();
    }
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
