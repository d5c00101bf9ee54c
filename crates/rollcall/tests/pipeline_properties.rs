//! Concurrency properties of the registry, pipeline and dispatcher.

mod common;

use common::*;
use rollcall::pipeline::{AttendanceOutcome, Frame, FramePayload};
use rollcall::registry::{self, SessionId};
use rollcall::{DeviceRegistry, DispatchError, Dispatcher};
use rollproto::{DeviceId, ServerMessage};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

fn frame(device: &str, width: u32, height: u32) -> Frame {
    Frame::new(DeviceId::new(device), FramePayload::Raw(png(width, height).into()))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cooldown_idempotence_across_devices() {
    let app = TestApp::new();
    let pipeline = app.state.pipeline.clone();

    let handles: Vec<_> = (0..12)
        .map(|i| {
            let pipeline = pipeline.clone();
            tokio::spawn(async move {
                pipeline
                    .process(frame(&format!("cam-{}", i % 3), ADA.0 as u32, 4))
                    .await
            })
        })
        .collect();

    let mut committed = 0;
    let mut cooling = 0;
    for handle in handles {
        match handle.await.unwrap() {
            AttendanceOutcome::Committed { .. } => committed += 1,
            AttendanceOutcome::Cooldown { .. } => cooling += 1,
            other => panic!("unexpected outcome {other:?}"),
        }
    }
    assert_eq!(committed, 1);
    assert_eq!(cooling, 11);
}

#[tokio::test]
async fn test_two_frames_in_window_yield_one_commit_one_cooldown() {
    let app = TestApp::new();
    let pipeline = &app.state.pipeline;

    let first = pipeline.process(frame("cam-1", GRACE.0 as u32, 4)).await;
    app.clock.advance(Duration::from_secs(299));
    let second = pipeline.process(frame("cam-2", GRACE.0 as u32, 4)).await;

    assert!(matches!(first, AttendanceOutcome::Committed { .. }));
    assert!(matches!(second, AttendanceOutcome::Cooldown { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_matcher_fault_is_isolated_to_its_frame() {
    let app = TestApp::new();
    let pipeline = app.state.pipeline.clone();

    let faulty = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move { pipeline.process(frame("cam-a", ADA.0 as u32, PANIC_HEIGHT)).await })
    };
    let healthy = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move { pipeline.process(frame("cam-b", GRACE.0 as u32, 4)).await })
    };

    let faulty = faulty.await.unwrap();
    let healthy = healthy.await.unwrap();

    assert!(matches!(faulty, AttendanceOutcome::ProcessingError(_)), "{faulty:?}");
    assert!(matches!(healthy, AttendanceOutcome::Committed { .. }), "{healthy:?}");

    // The faulted entity is not in cooldown: nothing was committed for it
    let again = pipeline.process(frame("cam-a", ADA.0 as u32, 4)).await;
    assert!(matches!(again, AttendanceOutcome::Committed { .. }));
}

#[test]
fn test_registry_uniqueness_over_mixed_sequence() {
    let registry = DeviceRegistry::new();
    let mut latest: HashMap<&str, SessionId> = HashMap::new();
    let mut history: Vec<(&str, SessionId)> = Vec::new();
    let mut receivers = Vec::new();

    let devices = ["a", "b", "c"];
    for step in 0..60usize {
        let device = devices[step % devices.len()];
        if step % 4 == 3 {
            // Unregister with an old handle for this device
            if let Some((_, sid)) = history.iter().find(|(d, _)| *d == device) {
                let removed = registry.unregister(&DeviceId::new(device), *sid);
                if removed {
                    latest.remove(device);
                }
            }
        } else {
            let (channel, rx) = registry::channel(1);
            let sid = channel.session_id();
            registry.register(DeviceId::new(device), channel, None);
            latest.insert(device, sid);
            history.push((device, sid));
            receivers.push(rx);
        }

        for device in devices {
            let current = registry.get(&DeviceId::new(device)).map(|c| c.session_id());
            assert_eq!(current, latest.get(device).copied(), "step {step}, device {device}");
        }
    }
    assert_eq!(registry.count(), latest.len());
}

#[tokio::test]
async fn test_dispatch_to_unregistered_device_is_offline() {
    let registry = Arc::new(DeviceRegistry::new());
    let dispatcher = Dispatcher::new(registry, Duration::from_millis(10));

    let result = dispatcher
        .send(&DeviceId::new("nobody"), ServerMessage::pong_now())
        .await;
    assert_eq!(result, Err(DispatchError::DeviceOffline(DeviceId::new("nobody"))));
}

#[tokio::test]
async fn test_strict_per_device_ordering_knob() {
    use rollcall::pipeline::{Pipeline, PipelineSettings};
    use rollcall::WorkerPool;
    use rollcall::ledger::MemoryLedger;
    use rollcall::matcher::{MatchReport, Matcher, MatcherError};
    use rollcall::decode::EncodedImage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Tracking {
        running: AtomicUsize,
        peak: AtomicUsize,
    }
    impl Matcher for Tracking {
        fn find_matches(&self, _: &EncodedImage) -> Result<MatchReport, MatcherError> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(20));
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(MatchReport::no_face())
        }
    }

    let matcher = Arc::new(Tracking {
        running: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
    });
    let registry = Arc::new(DeviceRegistry::new());
    let pipeline = Arc::new(Pipeline::new(
        matcher.clone(),
        Arc::new(WorkerPool::new(4, Duration::from_secs(5))),
        Arc::new(MemoryLedger::new(clock())),
        Arc::new(Dispatcher::new(registry, Duration::from_millis(10))),
        PipelineSettings {
            cooldown: Duration::from_secs(300),
            match_timeout: Duration::from_secs(2),
            indicators: Default::default(),
            max_inflight_per_device: 1,
        },
    ));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let pipeline = pipeline.clone();
            tokio::spawn(async move { pipeline.process(frame("cam-1", 10, 4)).await })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.await.unwrap(), AttendanceOutcome::NoFaceDetected);
    }
    assert_eq!(matcher.peak.load(Ordering::SeqCst), 1);
}
