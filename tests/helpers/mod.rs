//! Test doubles for driving a `ScanController` end to end:
//! - `PoseScript`: pose source answering aligned/misaligned per call, with a call counter
//! - `FakeCameras`: camera factory that counts opens and grabs and can be made to fail
//! - `MemoryStore`: in-memory `ScanStore` with injectable persistence failures and latency

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{Datelike, Utc};
use image::{Rgb, RgbImage};
use tokio::sync::broadcast::{error::RecvError, Receiver};
use tokio::time::Duration;

use bodyscan_lib::camera::{CameraDevice, CameraFactory, CameraMode, Frame};
use bodyscan_lib::capture::{CaptureSource, CapturedImage};
use bodyscan_lib::models::ScanStep;
use bodyscan_lib::persistence::{
    CompletedScan, PersistedScan, PoseMetadata, ScanStore, SessionSummary,
};
use bodyscan_lib::pose::{DetectedPose, Keypoint, KeypointName, PoseSource};
use bodyscan_lib::{ScanConfig, ScanController, ScanEvent};

/// Narrow torso, level and centred: passes front, side and back criteria alike.
pub fn aligned_pose() -> DetectedPose {
    let points = [
        (KeypointName::Nose, 370.0, 200.0),
        (KeypointName::LeftEye, 368.0, 185.0),
        (KeypointName::RightEye, 372.0, 185.0),
        (KeypointName::LeftShoulder, 360.0, 400.0),
        (KeypointName::RightShoulder, 380.0, 400.0),
        (KeypointName::LeftElbow, 355.0, 550.0),
        (KeypointName::RightElbow, 385.0, 550.0),
        (KeypointName::LeftHip, 365.0, 700.0),
        (KeypointName::RightHip, 372.0, 700.0),
        (KeypointName::LeftKnee, 362.0, 900.0),
        (KeypointName::RightKnee, 375.0, 900.0),
        (KeypointName::LeftAnkle, 362.0, 1100.0),
        (KeypointName::RightAnkle, 375.0, 1100.0),
    ];
    DetectedPose::new(
        points
            .iter()
            .map(|&(name, x, y)| Keypoint::new(name, x, y, 0.9))
            .collect(),
        0.85,
    )
}

/// Pose source answering from a queue of aligned/misaligned flags, then a fallback.
#[derive(Clone)]
pub struct PoseScript {
    queue: Arc<Mutex<VecDeque<bool>>>,
    fallback: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
}

impl PoseScript {
    pub fn new(fallback_aligned: bool) -> Self {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::new())),
            fallback: Arc::new(AtomicBool::new(fallback_aligned)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn then(self, answers: &[bool]) -> Self {
        self.queue.lock().unwrap().extend(answers.iter().copied());
        self
    }

    pub fn set_fallback(&self, aligned: bool) {
        self.fallback.store(aligned, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PoseSource for PoseScript {
    async fn estimate(&self, _frame: &Frame) -> Result<Option<DetectedPose>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let aligned = self
            .queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.load(Ordering::SeqCst));
        Ok(aligned.then(aligned_pose))
    }
}

#[derive(Clone, Default)]
pub struct FakeCameras {
    opened: Arc<Mutex<Vec<CameraMode>>>,
    grabs: Arc<AtomicUsize>,
    broken: Arc<AtomicBool>,
}

impl FakeCameras {
    pub fn opened(&self) -> Vec<CameraMode> {
        self.opened.lock().unwrap().clone()
    }

    pub fn grabs(&self) -> usize {
        self.grabs.load(Ordering::SeqCst)
    }

    /// Every grab from now on fails.
    pub fn break_device(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl CameraFactory for FakeCameras {
    async fn open(&self, mode: CameraMode) -> Result<Box<dyn CameraDevice>> {
        self.opened.lock().unwrap().push(mode);
        Ok(Box::new(FakeCamera {
            grabs: self.grabs.clone(),
            broken: self.broken.clone(),
        }))
    }
}

struct FakeCamera {
    grabs: Arc<AtomicUsize>,
    broken: Arc<AtomicBool>,
}

#[async_trait]
impl CameraDevice for FakeCamera {
    async fn grab(&mut self) -> Result<Frame> {
        if self.broken.load(Ordering::SeqCst) {
            bail!("video track ended");
        }
        self.grabs.fetch_add(1, Ordering::SeqCst);
        Ok(Frame::new(RgbImage::from_pixel(24, 32, Rgb([90, 90, 90]))))
    }
}

#[derive(Debug, Clone)]
pub struct StoredScan {
    pub session_id: String,
    pub step: ScanStep,
    pub bytes: usize,
    pub source: CaptureSource,
    pub metadata: PoseMetadata,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    scans: Arc<Mutex<Vec<StoredScan>>>,
    completed: Arc<Mutex<Vec<SessionSummary>>>,
    failures_left: Arc<AtomicUsize>,
    delay: Arc<Mutex<Duration>>,
}

impl MemoryStore {
    /// Every persist call takes `delay` of (virtual) time before answering.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// The next `count` persist calls fail.
    pub fn fail_next(&self, count: usize) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    pub fn scans(&self) -> Vec<StoredScan> {
        self.scans.lock().unwrap().clone()
    }

    pub fn completed(&self) -> Vec<SessionSummary> {
        self.completed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ScanStore for MemoryStore {
    async fn persist(
        &self,
        session_id: &str,
        step: ScanStep,
        image: &CapturedImage,
        metadata: &PoseMetadata,
    ) -> Result<PersistedScan> {
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(anyhow!("storage unavailable"));
        }

        let mut scans = self.scans.lock().unwrap();
        scans.push(StoredScan {
            session_id: session_id.to_string(),
            step,
            bytes: image.jpeg.len(),
            source: image.source,
            metadata: metadata.clone(),
        });
        Ok(PersistedScan {
            record_id: format!("scan-{}", scans.len()),
            url: format!("memory://{}/{}", session_id, step.as_str()),
            step,
            alignment_score: image.verdict.as_ref().map(|v| v.score).unwrap_or(0.0),
            captured_at: image.captured_at,
        })
    }

    async fn finalize(&self, summary: &SessionSummary) -> Result<CompletedScan> {
        let mut completed = self.completed.lock().unwrap();
        completed.push(summary.clone());
        Ok(CompletedScan {
            record_id: format!("completed-{}", completed.len()),
            scan_index: completed.len() as u32,
            year: summary.completed_at.year(),
            month: summary.completed_at.month(),
        })
    }
}

pub struct Harness {
    pub controller: ScanController,
    pub poses: PoseScript,
    pub cameras: FakeCameras,
    pub store: MemoryStore,
    pub events: Receiver<ScanEvent>,
}

pub fn test_config() -> ScanConfig {
    let mut config = ScanConfig::default();
    config.capture.shutter_sound = false;
    config
}

pub fn harness(poses: PoseScript) -> Harness {
    harness_with(test_config(), poses)
}

pub fn harness_with(config: ScanConfig, poses: PoseScript) -> Harness {
    let cameras = FakeCameras::default();
    let store = MemoryStore::default();
    let controller = ScanController::new(
        config,
        Arc::new(poses.clone()),
        Arc::new(cameras.clone()),
        Arc::new(store.clone()),
    );
    let events = controller.events().subscribe();
    Harness {
        controller,
        poses,
        cameras,
        store,
        events,
    }
}

/// Receive events until one matches, returning everything seen including the match.
/// Panics after `limit` of virtual time.
pub async fn collect_until<F>(
    events: &mut Receiver<ScanEvent>,
    limit: Duration,
    mut done: F,
) -> Vec<ScanEvent>
where
    F: FnMut(&ScanEvent) -> bool,
{
    let mut seen = Vec::new();
    let outcome = tokio::time::timeout(limit, async {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let finished = done(&event);
                    seen.push(event);
                    if finished {
                        return;
                    }
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await;
    if outcome.is_err() {
        let names: Vec<&str> = seen.iter().map(ScanEvent::name).collect();
        panic!("expected event did not arrive; saw {names:?}");
    }
    seen
}

pub async fn wait_for<F>(events: &mut Receiver<ScanEvent>, done: F) -> ScanEvent
where
    F: FnMut(&ScanEvent) -> bool,
{
    collect_until(events, Duration::from_secs(30), done)
        .await
        .pop()
        .expect("collect_until returns the matching event")
}

pub fn step_succeeded(step: ScanStep) -> impl FnMut(&ScanEvent) -> bool {
    move |event| matches!(event, ScanEvent::StepSucceeded { step: s, .. } if *s == step)
}
