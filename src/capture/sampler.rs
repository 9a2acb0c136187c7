use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::alignment::{analyze, AlignmentConfig};
use crate::camera::{CameraHandle, Frame};
use crate::error::ScanError;
use crate::events::{EventBus, ScanEvent};
use crate::models::ScanStep;
use crate::pose::{DetectedPose, PoseSource};

use super::debouncer::DebounceSignal;
use super::state::ScanSession;

// Set to true to enable per-tick logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// Why a sampling loop returned.
#[derive(Debug)]
pub enum SamplerExit {
    /// Cancelled, or the session moved on under it.
    Stopped,
    /// The debouncer reached its threshold; the step is now counting down.
    Confirmed,
    /// The camera failed. Fatal for the session.
    Fault(ScanError),
}

/// Everything one sampling loop reads or writes.
#[derive(Clone)]
pub(crate) struct SamplerDeps {
    pub state: Arc<Mutex<Option<ScanSession>>>,
    pub camera: Arc<Mutex<Option<CameraHandle>>>,
    pub pose: Arc<dyn PoseSource>,
    pub events: EventBus,
    pub alignment: AlignmentConfig,
    pub tick_interval: Duration,
    pub pose_timeout: Duration,
    pub verbose: bool,
}

/// Owns the single live sampling task.
pub struct SamplingController {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
    epoch: Option<u64>,
}

impl SamplingController {
    pub fn new() -> Self {
        Self {
            handle: None,
            cancel_token: None,
            epoch: None,
        }
    }

    /// Record a freshly spawned loop. Whatever was registered before is cancelled.
    pub fn install(&mut self, epoch: u64, cancel_token: CancellationToken, handle: JoinHandle<()>) {
        if let Some(previous) = self.cancel_token.replace(cancel_token) {
            previous.cancel();
        }
        self.handle = Some(handle);
        self.epoch = Some(epoch);
    }

    /// Take the loop out so the caller can cancel and join it without holding this lock.
    pub fn detach(&mut self) -> Option<(CancellationToken, JoinHandle<()>)> {
        self.epoch = None;
        match (self.cancel_token.take(), self.handle.take()) {
            (Some(token), Some(handle)) => Some((token, handle)),
            (token, handle) => {
                if let Some(token) = token {
                    token.cancel();
                }
                if let Some(handle) = handle {
                    handle.abort();
                }
                None
            }
        }
    }

    /// Forget the loop registered for `epoch`. Called by the loop itself as it hands over
    /// to the countdown, so nothing is joined.
    pub fn release(&mut self, epoch: u64) {
        if self.epoch == Some(epoch) {
            self.epoch = None;
            self.cancel_token = None;
            self.handle = None;
        }
    }
}

impl Default for SamplingController {
    fn default() -> Self {
        Self::new()
    }
}

/// Cancel and wait for a detached loop. After this returns the loop makes no more calls.
pub(crate) async fn join_detached(detached: Option<(CancellationToken, JoinHandle<()>)>) {
    if let Some((token, handle)) = detached {
        token.cancel();
        if let Err(err) = handle.await {
            if !err.is_cancelled() {
                log_warn!("sampling task failed to join: {err}");
            }
        }
    }
}

/// Run the pose source against one frame. Model errors and timeouts count as "no pose".
pub(crate) async fn estimate_pose(
    source: &dyn PoseSource,
    frame: &Frame,
    timeout: Duration,
) -> Option<DetectedPose> {
    match tokio::time::timeout(timeout, source.estimate(frame)).await {
        Ok(Ok(pose)) => pose,
        Ok(Err(err)) => {
            log_warn!("pose estimation failed: {err:#}");
            None
        }
        Err(_) => {
            log_warn!("pose estimation timed out after {}ms", timeout.as_millis());
            None
        }
    }
}

/// Periodic grab/estimate/analyze loop for one step.
///
/// The loop owns nothing but its `epoch`; every tick re-checks the session before touching
/// it, once before the frame grab and again after the pose result lands, so a loop that has
/// been superseded never writes stale feedback or advances a debouncer.
pub(crate) async fn sampling_loop(
    deps: SamplerDeps,
    step: ScanStep,
    epoch: u64,
    cancel_token: CancellationToken,
) -> SamplerExit {
    let mut ticker = tokio::time::interval(deps.tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut ticks: u64 = 0;

    log_info!("sampling {} (epoch {})", step.as_str(), epoch);

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                log_debug!("sampling loop for {} cancelled", step.as_str());
                return SamplerExit::Stopped;
            }
            _ = ticker.tick() => {}
        }

        if !still_owned(&deps, step, epoch, &cancel_token).await {
            return SamplerExit::Stopped;
        }
        ticks += 1;

        let grabbed = {
            let mut camera = deps.camera.lock().await;
            match camera.as_mut() {
                Some(camera) => camera.grab().await,
                None => return SamplerExit::Stopped,
            }
        };
        let frame = match grabbed {
            Ok(frame) => frame,
            Err(err) => return SamplerExit::Fault(ScanError::device(err)),
        };

        let pose = tokio::select! {
            _ = cancel_token.cancelled() => return SamplerExit::Stopped,
            pose = estimate_pose(deps.pose.as_ref(), &frame, deps.pose_timeout) => pose,
        };
        let verdict = analyze(pose.as_ref(), step, &deps.alignment);

        let mut guard = deps.state.lock().await;
        let session = match guard.as_mut() {
            Some(session) if !cancel_token.is_cancelled() && session.may_sample(step, epoch) => {
                session
            }
            _ => return SamplerExit::Stopped,
        };

        let step_state = session.step_mut(step);
        let signal = step_state.debouncer.record(&verdict);
        let confirmation_count = step_state.debouncer.count();
        step_state.feedback = Some(verdict.clone());

        if deps.verbose {
            log_debug!(
                "tick {} {}: score {:.2} aligned={} count={}",
                ticks,
                step.as_str(),
                verdict.score,
                verdict.is_aligned,
                confirmation_count
            );
        }

        deps.events.emit(ScanEvent::Alignment {
            step,
            verdict,
            confirmation_count,
        });

        if signal == DebounceSignal::BeginCountdown {
            log_info!(
                "{} confirmed after {} ticks",
                step.as_str(),
                ticks
            );
            return SamplerExit::Confirmed;
        }
    }
}

async fn still_owned(
    deps: &SamplerDeps,
    step: ScanStep,
    epoch: u64,
    cancel_token: &CancellationToken,
) -> bool {
    if cancel_token.is_cancelled() {
        return false;
    }
    deps.state
        .lock()
        .await
        .as_ref()
        .map(|session| session.may_sample(step, epoch))
        .unwrap_or(false)
}
