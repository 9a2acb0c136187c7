use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use chrono::Utc;
use log::{error, info, warn};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::alignment::{analyze, AlignmentVerdict};
use crate::audio::ShutterSound;
use crate::camera::{CameraFactory, CameraHandle, Frame};
use crate::error::{ScanError, ScanResult};
use crate::events::{EventBus, ScanEvent};
use crate::models::{ScanStep, SessionStatus, Weight, WeightUnit};
use crate::persistence::encoding::{decode_rgb, encode_jpeg};
use crate::persistence::upload::validate_upload;
use crate::persistence::{CompletedScan, PersistedScan, PoseMetadata, ScanStore, SessionSummary};
use crate::pose::{DetectedPose, PoseSource};
use crate::settings::ScanConfig;

use super::choreography::{CaptureCue, CaptureTimeline};
use super::sampler::{
    estimate_pose, join_detached, sampling_loop, SamplerDeps, SamplerExit, SamplingController,
};
use super::state::{
    CaptureSource, CapturedImage, ScanSession, ScanSnapshot, StepFailure, StepPhase,
};

/// Countdown + capture + save for one confirmation.
struct CaptureTask {
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

/// One frame run through the pose source and analyzer.
struct Observation {
    frame: Frame,
    pose: Option<DetectedPose>,
    verdict: AlignmentVerdict,
}

/// Drives a scan session: sampling, confirmation, countdown, capture, save, and the
/// step sequence Front → Side → Back → weight.
///
/// Cheap to clone; clones share the same session. Every background task carries the
/// session epoch it was started under and does nothing once that epoch has moved on.
#[derive(Clone)]
pub struct ScanController {
    state: Arc<Mutex<Option<ScanSession>>>,
    camera: Arc<Mutex<Option<CameraHandle>>>,
    sampler: Arc<StdMutex<SamplingController>>,
    capture: Arc<StdMutex<Option<CaptureTask>>>,
    pose: Arc<dyn PoseSource>,
    cameras: Arc<dyn CameraFactory>,
    store: Arc<dyn ScanStore>,
    events: EventBus,
    config: Arc<ScanConfig>,
    timeline: CaptureTimeline,
    shutter: Arc<ShutterSound>,
}

impl ScanController {
    pub fn new(
        config: ScanConfig,
        pose: Arc<dyn PoseSource>,
        cameras: Arc<dyn CameraFactory>,
        store: Arc<dyn ScanStore>,
    ) -> Self {
        let timeline = config.capture.cue_offsets.timeline();
        let shutter = ShutterSound::new(config.capture.shutter_sound);
        Self {
            state: Arc::new(Mutex::new(None)),
            camera: Arc::new(Mutex::new(None)),
            sampler: Arc::new(StdMutex::new(SamplingController::new())),
            capture: Arc::new(StdMutex::new(None)),
            pose,
            cameras,
            store,
            events: EventBus::new(),
            config: Arc::new(config),
            timeline,
            shutter: Arc::new(shutter),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub async fn snapshot(&self) -> Option<ScanSnapshot> {
        self.state.lock().await.as_ref().map(ScanSession::snapshot)
    }

    /// Full copy of the session, including captured stills.
    pub async fn session(&self) -> Option<ScanSession> {
        self.state.lock().await.clone()
    }

    /// Open the camera, load the pose model and begin sampling the front step.
    pub async fn start(&self) -> ScanResult<ScanSnapshot> {
        let mut guard = self.state.lock().await;
        if matches!(guard.as_ref(), Some(session) if !session.status.is_terminal()) {
            return Err(ScanError::InvalidState(
                "a scan session is already running".into(),
            ));
        }

        self.pose
            .ready()
            .await
            .map_err(|err| ScanError::PoseModel(format!("{err:#}")))?;

        let mode = self.config.camera_mode;
        let handle = CameraHandle::open(self.cameras.as_ref(), mode)
            .await
            .map_err(ScanError::device)?;
        *self.camera.lock().await = Some(handle);

        let session = ScanSession::new(
            Uuid::new_v4().to_string(),
            mode,
            self.config.capture.required_frames,
        );
        info!("Starting scan session {} ({} camera)", session.id, mode.as_str());

        self.events.emit(ScanEvent::SessionStarted {
            session_id: session.id.clone(),
            camera_mode: mode,
        });
        self.announce(ScanStep::Front);

        let snapshot = session.snapshot();
        *guard = Some(session);
        drop(guard);

        self.start_sampling(ScanStep::Front).await;
        Ok(snapshot)
    }

    /// Move past a saved step. After the back scan the session waits for a weight.
    pub async fn advance(&self) -> ScanResult<ScanSnapshot> {
        let (next, snapshot) = {
            let mut guard = self.state.lock().await;
            let session = scanning(&mut guard)?;
            let active = session.active;
            if session.active_state().phase != StepPhase::Succeeded
                || !session.completed.contains(&active)
            {
                return Err(ScanError::InvalidState(format!(
                    "the {} scan has not been saved yet",
                    active.as_str()
                )));
            }

            session.epoch += 1;
            let next = active.next();
            match next {
                Some(next) => {
                    session.enter_step(next);
                    info!("Advancing from {} to {}", active.as_str(), next.as_str());
                    self.announce(next);
                }
                None => {
                    session.status = SessionStatus::AwaitingWeight;
                    info!("All scans saved for session {}; awaiting weight", session.id);
                    self.events.emit(ScanEvent::AwaitingWeight);
                }
            }
            (next, session.snapshot())
        };

        self.cancel_capture().await;
        if let Some(next) = next {
            self.start_sampling(next).await;
        }
        Ok(snapshot)
    }

    /// Throw away the active step's capture and start confirming again.
    pub async fn retake(&self) -> ScanResult<ScanSnapshot> {
        let (step, snapshot) = {
            let mut guard = self.state.lock().await;
            let session = scanning(&mut guard)?;
            if session.active_state().phase == StepPhase::Saving {
                return Err(ScanError::InvalidState("a save is in progress".into()));
            }

            let step = session.active;
            session.epoch += 1;
            session.completed.remove(&step);
            session.persisted.remove(&step);
            session.enter_step(step);
            info!("Retaking {} scan", step.as_str());
            self.announce(step);
            (step, session.snapshot())
        };

        self.stop_sampling().await;
        self.cancel_capture().await;
        self.start_sampling(step).await;
        Ok(snapshot)
    }

    /// Save the retained still again after a persistence failure.
    pub async fn retry_save(&self) -> ScanResult<PersistedScan> {
        let (step, epoch) = {
            let mut guard = self.state.lock().await;
            let session = scanning(&mut guard)?;
            let step = session.active;
            let state = session.active_state_mut();
            let retryable = matches!(
                state.phase,
                StepPhase::Failed {
                    failure: StepFailure::PersistenceFailed { .. }
                }
            );
            if !retryable || state.captured.is_none() {
                return Err(ScanError::InvalidState(
                    "there is no failed save to retry".into(),
                ));
            }
            state.phase = StepPhase::Saving;
            self.events.emit(ScanEvent::Saving { step });
            (step, session.epoch)
        };

        info!("Retrying save of {} scan", step.as_str());
        self.save(step, epoch).await
    }

    /// Record the weight and close out a session whose three scans are saved.
    pub async fn submit_weight(&self, value: f64, unit: WeightUnit) -> ScanResult<CompletedScan> {
        let weight =
            Weight::new(value, unit).map_err(|err| ScanError::InvalidInput(format!("{err:#}")))?;

        let summary = {
            let guard = self.state.lock().await;
            let session = guard.as_ref().ok_or_else(no_session)?;
            if session.status != SessionStatus::AwaitingWeight || !session.all_steps_persisted() {
                return Err(ScanError::InvalidState(
                    "the session is not waiting for a weight".into(),
                ));
            }
            SessionSummary {
                session_id: session.id.clone(),
                scans: session.persisted.clone(),
                weight,
                completed_at: Utc::now(),
            }
        };

        let completed = self
            .store
            .finalize(&summary)
            .await
            .map_err(ScanError::persistence)?;

        {
            let mut guard = self.state.lock().await;
            match guard.as_mut() {
                Some(session)
                    if session.id == summary.session_id
                        && session.status == SessionStatus::AwaitingWeight =>
                {
                    session.status = SessionStatus::Complete;
                    session.weight = Some(weight);
                    self.events.emit(ScanEvent::SessionCompleted {
                        session_id: session.id.clone(),
                        weight,
                        scan_index: completed.scan_index,
                    });
                }
                _ => {
                    return Err(ScanError::InvalidState(
                        "the session ended before the weight was recorded".into(),
                    ))
                }
            }
        }

        *self.camera.lock().await = None;
        info!(
            "Session {} complete: scan #{} of {}",
            summary.session_id, completed.scan_index, completed.year
        );
        Ok(completed)
    }

    /// Use a picked image instead of a camera capture for the active step.
    ///
    /// The file goes straight to persistence: no countdown and no pose check.
    pub async fn upload_image(&self, bytes: Vec<u8>) -> ScanResult<PersistedScan> {
        let check = validate_upload(&bytes, &self.config.storage)
            .map_err(|err| ScanError::InvalidInput(format!("{err:#}")))?;
        {
            let mut guard = self.state.lock().await;
            ensure_uploadable(scanning(&mut guard)?)?;
        }

        if let Some(message) = check.warning {
            warn!("{message}");
            self.events.emit(ScanEvent::UploadWarning { message });
        }

        let quality = self.config.capture.jpeg_quality;
        let format = check.format;
        let (jpeg, width, height) = tokio::task::spawn_blocking(move || {
            let image = decode_rgb(&bytes, format)?;
            let jpeg = encode_jpeg(&image, quality)?;
            anyhow::Ok((jpeg, image.width(), image.height()))
        })
        .await
        .map_err(|err| ScanError::InvalidInput(format!("image worker failed: {err}")))?
        .map_err(|err| ScanError::InvalidInput(format!("{err:#}")))?;

        let (step, epoch) = {
            let mut guard = self.state.lock().await;
            let session = scanning(&mut guard)?;
            ensure_uploadable(session)?;
            session.epoch += 1;
            session.capture_lock = false;
            let step = session.active;
            let state = session.active_state_mut();
            state.debouncer.reset();
            state.countdown_remaining = 0;
            state.captured = Some(CapturedImage {
                jpeg: Arc::new(jpeg),
                width,
                height,
                verdict: None,
                pose_confidence: 0.0,
                detected_keypoints: 0,
                source: CaptureSource::Upload,
                captured_at: Utc::now(),
            });
            state.phase = StepPhase::Saving;
            self.events.emit(ScanEvent::Saving { step });
            (step, session.epoch)
        };

        info!("Saving uploaded image for {} scan", step.as_str());
        self.stop_sampling().await;
        self.save(step, epoch).await
    }

    /// Swap between the rear and front camera. Only while nothing is being captured.
    pub async fn toggle_camera(&self) -> ScanResult<ScanSnapshot> {
        let (session_id, step, mode) = {
            let mut guard = self.state.lock().await;
            let session = guard.as_mut().ok_or_else(no_session)?;
            if session.status.is_terminal() {
                return Err(ScanError::InvalidState("the session has ended".into()));
            }
            if matches!(
                session.active_state().phase,
                StepPhase::Counting | StepPhase::Capturing | StepPhase::Saving
            ) {
                return Err(ScanError::InvalidState(
                    "cannot switch cameras during a capture".into(),
                ));
            }
            session.epoch += 1;
            (session.id.clone(), session.active, session.camera_mode.toggled())
        };

        self.stop_sampling().await;

        {
            let mut camera = self.camera.lock().await;
            // The old stream has to be released before the other lens can be opened.
            *camera = None;
            match CameraHandle::open(self.cameras.as_ref(), mode).await {
                Ok(handle) => *camera = Some(handle),
                Err(err) => {
                    drop(camera);
                    let message = format!("{err:#}");
                    self.fault(&session_id, ScanError::Device(message.clone()))
                        .await;
                    return Err(ScanError::Device(message));
                }
            }
        }

        let snapshot = {
            let mut guard = self.state.lock().await;
            let session = guard.as_mut().ok_or_else(no_session)?;
            session.camera_mode = mode;
            let state = session.active_state_mut();
            if state.is_idle() {
                state.debouncer.reset();
            }
            info!("Switched to {} camera", mode.as_str());
            self.events.emit(ScanEvent::CameraSwitched { mode });
            session.snapshot()
        };

        self.start_sampling(step).await;
        Ok(snapshot)
    }

    /// Stop everything and release the camera. Safe to call at any time, any number of times.
    pub async fn exit(&self) -> ScanResult<()> {
        let exited = {
            let mut guard = self.state.lock().await;
            match guard.as_mut() {
                Some(session) if !session.status.is_terminal() => {
                    session.status = SessionStatus::Exited;
                    session.epoch += 1;
                    session.capture_lock = false;
                    Some(session.id.clone())
                }
                _ => None,
            }
        };

        self.stop_sampling().await;
        self.cancel_capture().await;
        *self.camera.lock().await = None;

        if let Some(session_id) = exited {
            info!("Scan session {} exited", session_id);
            self.events.emit(ScanEvent::SessionExited { session_id });
        }
        Ok(())
    }

    /// Fault `session_id`. A fault raised by an earlier session's task is dropped.
    async fn fault(&self, session_id: &str, err: ScanError) {
        let faulted = {
            let mut guard = self.state.lock().await;
            match guard.as_mut() {
                Some(session)
                    if session.id == session_id && !session.status.is_terminal() =>
                {
                    session.status = SessionStatus::Faulted;
                    session.epoch += 1;
                    session.capture_lock = false;
                    true
                }
                _ => false,
            }
        };
        if !faulted {
            return;
        }

        error!("Scan session faulted: {err}");
        self.stop_sampling().await;
        self.cancel_capture().await;
        *self.camera.lock().await = None;
        self.events.emit(ScanEvent::SessionFaulted {
            message: err.to_string(),
        });
    }

    fn spawn_fault(&self, session_id: &str, err: ScanError) {
        let controller = self.clone();
        let session_id = session_id.to_string();
        tokio::spawn(async move { controller.fault(&session_id, err).await });
    }

    fn spawn_advance(&self) {
        let controller = self.clone();
        tokio::spawn(async move {
            if let Err(err) = controller.advance().await {
                warn!("Auto-advance skipped: {err}");
            }
        });
    }

    fn announce(&self, step: ScanStep) {
        info!("{}: {}", step.display_name(), step.instruction());
        self.events.emit(ScanEvent::StepEntered {
            step,
            instruction: step.instruction().to_string(),
        });
    }

    /// Run `apply` against the session if `epoch` still owns `step`.
    async fn if_current<R>(
        &self,
        step: ScanStep,
        epoch: u64,
        apply: impl FnOnce(&mut ScanSession) -> R,
    ) -> Option<R> {
        let mut guard = self.state.lock().await;
        match guard.as_mut() {
            Some(session) if session.is_current(step, epoch) => Some(apply(session)),
            _ => None,
        }
    }

    fn sampler_deps(&self) -> SamplerDeps {
        SamplerDeps {
            state: self.state.clone(),
            camera: self.camera.clone(),
            pose: self.pose.clone(),
            events: self.events.clone(),
            alignment: self.config.alignment.clone(),
            tick_interval: self.config.sampling.tick_interval(),
            pose_timeout: self.config.sampling.pose_timeout(),
            verbose: self.config.sampling.verbose,
        }
    }

    /// Begin sampling `step` under a fresh epoch, if the step is idle.
    async fn start_sampling(&self, step: ScanStep) {
        let (session_id, epoch) = {
            let mut guard = self.state.lock().await;
            let Some(session) = guard.as_mut() else {
                return;
            };
            if session.status != SessionStatus::Scanning
                || session.active != step
                || !session.active_state().is_idle()
            {
                return;
            }
            session.epoch += 1;
            (session.id.clone(), session.epoch)
        };
        self.spawn_sampler(session_id, step, epoch);
    }

    fn spawn_sampler(&self, session_id: String, step: ScanStep, epoch: u64) {
        let cancel_token = CancellationToken::new();
        let task_token = cancel_token.clone();
        let deps = self.sampler_deps();
        let controller = self.clone();
        let handle = tokio::spawn(async move {
            let exit = sampling_loop(deps, step, epoch, task_token).await;
            controller
                .on_sampler_exit(&session_id, step, epoch, exit)
                .await;
        });
        lock_slot(&self.sampler).install(epoch, cancel_token, handle);
    }

    /// Cancel the sampling loop and wait for it; no pose calls happen after this returns.
    async fn stop_sampling(&self) {
        let detached = lock_slot(&self.sampler).detach();
        join_detached(detached).await;
    }

    async fn on_sampler_exit(
        &self,
        session_id: &str,
        step: ScanStep,
        epoch: u64,
        exit: SamplerExit,
    ) {
        match exit {
            SamplerExit::Stopped => {}
            SamplerExit::Confirmed => {
                lock_slot(&self.sampler).release(epoch);
                self.begin_countdown(step, epoch).await;
            }
            SamplerExit::Fault(err) => {
                lock_slot(&self.sampler).release(epoch);
                self.spawn_fault(session_id, err);
            }
        }
    }

    async fn begin_countdown(&self, step: ScanStep, epoch: u64) {
        let countdown = self.config.capture.countdown_secs;
        let confirmed = {
            let mut guard = self.state.lock().await;
            match guard.as_mut() {
                Some(session)
                    if session.may_sample(step, epoch)
                        && session.active_state().debouncer.is_confirmed() =>
                {
                    let state = session.active_state_mut();
                    state.phase = StepPhase::Counting;
                    state.countdown_remaining = countdown;
                    self.events.emit(ScanEvent::Confirmed { step });
                    Some(session.id.clone())
                }
                _ => None,
            }
        };
        if let Some(session_id) = confirmed {
            self.spawn_capture(session_id, step, epoch);
        }
    }

    fn spawn_capture(&self, session_id: String, step: ScanStep, epoch: u64) {
        let cancel_token = CancellationToken::new();
        let task_token = cancel_token.clone();
        let controller = self.clone();
        let handle = tokio::spawn(async move {
            controller
                .run_capture(&session_id, step, epoch, task_token)
                .await
        });
        let previous = lock_slot(&self.capture).replace(CaptureTask {
            cancel_token,
            handle,
        });
        if let Some(previous) = previous {
            previous.cancel_token.cancel();
        }
    }

    async fn cancel_capture(&self) {
        let task = lock_slot(&self.capture).take();
        if let Some(task) = task {
            task.cancel_token.cancel();
            if let Err(err) = task.handle.await {
                if !err.is_cancelled() {
                    error!("Capture task failed to join: {err}");
                }
            }
        }
    }

    async fn observe(&self, step: ScanStep) -> ScanResult<Observation> {
        let frame = {
            let mut camera = self.camera.lock().await;
            match camera.as_mut() {
                Some(camera) => camera.grab().await.map_err(ScanError::device)?,
                None => return Err(ScanError::Device("camera is not open".into())),
            }
        };
        let pose = estimate_pose(
            self.pose.as_ref(),
            &frame,
            self.config.sampling.pose_timeout(),
        )
        .await;
        let verdict = analyze(pose.as_ref(), step, &self.config.alignment);
        Ok(Observation {
            frame,
            pose,
            verdict,
        })
    }

    /// Countdown, cue sequence, validation and save for a confirmed step.
    async fn run_capture(
        &self,
        session_id: &str,
        step: ScanStep,
        epoch: u64,
        cancel_token: CancellationToken,
    ) {
        let countdown = self.config.capture.countdown_secs;
        for remaining in (1..=countdown).rev() {
            let ticked = self
                .if_current(step, epoch, |session| {
                    session.active_state_mut().countdown_remaining = remaining;
                    self.events
                        .emit(ScanEvent::CountdownTick { step, remaining });
                })
                .await;
            if ticked.is_none() {
                return;
            }

            tokio::select! {
                _ = cancel_token.cancelled() => return,
                _ = time::sleep(Duration::from_secs(1)) => {}
            }

            if self.config.capture.abort_countdown_on_misalignment && remaining > 1 {
                let observed = tokio::select! {
                    _ = cancel_token.cancelled() => return,
                    observed = self.observe(step) => observed,
                };
                match observed {
                    Ok(observation) if !observation.verdict.is_aligned => {
                        self.abort_countdown(step, epoch, observation.verdict).await;
                        return;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        self.spawn_fault(session_id, err);
                        return;
                    }
                }
            }
        }

        let capturing = self
            .if_current(step, epoch, |session| {
                session.capture_lock = true;
                let state = session.active_state_mut();
                state.countdown_remaining = 0;
                state.phase = StepPhase::Capturing;
            })
            .await;
        if capturing.is_none() {
            return;
        }

        let started = Instant::now();
        let mut observation: Option<Observation> = None;
        for &(cue, offset) in self.timeline.cues() {
            tokio::select! {
                _ = cancel_token.cancelled() => return,
                _ = time::sleep_until(started + offset) => {}
            }

            let offset_ms = started.elapsed().as_millis() as u64;
            let emitted = self
                .if_current(step, epoch, |session| {
                    if cue == CaptureCue::ReleaseLock {
                        session.capture_lock = false;
                    }
                    self.events.emit(ScanEvent::CaptureCue {
                        step,
                        cue,
                        offset_ms,
                    });
                })
                .await;
            if emitted.is_none() {
                return;
            }

            match cue {
                CaptureCue::FlashStart => self.shutter.play(),
                CaptureCue::GrabFrame => {
                    let observed = tokio::select! {
                        _ = cancel_token.cancelled() => return,
                        observed = self.observe(step) => observed,
                    };
                    match observed {
                        Ok(observed) => {
                            self.events.emit(ScanEvent::FrameValidated {
                                step,
                                is_aligned: observed.verdict.is_aligned,
                                score: observed.verdict.score,
                            });
                            observation = Some(observed);
                        }
                        Err(err) => {
                            self.spawn_fault(session_id, err);
                            return;
                        }
                    }
                }
                CaptureCue::ClearOverlay | CaptureCue::FlashEnd | CaptureCue::ReleaseLock => {}
            }
        }

        let observation = match observation {
            Some(observation) if observation.verdict.is_aligned => observation,
            other => {
                self.reject_capture(step, epoch, other.map(|observation| observation.verdict))
                    .await;
                return;
            }
        };

        let quality = self.config.capture.jpeg_quality;
        let image = observation.frame.image.clone();
        let encoded = tokio::task::spawn_blocking(move || encode_jpeg(&image, quality)).await;
        let jpeg = match encoded {
            Ok(Ok(jpeg)) => jpeg,
            Ok(Err(err)) => {
                self.fail_save(step, epoch, format!("{err:#}")).await;
                return;
            }
            Err(err) => {
                self.fail_save(step, epoch, format!("encoder worker failed: {err}"))
                    .await;
                return;
            }
        };

        let threshold = self.config.alignment.confidence_threshold;
        let (pose_confidence, detected_keypoints) = observation
            .pose
            .as_ref()
            .map(|pose| (pose.overall_score, pose.visible_count(threshold)))
            .unwrap_or((0.0, 0));
        let captured = CapturedImage {
            jpeg: Arc::new(jpeg),
            width: observation.frame.width(),
            height: observation.frame.height(),
            verdict: Some(observation.verdict),
            pose_confidence,
            detected_keypoints,
            source: CaptureSource::Camera,
            captured_at: observation.frame.captured_at,
        };

        let saving = self
            .if_current(step, epoch, |session| {
                session.capture_lock = false;
                let state = session.active_state_mut();
                state.captured = Some(captured);
                state.phase = StepPhase::Saving;
                self.events.emit(ScanEvent::Saving { step });
            })
            .await;
        if saving.is_none() {
            return;
        }

        tokio::select! {
            _ = cancel_token.cancelled() => {}
            result = self.save(step, epoch) => {
                if let Err(err) = result {
                    warn!("{} scan not saved: {err}", step.as_str());
                }
            }
        }
    }

    /// The pose drifted during the countdown; go back to confirming.
    async fn abort_countdown(&self, step: ScanStep, epoch: u64, verdict: AlignmentVerdict) {
        let aborted = self
            .if_current(step, epoch, |session| {
                let state = session.active_state_mut();
                state.phase = StepPhase::Idle;
                state.countdown_remaining = 0;
                state.debouncer.record(&verdict);
                self.events.emit(ScanEvent::CountdownAborted {
                    step,
                    feedback: verdict.feedback.clone(),
                });
                state.feedback = Some(verdict);
            })
            .await;
        if aborted.is_some() {
            info!("Countdown for {} aborted: pose drifted", step.as_str());
            self.start_sampling(step).await;
        }
    }

    /// The frame grabbed at the capture cue did not hold the pose. Nothing is kept.
    async fn reject_capture(&self, step: ScanStep, epoch: u64, verdict: Option<AlignmentVerdict>) {
        let rejected = self
            .if_current(step, epoch, |session| {
                session.capture_lock = false;
                let state = session.active_state_mut();
                state.phase = StepPhase::Idle;
                state.countdown_remaining = 0;
                state.debouncer.reset();
                if verdict.is_some() {
                    state.feedback = verdict;
                }
                self.events.emit(ScanEvent::StepFailed {
                    step,
                    reason: StepFailure::MisalignedAtCapture,
                });
            })
            .await;
        if rejected.is_some() {
            info!("{} capture rejected: pose not held", step.as_str());
            self.start_sampling(step).await;
        }
    }

    async fn fail_save(&self, step: ScanStep, epoch: u64, message: String) {
        error!("Failed to save {} scan: {message}", step.as_str());
        self.if_current(step, epoch, |session| {
            session.capture_lock = false;
            let failure = StepFailure::PersistenceFailed { message };
            session.active_state_mut().phase = StepPhase::Failed {
                failure: failure.clone(),
            };
            self.events.emit(ScanEvent::StepFailed {
                step,
                reason: failure,
            });
        })
        .await;
    }

    /// Persist the step's retained still. On failure the still is kept for `retry_save`.
    async fn save(&self, step: ScanStep, epoch: u64) -> ScanResult<PersistedScan> {
        let (session_id, image, camera_mode) = self
            .if_current(step, epoch, |session| {
                (
                    session.id.clone(),
                    session.step(step).captured.clone(),
                    session.camera_mode,
                )
            })
            .await
            .ok_or_else(superseded)?;
        let image = image.ok_or_else(|| ScanError::InvalidState("nothing to save".into()))?;

        let metadata = PoseMetadata::from_capture(&image, camera_mode);
        let result = self
            .store
            .persist(&session_id, step, &image, &metadata)
            .await;

        let outcome = match result {
            Ok(scan) => self
                .if_current(step, epoch, |session| {
                    session.completed.insert(step);
                    session.persisted.insert(step, scan.clone());
                    session.active_state_mut().phase = StepPhase::Succeeded;
                    self.events.emit(ScanEvent::StepSucceeded {
                        step,
                        url: scan.url.clone(),
                        record_id: scan.record_id.clone(),
                    });
                    scan
                })
                .await
                .ok_or_else(superseded)?,
            Err(err) => {
                let message = format!("{err:#}");
                self.fail_save(step, epoch, message.clone()).await;
                return Err(ScanError::Persistence(message));
            }
        };

        if self.config.capture.auto_advance {
            self.spawn_advance();
        }
        Ok(outcome)
    }
}

fn lock_slot<T>(slot: &StdMutex<T>) -> MutexGuard<'_, T> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

fn no_session() -> ScanError {
    ScanError::InvalidState("no scan session has been started".into())
}

fn superseded() -> ScanError {
    ScanError::InvalidState("the step was reset while saving".into())
}

fn scanning(guard: &mut Option<ScanSession>) -> ScanResult<&mut ScanSession> {
    let session = guard.as_mut().ok_or_else(no_session)?;
    if session.status != SessionStatus::Scanning {
        return Err(ScanError::InvalidState(format!(
            "the session is {}",
            session.status.as_str()
        )));
    }
    Ok(session)
}

fn ensure_uploadable(session: &ScanSession) -> ScanResult<()> {
    match session.active_state().phase {
        StepPhase::Idle | StepPhase::Failed { .. } => Ok(()),
        _ => Err(ScanError::InvalidState(
            "an image can only be uploaded before capture or after a failed save".into(),
        )),
    }
}
