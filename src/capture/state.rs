use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alignment::AlignmentVerdict;
use crate::camera::CameraMode;
use crate::models::{ScanStep, SessionStatus, Weight};
use crate::persistence::PersistedScan;

use super::debouncer::ConfirmationDebouncer;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum StepFailure {
    /// Pose drifted between confirmation and the frame grab.
    MisalignedAtCapture,
    PersistenceFailed { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "phase", rename_all = "camelCase")]
pub enum StepPhase {
    /// Sampling may run.
    Idle,
    Counting,
    Capturing,
    Saving,
    Succeeded,
    Failed { failure: StepFailure },
}

impl Default for StepPhase {
    fn default() -> Self {
        StepPhase::Idle
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum CaptureSource {
    Camera,
    Upload,
}

impl CaptureSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureSource::Camera => "camera",
            CaptureSource::Upload => "upload",
        }
    }
}

/// An encoded still and the alignment state it was taken under.
#[derive(Debug, Clone)]
pub struct CapturedImage {
    pub jpeg: Arc<Vec<u8>>,
    pub width: u32,
    pub height: u32,
    pub verdict: Option<AlignmentVerdict>,
    pub pose_confidence: f32,
    pub detected_keypoints: usize,
    pub source: CaptureSource,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct StepState {
    pub step: ScanStep,
    pub phase: StepPhase,
    pub debouncer: ConfirmationDebouncer,
    pub countdown_remaining: u8,
    pub feedback: Option<AlignmentVerdict>,
    pub captured: Option<CapturedImage>,
}

impl StepState {
    pub fn new(step: ScanStep, required_frames: u32) -> Self {
        Self {
            step,
            phase: StepPhase::Idle,
            debouncer: ConfirmationDebouncer::new(required_frames),
            countdown_remaining: 0,
            feedback: None,
            captured: None,
        }
    }

    /// Back to the values a step has when first entered.
    pub fn reset(&mut self) {
        self.phase = StepPhase::Idle;
        self.debouncer.reset();
        self.countdown_remaining = 0;
        self.feedback = None;
        self.captured = None;
    }

    pub fn is_idle(&self) -> bool {
        self.phase == StepPhase::Idle
    }
}

#[derive(Debug, Clone)]
pub struct ScanSession {
    pub id: String,
    pub status: SessionStatus,
    pub active: ScanStep,
    pub steps: [StepState; 3],
    pub completed: BTreeSet<ScanStep>,
    pub persisted: BTreeMap<ScanStep, PersistedScan>,
    pub camera_mode: CameraMode,
    pub weight: Option<Weight>,
    /// Set while the capture sequence owns the overlay surface.
    pub capture_lock: bool,
    /// Bumped whenever the active step's lifecycle restarts. Sampling ticks and capture
    /// tasks carry the epoch they were started under and stand down once it moves on.
    pub epoch: u64,
    pub started_at: DateTime<Utc>,
}

impl ScanSession {
    pub fn new(id: String, camera_mode: CameraMode, required_frames: u32) -> Self {
        Self {
            id,
            status: SessionStatus::Scanning,
            active: ScanStep::Front,
            steps: ScanStep::ALL.map(|step| StepState::new(step, required_frames)),
            completed: BTreeSet::new(),
            persisted: BTreeMap::new(),
            camera_mode,
            weight: None,
            capture_lock: false,
            epoch: 0,
            started_at: Utc::now(),
        }
    }

    pub fn step(&self, step: ScanStep) -> &StepState {
        &self.steps[step.index()]
    }

    pub fn step_mut(&mut self, step: ScanStep) -> &mut StepState {
        &mut self.steps[step.index()]
    }

    pub fn active_state(&self) -> &StepState {
        self.step(self.active)
    }

    pub fn active_state_mut(&mut self) -> &mut StepState {
        let active = self.active;
        self.step_mut(active)
    }

    /// Make `step` active with all of its per-step state at initial values.
    pub fn enter_step(&mut self, step: ScanStep) {
        self.active = step;
        self.capture_lock = false;
        self.step_mut(step).reset();
    }

    /// Whether a capture task started under `epoch` still owns `step`.
    pub fn is_current(&self, step: ScanStep, epoch: u64) -> bool {
        self.status == SessionStatus::Scanning && self.epoch == epoch && self.active == step
    }

    /// Guard evaluated at the top of every sampling tick.
    pub fn may_sample(&self, step: ScanStep, epoch: u64) -> bool {
        self.status == SessionStatus::Scanning
            && self.epoch == epoch
            && self.active == step
            && self.active_state().is_idle()
            && !self.capture_lock
    }

    pub fn all_steps_persisted(&self) -> bool {
        ScanStep::ALL.iter().all(|step| self.completed.contains(step))
    }

    pub fn snapshot(&self) -> ScanSnapshot {
        let active = self.active_state();
        ScanSnapshot {
            session_id: self.id.clone(),
            status: self.status,
            active_step: self.active,
            phase: active.phase.clone(),
            confirmation_count: active.debouncer.count(),
            confirmed: active.debouncer.is_confirmed(),
            countdown_remaining: active.countdown_remaining,
            feedback: active.feedback.as_ref().map(|verdict| verdict.feedback.clone()),
            has_capture: active.captured.is_some(),
            completed_steps: self.completed.iter().copied().collect(),
            camera_mode: self.camera_mode,
            capture_lock: self.capture_lock,
            progress: self.completed.len() as f32 / ScanStep::ALL.len() as f32,
        }
    }
}

/// Read-only view handed to callers and the presenting layer.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScanSnapshot {
    pub session_id: String,
    pub status: SessionStatus,
    pub active_step: ScanStep,
    pub phase: StepPhase,
    pub confirmation_count: u32,
    pub confirmed: bool,
    pub countdown_remaining: u8,
    pub feedback: Option<String>,
    pub has_capture: bool,
    pub completed_steps: Vec<ScanStep>,
    pub camera_mode: CameraMode,
    pub capture_lock: bool,
    pub progress: f32,
}
