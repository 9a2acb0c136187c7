use serde::Serialize;
use tokio::sync::broadcast;

use crate::alignment::AlignmentVerdict;
use crate::camera::CameraMode;
use crate::capture::{CaptureCue, StepFailure};
use crate::models::{ScanStep, Weight};

const EVENT_CAPACITY: usize = 256;

/// Everything a presenting layer needs to drive the scan screen.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ScanEvent {
    #[serde(rename_all = "camelCase")]
    SessionStarted { session_id: String, camera_mode: CameraMode },
    #[serde(rename_all = "camelCase")]
    StepEntered { step: ScanStep, instruction: String },
    #[serde(rename_all = "camelCase")]
    Alignment {
        step: ScanStep,
        verdict: AlignmentVerdict,
        confirmation_count: u32,
    },
    Confirmed { step: ScanStep },
    CountdownTick { step: ScanStep, remaining: u8 },
    CountdownAborted { step: ScanStep, feedback: String },
    #[serde(rename_all = "camelCase")]
    CaptureCue {
        step: ScanStep,
        cue: CaptureCue,
        offset_ms: u64,
    },
    #[serde(rename_all = "camelCase")]
    FrameValidated { step: ScanStep, is_aligned: bool, score: f32 },
    Saving { step: ScanStep },
    #[serde(rename_all = "camelCase")]
    StepSucceeded { step: ScanStep, url: String, record_id: String },
    StepFailed { step: ScanStep, reason: StepFailure },
    AwaitingWeight,
    #[serde(rename_all = "camelCase")]
    SessionCompleted {
        session_id: String,
        weight: Weight,
        scan_index: u32,
    },
    #[serde(rename_all = "camelCase")]
    SessionExited { session_id: String },
    SessionFaulted { message: String },
    CameraSwitched { mode: CameraMode },
    UploadWarning { message: String },
}

impl ScanEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ScanEvent::SessionStarted { .. } => "session-started",
            ScanEvent::StepEntered { .. } => "step-entered",
            ScanEvent::Alignment { .. } => "alignment",
            ScanEvent::Confirmed { .. } => "confirmed",
            ScanEvent::CountdownTick { .. } => "countdown-tick",
            ScanEvent::CountdownAborted { .. } => "countdown-aborted",
            ScanEvent::CaptureCue { .. } => "capture-cue",
            ScanEvent::FrameValidated { .. } => "frame-validated",
            ScanEvent::Saving { .. } => "saving",
            ScanEvent::StepSucceeded { .. } => "step-succeeded",
            ScanEvent::StepFailed { .. } => "step-failed",
            ScanEvent::AwaitingWeight => "awaiting-weight",
            ScanEvent::SessionCompleted { .. } => "session-completed",
            ScanEvent::SessionExited { .. } => "session-exited",
            ScanEvent::SessionFaulted { .. } => "session-faulted",
            ScanEvent::CameraSwitched { .. } => "camera-switched",
            ScanEvent::UploadWarning { .. } => "upload-warning",
        }
    }
}

/// Fan-out of scan events. Sending with no subscribers is not an error.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ScanEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: ScanEvent) {
        if !matches!(event, ScanEvent::Alignment { .. }) {
            log::debug!("emit {}", event.name());
        }
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
