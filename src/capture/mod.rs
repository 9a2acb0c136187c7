//! Confirmation, countdown and capture for the guided body scan.

pub mod choreography;
pub mod controller;
pub mod debouncer;
pub mod sampler;
pub mod state;

pub use choreography::{CaptureCue, CaptureTimeline};
pub use controller::ScanController;
pub use debouncer::{ConfirmationDebouncer, DebounceSignal, DEFAULT_REQUIRED_FRAMES};
pub use sampler::{SamplerExit, SamplingController};
pub use state::{
    CaptureSource, CapturedImage, ScanSession, ScanSnapshot, StepFailure, StepPhase, StepState,
};
