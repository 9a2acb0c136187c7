use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Named moments of the shutter sequence, in the order they fire.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum CaptureCue {
    ClearOverlay,
    FlashStart,
    FlashEnd,
    GrabFrame,
    ReleaseLock,
}

impl CaptureCue {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureCue::ClearOverlay => "clear-overlay",
            CaptureCue::FlashStart => "flash-start",
            CaptureCue::FlashEnd => "flash-end",
            CaptureCue::GrabFrame => "grab-frame",
            CaptureCue::ReleaseLock => "release-lock",
        }
    }
}

/// Cue offsets relative to the instant the countdown hits zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureTimeline {
    cues: Vec<(CaptureCue, Duration)>,
}

impl CaptureTimeline {
    pub fn new(cues: Vec<(CaptureCue, Duration)>) -> Self {
        let mut cues = cues;
        cues.sort_by_key(|(_, offset)| *offset);
        Self { cues }
    }

    pub fn cues(&self) -> &[(CaptureCue, Duration)] {
        &self.cues
    }

    pub fn offset_of(&self, cue: CaptureCue) -> Option<Duration> {
        self.cues
            .iter()
            .find(|(candidate, _)| *candidate == cue)
            .map(|(_, offset)| *offset)
    }

    /// Time from countdown completion until the lock is released.
    pub fn total(&self) -> Duration {
        self.cues
            .last()
            .map(|(_, offset)| *offset)
            .unwrap_or_default()
    }
}

impl Default for CaptureTimeline {
    fn default() -> Self {
        Self::new(vec![
            (CaptureCue::ClearOverlay, Duration::from_millis(100)),
            (CaptureCue::FlashStart, Duration::from_millis(200)),
            (CaptureCue::FlashEnd, Duration::from_millis(350)),
            (CaptureCue::GrabFrame, Duration::from_millis(450)),
            (CaptureCue::ReleaseLock, Duration::from_millis(700)),
        ])
    }
}
