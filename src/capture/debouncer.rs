use crate::alignment::AlignmentVerdict;

pub const DEFAULT_REQUIRED_FRAMES: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceSignal {
    /// Aligned frame counted; not enough in a row yet, or already confirmed.
    Counting(u32),
    /// The run just reached the required length. Fires once per run.
    BeginCountdown,
    /// Misaligned frame; counter back to zero.
    Reset,
}

/// Turns noisy per-frame verdicts into a single confirmation after a contiguous run.
///
/// State is only changed through [`record`](Self::record) and [`reset`](Self::reset).
#[derive(Debug, Clone)]
pub struct ConfirmationDebouncer {
    required: u32,
    consecutive: u32,
    confirmed: bool,
}

impl ConfirmationDebouncer {
    pub fn new(required: u32) -> Self {
        Self {
            required: required.max(1),
            consecutive: 0,
            confirmed: false,
        }
    }

    pub fn record(&mut self, verdict: &AlignmentVerdict) -> DebounceSignal {
        if !verdict.is_aligned {
            self.consecutive = 0;
            self.confirmed = false;
            return DebounceSignal::Reset;
        }

        self.consecutive = self.consecutive.saturating_add(1);
        if self.consecutive >= self.required && !self.confirmed {
            self.confirmed = true;
            return DebounceSignal::BeginCountdown;
        }
        DebounceSignal::Counting(self.consecutive)
    }

    pub fn reset(&mut self) {
        self.consecutive = 0;
        self.confirmed = false;
    }

    pub fn count(&self) -> u32 {
        self.consecutive
    }

    pub fn is_confirmed(&self) -> bool {
        self.confirmed
    }
}

impl Default for ConfirmationDebouncer {
    fn default() -> Self {
        Self::new(DEFAULT_REQUIRED_FRAMES)
    }
}
