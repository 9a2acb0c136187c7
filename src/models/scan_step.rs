use serde::{Deserialize, Serialize};

/// One of the three guided poses, in capture order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub enum ScanStep {
    Front,
    Side,
    Back,
}

impl ScanStep {
    pub const ALL: [ScanStep; 3] = [ScanStep::Front, ScanStep::Side, ScanStep::Back];

    pub fn index(self) -> usize {
        match self {
            ScanStep::Front => 0,
            ScanStep::Side => 1,
            ScanStep::Back => 2,
        }
    }

    /// `None` after the last step.
    pub fn next(self) -> Option<ScanStep> {
        match self {
            ScanStep::Front => Some(ScanStep::Side),
            ScanStep::Side => Some(ScanStep::Back),
            ScanStep::Back => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStep::Front => "front",
            ScanStep::Side => "side",
            ScanStep::Back => "back",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ScanStep::Front => "Front View",
            ScanStep::Side => "Side View",
            ScanStep::Back => "Back View",
        }
    }

    pub fn instruction(&self) -> &'static str {
        match self {
            ScanStep::Front => "Stand facing the camera with arms at your sides",
            ScanStep::Side => "Great! Now please turn sideways for a side view photo",
            ScanStep::Back => "Awesome! Now please turn around so we can capture your back view",
        }
    }

    pub fn parse(value: &str) -> Option<ScanStep> {
        match value {
            "front" => Some(ScanStep::Front),
            "side" => Some(ScanStep::Side),
            "back" => Some(ScanStep::Back),
            _ => None,
        }
    }
}
