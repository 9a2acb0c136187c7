pub mod analyzer;
pub mod config;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

pub use analyzer::analyze;
pub use config::AlignmentConfig;

/// Why a frame failed its step's criteria. Variant order is feedback priority.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum MisalignmentReason {
    InsufficientVisibility,
    MissingTorso,
    UnevenShoulders,
    UnevenHips,
    PoorPosture,
    OffCenter,
    NotSideways,
    HeadNotInProfile,
}

impl MisalignmentReason {
    pub fn feedback(&self) -> &'static str {
        match self {
            MisalignmentReason::InsufficientVisibility => {
                "Step back so your whole body is in frame"
            }
            MisalignmentReason::MissingTorso => "Make sure your shoulders and hips are visible",
            MisalignmentReason::UnevenShoulders => "Keep shoulders level",
            MisalignmentReason::UnevenHips => "Keep hips level",
            MisalignmentReason::PoorPosture => "Stand up straight",
            MisalignmentReason::OffCenter => "Center yourself in the frame",
            MisalignmentReason::NotSideways => "Turn to your side (profile view)",
            MisalignmentReason::HeadNotInProfile => "Turn your head to match your body",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AlignmentVerdict {
    pub is_aligned: bool,
    pub score: f32,
    pub reasons: BTreeSet<MisalignmentReason>,
    pub feedback: String,
}

impl AlignmentVerdict {
    pub fn misaligned(score: f32, reason: MisalignmentReason) -> Self {
        let mut reasons = BTreeSet::new();
        reasons.insert(reason);
        Self {
            is_aligned: false,
            score: score.clamp(0.0, 1.0),
            reasons,
            feedback: reason.feedback().to_string(),
        }
    }
}
