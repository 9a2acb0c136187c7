use std::collections::BTreeSet;

use crate::models::ScanStep;
use crate::pose::{DetectedPose, Keypoint, KeypointName};

use super::config::AlignmentConfig;
use super::{AlignmentVerdict, MisalignmentReason};

// Float sums like 0.3 + 0.3 + 0.2 land a hair under 0.8.
const SCORE_EPSILON: f32 = 1e-4;

const ALIGNED_FEEDBACK: &str = "Perfect alignment! Hold steady...";

/// Score a pose against the criteria of `step`. Pure; an absent pose is simply not aligned.
pub fn analyze(
    pose: Option<&DetectedPose>,
    step: ScanStep,
    config: &AlignmentConfig,
) -> AlignmentVerdict {
    let Some(pose) = pose else {
        return AlignmentVerdict::misaligned(0.0, MisalignmentReason::InsufficientVisibility);
    };

    let threshold = config.confidence_threshold;
    let visible = pose.visible_count(threshold);
    let visible_fraction = visible as f32 / KeypointName::ALL.len() as f32;

    if visible < config.min_visible_keypoints {
        return AlignmentVerdict::misaligned(
            visible_fraction,
            MisalignmentReason::InsufficientVisibility,
        );
    }

    let torso = (
        pose.visible(KeypointName::LeftShoulder, threshold),
        pose.visible(KeypointName::RightShoulder, threshold),
        pose.visible(KeypointName::LeftHip, threshold),
        pose.visible(KeypointName::RightHip, threshold),
    );
    let (Some(ls), Some(rs), Some(lh), Some(rh)) = torso else {
        return AlignmentVerdict::misaligned(visible_fraction, MisalignmentReason::MissingTorso);
    };
    let torso = Torso { ls, rs, lh, rh };

    let (score, reasons) = match step {
        ScanStep::Side => score_side(pose, &torso, config),
        ScanStep::Front | ScanStep::Back => score_front_back(&torso, config),
    };

    finish(score, reasons, config)
}

struct Torso<'a> {
    ls: &'a Keypoint,
    rs: &'a Keypoint,
    lh: &'a Keypoint,
    rh: &'a Keypoint,
}

impl Torso<'_> {
    fn shoulder_center(&self) -> (f32, f32) {
        midpoint(self.ls, self.rs)
    }

    fn hip_center(&self) -> (f32, f32) {
        midpoint(self.lh, self.rh)
    }
}

fn midpoint(a: &Keypoint, b: &Keypoint) -> (f32, f32) {
    ((a.x + b.x) / 2.0, (a.y + b.y) / 2.0)
}

/// Profile view: shoulders and hips collapse onto one vertical line when the body is turned.
fn score_side(
    pose: &DetectedPose,
    torso: &Torso<'_>,
    config: &AlignmentConfig,
) -> (f32, BTreeSet<MisalignmentReason>) {
    let mut score = 0.0;
    let mut reasons = BTreeSet::new();

    let shoulder_span = (torso.ls.x - torso.rs.x).abs();
    let hip_span = (torso.lh.x - torso.rh.x).abs();
    if shoulder_span < config.profile_pair_tolerance_px && hip_span < config.profile_pair_tolerance_px
    {
        score += config.weight_profile_body;
    } else {
        reasons.insert(MisalignmentReason::NotSideways);
    }

    let threshold = config.confidence_threshold;
    if let (Some(le), Some(re)) = (
        pose.visible(KeypointName::LeftEye, threshold),
        pose.visible(KeypointName::RightEye, threshold),
    ) {
        if (le.x - re.x).abs() < config.profile_eye_tolerance_px {
            score += config.weight_profile_head;
        } else {
            reasons.insert(MisalignmentReason::HeadNotInProfile);
        }
    }

    (score, reasons)
}

fn score_front_back(
    torso: &Torso<'_>,
    config: &AlignmentConfig,
) -> (f32, BTreeSet<MisalignmentReason>) {
    let mut score = 0.0;
    let mut reasons = BTreeSet::new();

    if (torso.ls.y - torso.rs.y).abs() <= config.level_tolerance_px {
        score += config.weight_shoulders_level;
    } else {
        reasons.insert(MisalignmentReason::UnevenShoulders);
    }

    if (torso.lh.y - torso.rh.y).abs() <= config.level_tolerance_px {
        score += config.weight_hips_level;
    } else {
        reasons.insert(MisalignmentReason::UnevenHips);
    }

    let (shoulder_x, shoulder_y) = torso.shoulder_center();
    let (hip_x, hip_y) = torso.hip_center();

    // Image y grows downward, so upright means shoulders have the smaller y.
    if shoulder_y < hip_y {
        score += config.weight_upright;
    } else {
        reasons.insert(MisalignmentReason::PoorPosture);
    }

    if (shoulder_x - hip_x).abs() <= config.center_tolerance_px {
        score += config.weight_centered;
    } else {
        reasons.insert(MisalignmentReason::OffCenter);
    }

    (score, reasons)
}

fn finish(
    score: f32,
    mut reasons: BTreeSet<MisalignmentReason>,
    config: &AlignmentConfig,
) -> AlignmentVerdict {
    let score = score.clamp(0.0, 1.0);
    let is_aligned = score + SCORE_EPSILON >= config.aligned_score;

    // Below the bar with every check passing only happens with custom weights.
    if !is_aligned && reasons.is_empty() {
        reasons.insert(MisalignmentReason::OffCenter);
    }

    let feedback = if is_aligned {
        ALIGNED_FEEDBACK.to_string()
    } else {
        reasons
            .iter()
            .next()
            .map(|reason| reason.feedback().to_string())
            .unwrap_or_default()
    };

    AlignmentVerdict {
        is_aligned,
        score,
        reasons,
        feedback,
    }
}
