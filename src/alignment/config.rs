use serde::{Deserialize, Serialize};

/// Thresholds and weights for pose alignment scoring, in pixels of the analysed frame.
///
/// These values set how strict the scan feels; loosening them raises false accepts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct AlignmentConfig {
    /// A keypoint counts as visible above this confidence.
    pub confidence_threshold: f32,
    /// Minimum visible landmarks (out of 17) before any geometry is checked.
    pub min_visible_keypoints: usize,
    /// Score needed for a step to count as aligned.
    pub aligned_score: f32,

    /// Side: max |left.x - right.x| for shoulders and hips when in profile.
    pub profile_pair_tolerance_px: f32,
    /// Side: max horizontal eye separation when the head is in profile.
    pub profile_eye_tolerance_px: f32,
    pub weight_profile_body: f32,
    pub weight_profile_head: f32,

    /// Front/back: max vertical difference across a shoulder or hip pair.
    pub level_tolerance_px: f32,
    /// Front/back: max horizontal offset between shoulder centre and hip centre.
    pub center_tolerance_px: f32,
    pub weight_shoulders_level: f32,
    pub weight_hips_level: f32,
    pub weight_upright: f32,
    pub weight_centered: f32,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.3,
            min_visible_keypoints: 8,
            aligned_score: 0.8,
            profile_pair_tolerance_px: 50.0,
            profile_eye_tolerance_px: 30.0,
            weight_profile_body: 0.8,
            weight_profile_head: 0.2,
            level_tolerance_px: 30.0,
            center_tolerance_px: 20.0,
            weight_shoulders_level: 0.3,
            weight_hips_level: 0.3,
            weight_upright: 0.2,
            weight_centered: 0.2,
        }
    }
}
