pub mod encoding;
pub mod local;
pub mod upload;

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alignment::MisalignmentReason;
use crate::camera::CameraMode;
use crate::capture::CapturedImage;
use crate::models::{ScanStep, Weight};

pub use local::LocalScanStore;

/// Where a persisted still ended up.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PersistedScan {
    pub record_id: String,
    pub url: String,
    pub step: ScanStep,
    pub alignment_score: f32,
    pub captured_at: DateTime<Utc>,
}

/// JSON stored next to each still.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PoseMetadata {
    pub shoulders_level: bool,
    pub hips_level: bool,
    /// Percent, rounded.
    pub alignment_score: u8,
    pub pose_confidence: f32,
    pub detected_keypoints: usize,
    pub misaligned_reasons: Vec<MisalignmentReason>,
    pub camera_mode: CameraMode,
    pub capture_timestamp: DateTime<Utc>,
    pub source: String,
}

impl PoseMetadata {
    pub fn from_capture(image: &CapturedImage, camera_mode: CameraMode) -> Self {
        let reasons: Vec<MisalignmentReason> = image
            .verdict
            .as_ref()
            .map(|verdict| verdict.reasons.iter().copied().collect())
            .unwrap_or_default();
        let score = image
            .verdict
            .as_ref()
            .map(|verdict| verdict.score)
            .unwrap_or(0.0);

        Self {
            shoulders_level: !reasons.contains(&MisalignmentReason::UnevenShoulders),
            hips_level: !reasons.contains(&MisalignmentReason::UnevenHips),
            alignment_score: (score.clamp(0.0, 1.0) * 100.0).round() as u8,
            pose_confidence: image.pose_confidence,
            detected_keypoints: image.detected_keypoints,
            misaligned_reasons: reasons,
            camera_mode,
            capture_timestamp: image.captured_at,
            source: image.source.as_str().to_string(),
        }
    }
}

/// Everything needed to close out a session once the weight is known.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub session_id: String,
    pub scans: BTreeMap<ScanStep, PersistedScan>,
    pub weight: Weight,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompletedScan {
    pub record_id: String,
    pub scan_index: u32,
    pub year: i32,
    pub month: u32,
}

/// Remote storage and record service. One call, two outcomes; retries belong to the caller.
#[async_trait]
pub trait ScanStore: Send + Sync {
    async fn persist(
        &self,
        session_id: &str,
        step: ScanStep,
        image: &CapturedImage,
        metadata: &PoseMetadata,
    ) -> Result<PersistedScan>;

    async fn finalize(&self, summary: &SessionSummary) -> Result<CompletedScan>;
}
