//! One persisted still from a single scan step.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::ScanStep;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BodyScanRecord {
    pub id: String,
    pub user_id: String,
    pub session_id: String,
    pub step: ScanStep,
    pub image_url: String,
    /// Path relative to the bucket root.
    pub storage_path: String,
    pub pose_score: f32,
    pub pose_metadata: serde_json::Value,
    pub captured_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}
