//! A finished three-view scan with the weight entered at the end.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::WeightUnit;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompletedScanRecord {
    pub id: String,
    pub user_id: String,
    pub session_id: String,
    pub front_image_url: String,
    pub side_image_url: String,
    pub back_image_url: String,
    pub weight: f64,
    pub weight_unit: WeightUnit,
    /// 1-based position of this scan among the user's scans in `year`.
    pub scan_index: u32,
    pub year: i32,
    pub month: u32,
    pub completed_at: DateTime<Utc>,
}
