use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{Datelike, Utc};
use log::{info, warn};
use uuid::Uuid;

use super::{CompletedScan, PersistedScan, PoseMetadata, ScanStore, SessionSummary};
use crate::capture::CapturedImage;
use crate::db::{BodyScanRecord, CompletedScanRecord, Database};
use crate::models::ScanStep;
use crate::settings::StorageConfig;

/// Bucket directory on disk plus SQLite records.
#[derive(Clone)]
pub struct LocalScanStore {
    db: Database,
    bucket_root: PathBuf,
    config: StorageConfig,
}

impl LocalScanStore {
    pub fn new(db: Database, data_dir: &Path, config: StorageConfig) -> Result<Self> {
        let bucket_root = data_dir.join(&config.bucket);
        std::fs::create_dir_all(&bucket_root).with_context(|| {
            format!("failed to create bucket directory {}", bucket_root.display())
        })?;
        Ok(Self {
            db,
            bucket_root,
            config,
        })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn bucket_root(&self) -> &Path {
        &self.bucket_root
    }

    fn public_url(&self, relative: &str) -> String {
        let base = self.config.public_base_url.trim_end_matches('/');
        if base.is_empty() || base == "file:" || base == "file://" {
            format!("file://{}", self.bucket_root.join(relative).display())
        } else {
            format!("{base}/{}/{relative}", self.config.bucket)
        }
    }
}

#[async_trait]
impl ScanStore for LocalScanStore {
    async fn persist(
        &self,
        session_id: &str,
        step: ScanStep,
        image: &CapturedImage,
        metadata: &PoseMetadata,
    ) -> Result<PersistedScan> {
        let relative = format!(
            "{}/{}-{}.jpg",
            self.config.user_id,
            step.as_str(),
            image.captured_at.timestamp_millis()
        );
        let absolute = self.bucket_root.join(&relative);
        if let Some(parent) = absolute.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        tokio::fs::write(&absolute, image.jpeg.as_slice())
            .await
            .with_context(|| format!("failed to upload {}", absolute.display()))?;

        let url = self.public_url(&relative);
        let score = image
            .verdict
            .as_ref()
            .map(|verdict| verdict.score)
            .unwrap_or(0.0);
        let record = BodyScanRecord {
            id: Uuid::new_v4().to_string(),
            user_id: self.config.user_id.clone(),
            session_id: session_id.to_string(),
            step,
            image_url: url.clone(),
            storage_path: relative,
            pose_score: score,
            pose_metadata: serde_json::to_value(metadata)
                .context("failed to serialize pose metadata")?,
            captured_at: image.captured_at,
            created_at: Utc::now(),
        };

        if let Err(err) = self.db.insert_body_scan(&record).await {
            if let Err(cleanup) = tokio::fs::remove_file(&absolute).await {
                warn!("Failed to remove orphaned upload {}: {cleanup}", absolute.display());
            }
            return Err(err);
        }

        info!(
            "Saved {} scan for session {} ({} bytes) at {}",
            step.as_str(),
            session_id,
            image.jpeg.len(),
            url
        );

        Ok(PersistedScan {
            record_id: record.id,
            url,
            step,
            alignment_score: score,
            captured_at: image.captured_at,
        })
    }

    async fn finalize(&self, summary: &SessionSummary) -> Result<CompletedScan> {
        let url_for = |step: ScanStep| {
            summary
                .scans
                .get(&step)
                .map(|scan| scan.url.clone())
                .ok_or_else(|| anyhow!("session {} has no {} scan", summary.session_id, step.as_str()))
        };

        let record = CompletedScanRecord {
            id: Uuid::new_v4().to_string(),
            user_id: self.config.user_id.clone(),
            session_id: summary.session_id.clone(),
            front_image_url: url_for(ScanStep::Front)?,
            side_image_url: url_for(ScanStep::Side)?,
            back_image_url: url_for(ScanStep::Back)?,
            weight: summary.weight.value,
            weight_unit: summary.weight.unit,
            scan_index: 0,
            year: summary.completed_at.year(),
            month: summary.completed_at.month(),
            completed_at: summary.completed_at,
        };

        let stored = self.db.insert_completed_scan(&record).await?;
        info!(
            "Completed scan {} for session {} (#{} of {})",
            stored.id, stored.session_id, stored.scan_index, stored.year
        );

        Ok(CompletedScan {
            record_id: stored.id,
            scan_index: stored.scan_index,
            year: stored.year,
            month: stored.month,
        })
    }
}
