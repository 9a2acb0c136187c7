use anyhow::{Context, Result};
use rusqlite::{params, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    helpers::{parse_datetime, parse_step},
    models::BodyScanRecord,
};

const BODY_SCAN_COLUMNS: &str = "id, user_id, session_id, type, image_url, storage_path, pose_score, pose_metadata, captured_at, created_at";

fn row_to_body_scan(row: &Row) -> Result<BodyScanRecord> {
    let step: String = row.get("type")?;
    let pose_metadata: String = row.get("pose_metadata")?;
    let pose_score: f64 = row.get("pose_score")?;
    let captured_at: String = row.get("captured_at")?;
    let created_at: String = row.get("created_at")?;

    Ok(BodyScanRecord {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        session_id: row.get("session_id")?,
        step: parse_step(&step)?,
        image_url: row.get("image_url")?,
        storage_path: row.get("storage_path")?,
        pose_score: pose_score as f32,
        pose_metadata: serde_json::from_str(&pose_metadata)
            .context("failed to parse pose_metadata")?,
        captured_at: parse_datetime(&captured_at, "captured_at")?,
        created_at: parse_datetime(&created_at, "created_at")?,
    })
}

impl Database {
    pub async fn insert_body_scan(&self, record: &BodyScanRecord) -> Result<()> {
        let record = record.clone();
        self.execute(move |conn| {
            let metadata = serde_json::to_string(&record.pose_metadata)
                .context("failed to serialize pose metadata")?;
            conn.execute(
                "INSERT INTO body_scans (id, user_id, session_id, type, image_url, storage_path, pose_score, pose_metadata, captured_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    record.id,
                    record.user_id,
                    record.session_id,
                    record.step.as_str(),
                    record.image_url,
                    record.storage_path,
                    f64::from(record.pose_score),
                    metadata,
                    record.captured_at.to_rfc3339(),
                    record.created_at.to_rfc3339(),
                ],
            )
            .with_context(|| "failed to insert body scan")?;
            Ok(())
        })
        .await
    }

    pub async fn get_body_scans_for_session(&self, session_id: &str) -> Result<Vec<BodyScanRecord>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {BODY_SCAN_COLUMNS} FROM body_scans
                 WHERE session_id = ?1
                 ORDER BY created_at ASC"
            ))?;

            let mut rows = stmt.query(params![session_id])?;
            let mut scans = Vec::new();
            while let Some(row) = rows.next()? {
                scans.push(row_to_body_scan(row)?);
            }
            Ok(scans)
        })
        .await
    }

    pub async fn get_body_scan(&self, id: &str) -> Result<Option<BodyScanRecord>> {
        let id = id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {BODY_SCAN_COLUMNS} FROM body_scans WHERE id = ?1"
            ))?;
            let record = stmt
                .query_row(params![id], |row| Ok(row_to_body_scan(row)))
                .optional()?
                .transpose()?;
            Ok(record)
        })
        .await
    }
}
