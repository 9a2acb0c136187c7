use anyhow::{Context, Result};
use rusqlite::{params, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    helpers::{parse_datetime, parse_weight_unit, to_u32},
    models::CompletedScanRecord,
};

const COMPLETED_SCAN_COLUMNS: &str = "id, user_id, session_id, front_image_url, side_image_url, back_image_url, weight, weight_unit, scan_index, year, month, completed_at";

fn row_to_completed_scan(row: &Row) -> Result<CompletedScanRecord> {
    let weight_unit: String = row.get("weight_unit")?;
    let scan_index: i64 = row.get("scan_index")?;
    let month: i64 = row.get("month")?;
    let completed_at: String = row.get("completed_at")?;

    Ok(CompletedScanRecord {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        session_id: row.get("session_id")?,
        front_image_url: row.get("front_image_url")?,
        side_image_url: row.get("side_image_url")?,
        back_image_url: row.get("back_image_url")?,
        weight: row.get("weight")?,
        weight_unit: parse_weight_unit(&weight_unit)?,
        scan_index: to_u32(scan_index, "scan_index")?,
        year: row.get("year")?,
        month: to_u32(month, "month")?,
        completed_at: parse_datetime(&completed_at, "completed_at")?,
    })
}

impl Database {
    /// Inserts the record, assigning `scan_index` as one past the user's count for that year.
    /// Returns the stored record with the index filled in.
    pub async fn insert_completed_scan(
        &self,
        record: &CompletedScanRecord,
    ) -> Result<CompletedScanRecord> {
        let mut record = record.clone();
        self.execute(move |conn| {
            let tx = conn
                .transaction()
                .context("failed to open completed scan transaction")?;

            let existing: i64 = tx.query_row(
                "SELECT COUNT(*) FROM completed_scans WHERE user_id = ?1 AND year = ?2",
                params![record.user_id, record.year],
                |row| row.get(0),
            )?;
            record.scan_index = to_u32(existing + 1, "scan_index")?;

            tx.execute(
                "INSERT INTO completed_scans (id, user_id, session_id, front_image_url, side_image_url, back_image_url, weight, weight_unit, scan_index, year, month, completed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    record.id,
                    record.user_id,
                    record.session_id,
                    record.front_image_url,
                    record.side_image_url,
                    record.back_image_url,
                    record.weight,
                    record.weight_unit.as_str(),
                    i64::from(record.scan_index),
                    record.year,
                    i64::from(record.month),
                    record.completed_at.to_rfc3339(),
                ],
            )
            .with_context(|| "failed to insert completed scan")?;

            tx.commit().context("failed to commit completed scan")?;
            Ok(record)
        })
        .await
    }

    pub async fn get_completed_scan_for_session(
        &self,
        session_id: &str,
    ) -> Result<Option<CompletedScanRecord>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COMPLETED_SCAN_COLUMNS} FROM completed_scans WHERE session_id = ?1"
            ))?;
            let record = stmt
                .query_row(params![session_id], |row| Ok(row_to_completed_scan(row)))
                .optional()?
                .transpose()?;
            Ok(record)
        })
        .await
    }

    pub async fn list_completed_scans(&self, user_id: &str) -> Result<Vec<CompletedScanRecord>> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COMPLETED_SCAN_COLUMNS} FROM completed_scans
                 WHERE user_id = ?1
                 ORDER BY completed_at DESC"
            ))?;

            let mut rows = stmt.query(params![user_id])?;
            let mut scans = Vec::new();
            while let Some(row) = rows.next()? {
                scans.push(row_to_completed_scan(row)?);
            }
            Ok(scans)
        })
        .await
    }
}
