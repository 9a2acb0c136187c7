use std::convert::TryFrom;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};

use crate::models::{ScanStep, WeightUnit};

pub fn to_u32(value: i64, field: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| anyhow!("{field} out of range: {value}"))
}

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

pub fn parse_step(value: &str) -> Result<ScanStep> {
    ScanStep::parse(value).ok_or_else(|| anyhow!("unknown scan type {value}"))
}

pub fn parse_weight_unit(value: &str) -> Result<WeightUnit> {
    WeightUnit::parse(value).ok_or_else(|| anyhow!("unknown weight unit {value}"))
}
