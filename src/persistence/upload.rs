use anyhow::{bail, Result};
use image::ImageFormat;

use super::encoding::sniff_upload_format;
use crate::settings::StorageConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct UploadCheck {
    pub format: ImageFormat,
    /// Set when the file is accepted but large enough to be slow to upload.
    pub warning: Option<String>,
}

/// Checks a manually chosen image before it replaces a camera capture.
pub fn validate_upload(bytes: &[u8], config: &StorageConfig) -> Result<UploadCheck> {
    if bytes.is_empty() {
        bail!("the selected file is empty");
    }

    let size = bytes.len() as u64;
    if size > config.max_upload_bytes {
        bail!(
            "file is {:.1} MB; the limit is {:.1} MB",
            megabytes(size),
            megabytes(config.max_upload_bytes)
        );
    }

    let format = sniff_upload_format(bytes)?;
    let warning = (size > config.warn_upload_bytes).then(|| {
        format!(
            "Large file ({:.1} MB) may take a while to upload",
            megabytes(size)
        )
    });

    Ok(UploadCheck { format, warning })
}

fn megabytes(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}
