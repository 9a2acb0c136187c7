use std::io::Cursor;

use anyhow::{bail, Context, Result};
use image::{codecs::jpeg::JpegEncoder, ImageFormat, RgbImage};

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100));
    encoder
        .encode_image(image)
        .context("failed to encode frame as JPEG")?;
    Ok(buffer)
}

/// Formats accepted from the manual upload path.
pub fn sniff_upload_format(bytes: &[u8]) -> Result<ImageFormat> {
    let format = image::guess_format(bytes).context("unrecognised image data")?;
    match format {
        ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::WebP => Ok(format),
        other => bail!("unsupported image format {other:?}; use JPEG, PNG or WebP"),
    }
}

pub fn decode_rgb(bytes: &[u8], format: ImageFormat) -> Result<RgbImage> {
    let image = image::load(Cursor::new(bytes), format).context("failed to decode image")?;
    Ok(image.to_rgb8())
}
