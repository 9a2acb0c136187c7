use anyhow::Result;
use async_trait::async_trait;
use image::{Rgb, RgbImage};

use super::{CameraDevice, CameraFactory, CameraMode, Frame};

/// Produces flat grey frames at a fixed resolution. Used by the demo runner where the
/// pose script, not the pixels, decides what the analyzer sees.
pub struct SyntheticCameraFactory {
    width: u32,
    height: u32,
}

impl SyntheticCameraFactory {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for SyntheticCameraFactory {
    fn default() -> Self {
        Self::new(720, 1280)
    }
}

#[async_trait]
impl CameraFactory for SyntheticCameraFactory {
    async fn open(&self, mode: CameraMode) -> Result<Box<dyn CameraDevice>> {
        log::info!(
            "Opening synthetic {}x{} camera ({})",
            self.width,
            self.height,
            mode.as_str()
        );
        Ok(Box::new(SyntheticCamera {
            width: self.width,
            height: self.height,
            shade: match mode {
                CameraMode::Environment => 96,
                CameraMode::User => 160,
            },
        }))
    }
}

struct SyntheticCamera {
    width: u32,
    height: u32,
    shade: u8,
}

#[async_trait]
impl CameraDevice for SyntheticCamera {
    async fn grab(&mut self) -> Result<Frame> {
        let shade = self.shade;
        Ok(Frame::new(RgbImage::from_pixel(
            self.width,
            self.height,
            Rgb([shade, shade, shade]),
        )))
    }
}
