pub mod synthetic;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::{Deserialize, Serialize};

pub use synthetic::SyntheticCameraFactory;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum CameraMode {
    /// Rear camera, someone else holds the phone.
    Environment,
    /// Front camera, selfie-style.
    User,
}

impl Default for CameraMode {
    fn default() -> Self {
        CameraMode::Environment
    }
}

impl CameraMode {
    pub fn toggled(self) -> Self {
        match self {
            CameraMode::Environment => CameraMode::User,
            CameraMode::User => CameraMode::Environment,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CameraMode::Environment => "environment",
            CameraMode::User => "user",
        }
    }
}

/// A single still pulled from the video device.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: Arc<RgbImage>,
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn new(image: RgbImage) -> Self {
        Self {
            image: Arc::new(image),
            captured_at: Utc::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

#[async_trait]
pub trait CameraDevice: Send {
    async fn grab(&mut self) -> Result<Frame>;
}

/// Opens a device for a facing mode. Switching modes goes through a fresh `open`.
#[async_trait]
pub trait CameraFactory: Send + Sync {
    async fn open(&self, mode: CameraMode) -> Result<Box<dyn CameraDevice>>;
}

/// The session's exclusively owned video handle.
pub struct CameraHandle {
    device: Box<dyn CameraDevice>,
}

impl CameraHandle {
    pub async fn open(factory: &dyn CameraFactory, mode: CameraMode) -> Result<Self> {
        let device = factory.open(mode).await?;
        Ok(Self { device })
    }

    pub async fn grab(&mut self) -> Result<Frame> {
        self.device.grab().await
    }
}
