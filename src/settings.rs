use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, sync::RwLock, time::Duration};

use crate::alignment::AlignmentConfig;
use crate::camera::CameraMode;
use crate::capture::{CaptureCue, CaptureTimeline};
use crate::models::WeightUnit;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct CueOffsets {
    pub clear_overlay_ms: u64,
    pub flash_start_ms: u64,
    pub flash_end_ms: u64,
    pub grab_frame_ms: u64,
    pub release_lock_ms: u64,
}

impl Default for CueOffsets {
    fn default() -> Self {
        Self {
            clear_overlay_ms: 100,
            flash_start_ms: 200,
            flash_end_ms: 350,
            grab_frame_ms: 450,
            release_lock_ms: 700,
        }
    }
}

impl CueOffsets {
    pub fn timeline(&self) -> CaptureTimeline {
        CaptureTimeline::new(vec![
            (CaptureCue::ClearOverlay, Duration::from_millis(self.clear_overlay_ms)),
            (CaptureCue::FlashStart, Duration::from_millis(self.flash_start_ms)),
            (CaptureCue::FlashEnd, Duration::from_millis(self.flash_end_ms)),
            (CaptureCue::GrabFrame, Duration::from_millis(self.grab_frame_ms)),
            (CaptureCue::ReleaseLock, Duration::from_millis(self.release_lock_ms)),
        ])
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct CaptureConfig {
    /// Consecutive aligned frames needed before the countdown starts.
    pub required_frames: u32,
    pub countdown_secs: u8,
    pub cue_offsets: CueOffsets,
    /// Re-check alignment on each countdown second and abort on drift.
    pub abort_countdown_on_misalignment: bool,
    /// Move to the next step as soon as a capture is persisted.
    pub auto_advance: bool,
    pub jpeg_quality: u8,
    pub shutter_sound: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            required_frames: 5,
            countdown_secs: 3,
            cue_offsets: CueOffsets::default(),
            abort_countdown_on_misalignment: false,
            auto_advance: false,
            jpeg_quality: 80,
            shutter_sound: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct SamplingConfig {
    /// Upper bound on pose estimates per second.
    pub max_fps: u32,
    /// A pose estimate slower than this counts as no pose.
    pub pose_timeout_ms: u64,
    pub verbose: bool,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            max_fps: 15,
            pose_timeout_ms: 2_000,
            verbose: false,
        }
    }
}

impl SamplingConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(1_000 / u64::from(self.max_fps.max(1)))
    }

    pub fn pose_timeout(&self) -> Duration {
        Duration::from_millis(self.pose_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct StorageConfig {
    pub user_id: String,
    pub bucket: String,
    pub public_base_url: String,
    pub max_upload_bytes: u64,
    pub warn_upload_bytes: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            user_id: "local-user".into(),
            bucket: "body-scans".into(),
            public_base_url: "file://".into(),
            max_upload_bytes: 10 * 1024 * 1024,
            warn_upload_bytes: 5 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ScanConfig {
    pub alignment: AlignmentConfig,
    pub capture: CaptureConfig,
    pub sampling: SamplingConfig,
    pub storage: StorageConfig,
    pub camera_mode: CameraMode,
    pub weight_unit: WeightUnit,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            alignment: AlignmentConfig::default(),
            capture: CaptureConfig::default(),
            sampling: SamplingConfig::default(),
            storage: StorageConfig::default(),
            camera_mode: CameraMode::default(),
            weight_unit: WeightUnit::default(),
        }
    }
}

impl ScanConfig {
    /// Applies environment overrides on top of the stored values.
    pub fn with_env_overrides(mut self) -> Self {
        let debug_mode = std::env::var("BODYSCAN_DEBUG")
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if debug_mode {
            self.sampling.verbose = true;
        }
        if let Ok(user_id) = std::env::var("BODYSCAN_USER_ID") {
            if !user_id.trim().is_empty() {
                self.storage.user_id = user_id;
            }
        }
        self
    }
}

/// JSON-backed settings file. A missing or unreadable file falls back to defaults.
pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<ScanConfig>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                log::warn!("Ignoring malformed settings at {}: {err}", path.display());
                ScanConfig::default()
            })
        } else {
            ScanConfig::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn config(&self) -> Result<ScanConfig> {
        self.data
            .read()
            .map(|guard| guard.clone())
            .map_err(|_| anyhow!("settings lock poisoned"))
    }

    pub fn update<F>(&self, apply: F) -> Result<ScanConfig>
    where
        F: FnOnce(&mut ScanConfig),
    {
        let mut guard = self
            .data
            .write()
            .map_err(|_| anyhow!("settings lock poisoned"))?;
        apply(&mut guard);
        self.persist(&guard)?;
        Ok(guard.clone())
    }

    pub fn set_camera_mode(&self, mode: CameraMode) -> Result<()> {
        self.update(|config| config.camera_mode = mode).map(|_| ())
    }

    pub fn set_weight_unit(&self, unit: WeightUnit) -> Result<()> {
        self.update(|config| config.weight_unit = unit).map(|_| ())
    }

    fn persist(&self, data: &ScanConfig) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}
