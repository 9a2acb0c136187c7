#[macro_use]
mod utils;

pub mod alignment;
pub mod audio;
pub mod camera;
pub mod capture;
pub mod db;
pub mod error;
pub mod events;
pub mod models;
pub mod persistence;
pub mod pose;
pub mod settings;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use log::{error, info, warn};
use tokio::sync::broadcast::{error::RecvError, Receiver};
use tokio::time::Duration;

pub use capture::{ScanController, ScanSnapshot};
pub use error::{ScanError, ScanResult};
pub use events::{EventBus, ScanEvent};
pub use models::{ScanStep, SessionStatus, Weight, WeightUnit};
pub use settings::{ScanConfig, SettingsStore};

use camera::SyntheticCameraFactory;
use capture::StepFailure;
use db::Database;
use persistence::LocalScanStore;
use pose::ScriptedPoseSource;

const DEFAULT_DATA_DIR: &str = "bodyscan-data";
const DEFAULT_WEIGHT: f64 = 170.0;
const SESSION_DEADLINE: Duration = Duration::from_secs(120);
const MAX_SAVE_RETRIES: u32 = 3;

/// Demo runner: replays a JSON pose script through a synthetic camera into a local store.
///
/// Usage: `bodyscan <pose-script.json> [data-dir]`. `BODYSCAN_WEIGHT` (e.g. `72.5kg`) sets the
/// weight submitted at the end.
pub fn run() -> Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let mut args = std::env::args().skip(1);
    let script = args
        .next()
        .map(PathBuf::from)
        .ok_or_else(|| anyhow!("usage: bodyscan <pose-script.json> [data-dir]"))?;
    let data_dir = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));

    info!("bodyscan starting up...");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    runtime.block_on(run_session(&script, &data_dir))
}

async fn run_session(script: &Path, data_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create {}", data_dir.display()))?;

    let settings = SettingsStore::new(data_dir.join("settings.json"))?;
    let (weight_value, weight_unit) = match std::env::var("BODYSCAN_WEIGHT") {
        Ok(raw) => {
            let (value, unit) = parse_weight(&raw)?;
            if let Some(unit) = unit {
                settings.set_weight_unit(unit)?;
            }
            (value, unit)
        }
        Err(_) => (DEFAULT_WEIGHT, None),
    };
    let config = settings.config()?.with_env_overrides();
    let weight_unit = weight_unit.unwrap_or(config.weight_unit);

    let database = Database::new(data_dir.join("bodyscan.sqlite3"))?;
    let user_id = config.storage.user_id.clone();
    let store = LocalScanStore::new(database.clone(), data_dir, config.storage.clone())?;
    let poses = ScriptedPoseSource::from_json_file(script)?;
    info!("Loaded {} scripted poses from {}", poses.remaining(), script.display());

    let auto_advance = config.capture.auto_advance;
    let controller = ScanController::new(
        config,
        Arc::new(poses),
        Arc::new(SyntheticCameraFactory::default()),
        Arc::new(store),
    );

    let mut events = controller.events().subscribe();
    controller.start().await?;

    let drive = drive_session(
        &controller,
        &settings,
        &mut events,
        auto_advance,
        weight_value,
        weight_unit,
    );
    let outcome = match tokio::time::timeout(SESSION_DEADLINE, drive).await {
        Ok(outcome) => outcome,
        Err(_) => Err(anyhow!(
            "scan did not finish within {}s; is the pose script aligned?",
            SESSION_DEADLINE.as_secs()
        )),
    };

    if let Err(err) = &outcome {
        error!("{err:#}");
        controller.exit().await?;
        return outcome;
    }

    let history = database.list_completed_scans(&user_id).await?;
    info!("{} completed scans on record for {}", history.len(), user_id);
    outcome
}

/// Reacts to events until the session completes: advance, retry failed saves, submit weight.
/// A camera switch is remembered for the next run.
async fn drive_session(
    controller: &ScanController,
    settings: &SettingsStore,
    events: &mut Receiver<ScanEvent>,
    auto_advance: bool,
    weight_value: f64,
    weight_unit: WeightUnit,
) -> Result<()> {
    let mut retries = 0;
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!("Dropped {skipped} scan events");
                continue;
            }
            Err(RecvError::Closed) => return Err(anyhow!("event stream closed")),
        };

        match &event {
            ScanEvent::Alignment { .. } | ScanEvent::CaptureCue { .. } => {}
            other => info!("event: {}", serde_json::to_string(other)?),
        }

        match event {
            ScanEvent::StepSucceeded { .. } if !auto_advance => {
                controller.advance().await?;
            }
            ScanEvent::StepFailed {
                reason: StepFailure::PersistenceFailed { message },
                ..
            } => {
                retries += 1;
                if retries > MAX_SAVE_RETRIES {
                    return Err(anyhow!(
                        "giving up after {MAX_SAVE_RETRIES} retries: {message}"
                    ));
                }
                warn!("Save failed ({message}); retrying");
                if let Err(err) = controller.retry_save().await {
                    warn!("Retry failed: {err}");
                }
            }
            ScanEvent::AwaitingWeight => {
                let completed = controller.submit_weight(weight_value, weight_unit).await?;
                info!(
                    "Body scan #{} for {} saved ({} {})",
                    completed.scan_index,
                    completed.year,
                    weight_value,
                    weight_unit.as_str()
                );
            }
            ScanEvent::CameraSwitched { mode } => settings.set_camera_mode(mode)?,
            ScanEvent::SessionCompleted { .. } => return Ok(()),
            ScanEvent::SessionFaulted { message } => {
                return Err(anyhow!("scan session faulted: {message}"))
            }
            _ => {}
        }
    }
}

/// `"72.5kg"`, `"160 lbs"` or a bare number.
fn parse_weight(raw: &str) -> Result<(f64, Option<WeightUnit>)> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(raw.len());
    let (number, unit) = raw.split_at(split);
    let value: f64 = number
        .trim()
        .parse()
        .with_context(|| format!("invalid weight {raw:?}"))?;
    let unit = match unit.trim() {
        "" => None,
        other => Some(
            WeightUnit::parse(other).ok_or_else(|| anyhow!("unknown weight unit {other:?}"))?,
        ),
    };
    Ok((value, unit))
}
