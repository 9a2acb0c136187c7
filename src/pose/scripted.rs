use std::{
    collections::VecDeque,
    fs,
    path::Path,
    sync::Mutex,
};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;

use super::{DetectedPose, PoseSource};
use crate::camera::Frame;

/// Replays a fixed list of pose estimates, one per call. Once the script runs out the
/// last entry repeats, which keeps a held pose held.
pub struct ScriptedPoseSource {
    script: Mutex<VecDeque<Option<DetectedPose>>>,
    last: Mutex<Option<DetectedPose>>,
}

impl ScriptedPoseSource {
    pub fn new(script: Vec<Option<DetectedPose>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
        }
    }

    /// Loads a JSON array where each entry is a pose object or `null`.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read pose script {}", path.display()))?;
        let script: Vec<Option<DetectedPose>> = serde_json::from_str(&contents)
            .with_context(|| format!("invalid pose script {}", path.display()))?;
        Ok(Self::new(script))
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().map(|guard| guard.len()).unwrap_or(0)
    }
}

#[async_trait]
impl PoseSource for ScriptedPoseSource {
    async fn estimate(&self, _frame: &Frame) -> Result<Option<DetectedPose>> {
        let next = self
            .script
            .lock()
            .map_err(|_| anyhow!("pose script lock poisoned"))?
            .pop_front();

        let mut last = self
            .last
            .lock()
            .map_err(|_| anyhow!("pose script lock poisoned"))?;

        match next {
            Some(entry) => {
                *last = entry.clone();
                Ok(entry)
            }
            None => Ok(last.clone()),
        }
    }
}
