//! Durable progress marker written after every batch.
//!
//! The checkpoint is written only after the batch's records and failures
//! have been flushed, so everything it counts is already on disk. A resumed
//! run skips `completed_items` valid items and continues numbering batches
//! from `completed_batches + 1`.

use crate::error::HarvestError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointState {
    pub completed_batches: usize,
    pub completed_items: usize,
    /// Number of invalid-input failures already written to the failure sink.
    pub invalid_recorded: usize,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CheckpointFile {
    path: PathBuf,
}

impl CheckpointFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Checkpoint path that sits next to an output file: `out.csv` → `out.csv.checkpoint.json`.
    pub fn beside(output: &Path) -> Self {
        let mut name = output.as_os_str().to_os_string();
        name.push(".checkpoint.json");
        Self::new(name)
    }

    #[cfg(test)]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `None` when no checkpoint has been written yet.
    pub fn load(&self) -> Result<Option<CheckpointState>, HarvestError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&self.path)?;
        let state: CheckpointState = serde_json::from_str(&text)?;
        info!(
            path = %self.path.display(),
            completed_batches = state.completed_batches,
            completed_items = state.completed_items,
            "Loaded checkpoint"
        );
        Ok(Some(state))
    }

    /// Write via a temp file and rename so a crash never leaves half a checkpoint.
    pub fn save(&self, state: &CheckpointState) -> Result<(), HarvestError> {
        let mut state = state.clone();
        state.updated_at = Some(chrono::Utc::now().to_rfc3339());

        let mut tmp = self.path.as_os_str().to_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, serde_json::to_vec_pretty(&state)?)?;
        fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), batches = state.completed_batches, "Checkpoint saved");
        Ok(())
    }

    pub fn clear(&self) -> Result<(), HarvestError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_checkpoint_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let cp = CheckpointFile::new(dir.path().join("cp.json"));
        assert_eq!(cp.load().unwrap(), None);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let cp = CheckpointFile::beside(&dir.path().join("out.csv"));
        assert!(cp.path().ends_with("out.csv.checkpoint.json"));

        let state = CheckpointState {
            completed_batches: 2,
            completed_items: 40,
            invalid_recorded: 1,
            updated_at: None,
        };
        cp.save(&state).unwrap();
        let loaded = cp.load().unwrap().unwrap();
        assert_eq!(loaded.completed_batches, 2);
        assert_eq!(loaded.completed_items, 40);
        assert!(loaded.updated_at.is_some());

        cp.clear().unwrap();
        assert_eq!(cp.load().unwrap(), None);
        cp.clear().unwrap();
    }
}
