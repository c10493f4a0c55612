//! Restart checkpoint: the last engine snapshot persisted as JSON so that a
//! firing interrupted by a crash or power loss can be resumed.
//!
//! Writes are whole-file replacements (write to a sibling temp file, then
//! rename), so a reader never sees a half-written checkpoint.  Any problem
//! reading one back (missing, stale, corrupt) just means "do not resume".

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use kiln_types::{EngineSnapshot, EngineState, KilnError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Persisted projection of an [`EngineSnapshot`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestartCheckpoint {
    pub cost: f64,
    pub runtime: f64,
    pub temperature: f64,
    pub target: f64,
    pub state: EngineState,
    pub heat: f64,
    pub total_time: f64,
    pub profile: Option<String>,
    pub is_simulation: bool,
    /// When the checkpoint was written.  Older files without it fall back
    /// to the file's modification time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<DateTime<Utc>>,
}

impl From<&EngineSnapshot> for RestartCheckpoint {
    fn from(s: &EngineSnapshot) -> Self {
        Self {
            cost: s.cost,
            runtime: s.elapsed_seconds,
            temperature: s.temperature,
            target: s.target,
            state: s.state,
            heat: s.heat_fraction,
            total_time: s.total_duration,
            profile: s.profile_name.clone(),
            is_simulation: s.is_simulated,
            saved_at: None,
        }
    }
}

impl RestartCheckpoint {
    /// `true` if this checkpoint describes a run worth resuming.
    pub fn is_resumable(&self) -> bool {
        self.state == EngineState::Running && self.profile.is_some()
    }
}

/// File-backed checkpoint location.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Overwrite the checkpoint with `snapshot`, stamped with the current
    /// time.
    pub fn save(&self, snapshot: &EngineSnapshot) -> Result<(), KilnError> {
        let checkpoint = RestartCheckpoint {
            saved_at: Some(Utc::now()),
            ..RestartCheckpoint::from(snapshot)
        };
        let json = serde_json::to_string(&checkpoint).map_err(|e| KilnError::Serialization(e.to_string()))?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), state = %checkpoint.state, "checkpoint saved");
        Ok(())
    }

    /// Read the checkpoint back.
    ///
    /// # Errors
    ///
    /// [`KilnError::Checkpoint`] if the file is missing or unreadable,
    /// [`KilnError::Serialization`] if it is not a valid checkpoint.
    pub fn load(&self) -> Result<RestartCheckpoint, KilnError> {
        let raw = std::fs::read_to_string(&self.path)
            .map_err(|e| KilnError::Checkpoint(format!("{}: {e}", self.path.display())))?;
        let mut checkpoint: RestartCheckpoint =
            serde_json::from_str(&raw).map_err(|e| KilnError::Serialization(e.to_string()))?;
        if checkpoint.saved_at.is_none() {
            checkpoint.saved_at = std::fs::metadata(&self.path)
                .and_then(|m| m.modified())
                .ok()
                .map(DateTime::<Utc>::from);
        }
        Ok(checkpoint)
    }

    /// Load a checkpoint that is younger than `window` at `now` and records
    /// a resumable run.  Every failure is logged and yields `None`.
    pub fn load_fresh(&self, window: Duration, now: DateTime<Utc>) -> Option<RestartCheckpoint> {
        let checkpoint = match self.load() {
            Ok(c) => c,
            Err(e) => {
                info!(error = %e, "no usable restart checkpoint");
                return None;
            }
        };

        let Some(saved_at) = checkpoint.saved_at else {
            warn!("restart checkpoint has no timestamp");
            return None;
        };
        let age = (now - saved_at).to_std().unwrap_or(Duration::ZERO);
        if age > window {
            info!(age_secs = age.as_secs(), "restart checkpoint is stale");
            return None;
        }
        if !checkpoint.is_resumable() {
            debug!(state = %checkpoint.state, "last run is not resumable");
            return None;
        }
        Some(checkpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn running_snapshot() -> EngineSnapshot {
        EngineSnapshot {
            cost: 1.25,
            elapsed_seconds: 1800.0,
            temperature: 900.0,
            target: 910.0,
            state: EngineState::Running,
            heat_fraction: 0.4,
            total_duration: 3600.0,
            profile_name: Some("cone-6".into()),
            is_simulated: true,
            ..EngineSnapshot::default()
        }
    }

    #[test]
    fn save_then_resume_reproduces_run() -> Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;
        let store = CheckpointStore::new(dir.path().join("state.json"));
        store.save(&running_snapshot())?;

        let cp = store
            .load_fresh(Duration::from_secs(300), Utc::now())
            .ok_or("checkpoint should be fresh")?;
        assert_eq!(cp.state, EngineState::Running);
        assert_eq!(cp.profile.as_deref(), Some("cone-6"));
        assert_eq!(cp.runtime, 1800.0);
        assert_eq!(cp.cost, 1.25);
        Ok(())
    }

    #[test]
    fn wire_layout_uses_short_field_names() -> Result<(), Box<dyn std::error::Error>> {
        let value = serde_json::to_value(RestartCheckpoint::from(&running_snapshot()))?;
        for key in [
            "cost",
            "runtime",
            "temperature",
            "target",
            "state",
            "heat",
            "total_time",
            "profile",
            "is_simulation",
        ] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
        assert_eq!(value["state"], "RUNNING");
        Ok(())
    }

    #[test]
    fn stale_checkpoint_is_ignored() -> Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;
        let store = CheckpointStore::new(dir.path().join("state.json"));
        store.save(&running_snapshot())?;

        let later = Utc::now() + chrono::Duration::minutes(10);
        assert!(store.load_fresh(Duration::from_secs(300), later).is_none());
        Ok(())
    }

    #[test]
    fn finished_run_is_not_resumed() -> Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;
        let store = CheckpointStore::new(dir.path().join("state.json"));
        store.save(&EngineSnapshot {
            state: EngineState::Complete,
            ..running_snapshot()
        })?;
        assert!(store.load_fresh(Duration::from_secs(300), Utc::now()).is_none());
        Ok(())
    }

    #[test]
    fn missing_or_corrupt_checkpoint_is_skipped() -> Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;
        let store = CheckpointStore::new(dir.path().join("state.json"));
        assert!(store.load_fresh(Duration::from_secs(300), Utc::now()).is_none());

        std::fs::write(store.path(), "{not json")?;
        assert!(matches!(store.load(), Err(KilnError::Serialization(_))));
        assert!(store.load_fresh(Duration::from_secs(300), Utc::now()).is_none());
        Ok(())
    }

    #[test]
    fn legacy_checkpoint_uses_file_mtime() -> Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;
        let store = CheckpointStore::new(dir.path().join("state.json"));
        std::fs::write(
            store.path(),
            r#"{"cost":0.5,"runtime":60,"temperature":200,"target":210,"state":"RUNNING",
               "heat":1.0,"total_time":600,"profile":"test","is_simulation":false}"#,
        )?;
        let cp = store
            .load_fresh(Duration::from_secs(300), Utc::now())
            .ok_or("legacy checkpoint should load")?;
        assert!(cp.saved_at.is_some());
        assert_eq!(cp.runtime, 60.0);
        Ok(())
    }
}
