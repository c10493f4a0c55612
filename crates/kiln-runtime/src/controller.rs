//! [`KilnController`] – owns the shared snapshot cell, the watcher and at
//! most one running engine.
//!
//! The snapshot cell outlives any single engine, so observers keep their
//! subscription when the oven implementation is swapped (for example from
//! the simulator to real hardware).  A swap always shuts down and joins the
//! previous engine thread before the new one starts; two engines never drive
//! the same actuator.

use std::sync::Arc;

use kiln_hal::Clock;
use kiln_middleware::OvenWatcher;
use kiln_types::{EngineSnapshot, KilnConfig, KilnError, Profile};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::checkpoint::CheckpointStore;
use crate::engine::{EngineHandle, OvenEngine};
use crate::oven::OvenBackend;
use crate::store::JsonDirStore;

pub struct KilnController {
    config: KilnConfig,
    snapshots: Arc<watch::Sender<EngineSnapshot>>,
    watcher: Arc<OvenWatcher>,
    engine: Option<EngineHandle>,
}

impl KilnController {
    pub fn new(config: &KilnConfig) -> Self {
        let (tx, rx) = watch::channel(EngineSnapshot::default());
        Self {
            config: config.clone(),
            snapshots: Arc::new(tx),
            watcher: Arc::new(OvenWatcher::new(rx, &config.watcher)),
            engine: None,
        }
    }

    pub fn watcher(&self) -> Arc<OvenWatcher> {
        Arc::clone(&self.watcher)
    }

    /// A receiver of every snapshot published by whichever engine is
    /// active.
    pub fn subscribe(&self) -> watch::Receiver<EngineSnapshot> {
        self.snapshots.subscribe()
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Replace the active oven.
    ///
    /// The previous engine (if any) is stopped, shut down and joined first.
    /// Stopping writes a non-resumable checkpoint, so the new oven never
    /// picks up the old oven's run on its own.
    ///
    /// # Errors
    ///
    /// [`KilnError::Io`] if the engine thread cannot be spawned.
    pub fn swap_oven(&mut self, oven: Box<dyn OvenBackend>, clock: Arc<dyn Clock>) -> Result<(), KilnError> {
        if let Some(previous) = self.engine.take() {
            info!("stopping previous oven engine");
            if let Err(e) = previous.stop() {
                warn!(error = %e, "previous engine did not accept stop");
            }
            previous.shutdown();
        }

        let simulated = oven.is_simulated();
        let mut engine = OvenEngine::new(&self.config, oven, clock, Arc::clone(&self.snapshots))
            .with_watcher(Arc::clone(&self.watcher));
        if self.config.restart.automatic_restarts {
            engine = engine
                .with_checkpoints(CheckpointStore::new(&self.config.restart.state_file))
                .with_profile_store(Box::new(JsonDirStore::new(&self.config.restart.profiles_dir)));
        }
        self.engine = Some(engine.spawn()?);
        info!(simulated, "oven engine attached");
        Ok(())
    }

    fn engine(&self) -> Result<&EngineHandle, KilnError> {
        self.engine
            .as_ref()
            .ok_or_else(|| KilnError::hardware("engine", "no oven attached"))
    }

    /// Start `profile` on the active oven at the next tick boundary.
    pub fn run_profile(&self, profile: Profile, start_offset: f64) -> Result<(), KilnError> {
        self.engine()?.run_profile(profile, start_offset)
    }

    pub fn stop(&self) -> Result<(), KilnError> {
        self.engine()?.stop()
    }

    pub fn reset(&self) -> Result<(), KilnError> {
        self.engine()?.reset()
    }

    /// Shut down the active engine, leaving the element off.
    pub fn shutdown(&mut self) {
        if let Some(engine) = self.engine.take() {
            engine.shutdown();
        }
    }
}

impl Drop for KilnController {
    fn drop(&mut self) {
        self.shutdown();
    }
}
