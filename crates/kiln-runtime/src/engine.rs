//! [`OvenEngine`] – the firing state machine and control loop.
//!
//! ```text
//!            run_profile                 schedule elapsed
//!   IDLE ───────────────► RUNNING ─────────────────────────► COMPLETE
//!                          │   ▲  emergency / stall / faults        │
//!                          │   └──────── run_profile ───────────┐   │
//!                          ▼                                    │   ▼
//!                       ABORTED ──────────── stop ───────────► STOPPED
//! ```
//!
//! Every RUNNING tick performs, in this order:
//!
//! 1. read the filtered temperature,
//! 2. charge the energy cost of the previous tick's heat,
//! 3. hold the profile clock if the kiln is too cold (catch-up),
//! 4. recompute elapsed time,
//! 5. look up the target,
//! 6. run the PID,
//! 7. apply heat (this is what paces the loop on real hardware),
//! 8. run the emergency, stall and fault-rate checks,
//! 9. complete the run if the schedule has elapsed.
//!
//! Entering any terminal state forces target and heat to zero and commands
//! the element off.  The engine publishes an [`EngineSnapshot`] into a
//! `tokio::sync::watch` cell after every tick.

use std::sync::Arc;
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::Utc;
use kiln_hal::{Clock, PidController};
use kiln_kernel::{SafetyMonitor, TickObservation, Trip};
use kiln_middleware::OvenWatcher;
use kiln_types::{EngineSnapshot, EngineState, KilnConfig, KilnError, Profile};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::checkpoint::CheckpointStore;
use crate::oven::OvenBackend;
use crate::store::ProfileStore;

/// Orchestrates one oven through a firing.
pub struct OvenEngine {
    config: KilnConfig,
    oven: Box<dyn OvenBackend>,
    clock: Arc<dyn Clock>,
    pid: PidController,
    safety: SafetyMonitor,
    snapshots: Arc<watch::Sender<EngineSnapshot>>,
    checkpoints: Option<CheckpointStore>,
    profiles: Option<Box<dyn ProfileStore>>,
    watcher: Option<Arc<OvenWatcher>>,

    state: EngineState,
    profile: Option<Profile>,
    /// Clock reading, in seconds, that corresponds to elapsed time zero.
    start_time: f64,
    elapsed: f64,
    total_duration: f64,
    temperature: f64,
    target: f64,
    heat: f64,
    cost: f64,
    restart_checked: bool,
}

impl OvenEngine {
    pub fn new(
        config: &KilnConfig,
        oven: Box<dyn OvenBackend>,
        clock: Arc<dyn Clock>,
        snapshots: Arc<watch::Sender<EngineSnapshot>>,
    ) -> Self {
        Self {
            config: config.clone(),
            oven,
            clock,
            pid: PidController::from_config(&config.pid),
            safety: SafetyMonitor::new(&config.safety),
            snapshots,
            checkpoints: None,
            profiles: None,
            watcher: None,
            state: EngineState::Idle,
            profile: None,
            start_time: 0.0,
            elapsed: 0.0,
            total_duration: 0.0,
            temperature: 0.0,
            target: 0.0,
            heat: 0.0,
            cost: 0.0,
            restart_checked: false,
        }
    }

    /// Persist a restart checkpoint every RUNNING tick and on every
    /// terminal transition.
    pub fn with_checkpoints(mut self, store: CheckpointStore) -> Self {
        self.checkpoints = Some(store);
        self
    }

    /// Where automatic restart looks up the interrupted profile.
    pub fn with_profile_store(mut self, store: Box<dyn ProfileStore>) -> Self {
        self.profiles = Some(store);
        self
    }

    /// Keep `watcher`'s profile metadata in sync with the active run.
    pub fn with_watcher(mut self, watcher: Arc<OvenWatcher>) -> Self {
        self.watcher = Some(watcher);
        self
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Value copy of the engine's current state.
    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            cost: self.cost,
            elapsed_seconds: self.elapsed,
            temperature: self.temperature,
            target: self.target,
            state: self.state,
            heat_fraction: self.heat,
            total_duration: self.total_duration,
            profile_name: self.profile.as_ref().map(|p| p.name().to_string()),
            is_simulated: self.oven.is_simulated(),
            pid_stats: self.pid.stats(),
        }
    }

    fn now_secs(&self) -> f64 {
        self.clock.now().as_secs_f64()
    }

    /// Start `profile`, `start_offset` seconds into the schedule.
    ///
    /// Allowed from any state; accounting and controller memory are reset.
    pub fn run_profile(&mut self, profile: Profile, start_offset: f64) {
        let start_offset = start_offset.max(0.0);
        info!(
            profile = profile.name(),
            start_offset,
            duration = profile.duration(),
            "starting run"
        );

        self.pid.reset();
        self.safety.reset();
        self.cost = 0.0;
        self.heat = 0.0;
        self.target = 0.0;
        self.start_time = self.now_secs() - start_offset;
        self.elapsed = start_offset;
        self.total_duration = profile.duration();
        if let Some(watcher) = &self.watcher {
            watcher.set_profile(Some(profile.clone()));
        }
        self.profile = Some(profile);
        self.state = EngineState::Running;
        self.restart_checked = false;
        self.publish();
    }

    /// Stop the current run.  Ignored while IDLE apart from commanding the
    /// element off.
    pub fn stop(&mut self) {
        match self.state {
            EngineState::Idle | EngineState::Stopped => {
                self.command_off();
            }
            _ => {
                info!(from = %self.state, "stop requested");
                self.enter_terminal(EngineState::Stopped);
            }
        }
    }

    /// Leave a terminal state and go back to IDLE.
    pub fn reset(&mut self) {
        if self.state == EngineState::Running {
            self.enter_terminal(EngineState::Stopped);
        }
        if self.state != EngineState::Idle {
            info!(from = %self.state, "engine reset to idle");
        }
        self.state = EngineState::Idle;
        self.profile = None;
        self.elapsed = 0.0;
        self.total_duration = 0.0;
        self.restart_checked = false;
        if let Some(watcher) = &self.watcher {
            watcher.set_profile(None);
        }
        self.publish();
    }

    /// Run one control tick and return how long to wait before the next.
    pub fn tick(&mut self) -> Duration {
        let pause = match self.state {
            EngineState::Running => self.tick_running(),
            EngineState::Idle => {
                self.temperature = self.oven.read_temperature();
                self.try_automatic_restart();
                self.config.timing.idle()
            }
            _ => {
                self.temperature = self.oven.read_temperature();
                self.config.timing.idle()
            }
        };
        self.publish();
        pause
    }

    fn tick_running(&mut self) -> Duration {
        let tick = self.config.timing.tick();

        self.temperature = self.oven.read_temperature();

        if self.heat > 0.0 {
            self.cost += self.config.cost.kwh_rate * self.config.cost.kw_elements * self.heat * tick.as_secs_f64()
                / 3600.0;
        }

        let now = self.clock.now();
        if self.safety.must_catch_up(self.target, self.temperature) {
            // Hold elapsed time where it is.
            self.start_time = now.as_secs_f64() - self.elapsed;
        }
        self.elapsed = now.as_secs_f64() - self.start_time;

        let target = self.profile.as_ref().and_then(|p| p.target_at(self.elapsed));
        self.target = target.unwrap_or(0.0);
        self.heat = match target {
            Some(t) => self.pid.compute(t, self.temperature, now),
            None => 0.0,
        };

        let pause = match self.oven.apply_heat(self.heat, tick) {
            Ok(pause) => pause,
            Err(e) => {
                error!(error = %e, "actuator failure, aborting run");
                self.enter_terminal(EngineState::Aborted);
                return self.config.timing.idle();
            }
        };

        info!(
            temperature = self.temperature,
            target = self.target,
            heat = self.heat,
            elapsed = self.elapsed,
            cost = self.cost,
            "tick"
        );

        let observation = TickObservation {
            now,
            temperature: self.temperature,
            target: self.target,
            heat: self.heat,
            fault_percent: self.oven.fault_percent(),
        };
        if let Some(trip) = self.safety.evaluate(observation) {
            self.abort(trip);
            return pause;
        }

        if self.elapsed > self.total_duration {
            info!(elapsed = self.elapsed, cost = self.cost, "schedule complete");
            self.enter_terminal(EngineState::Complete);
            return pause;
        }

        self.save_checkpoint();
        pause
    }

    fn abort(&mut self, trip: Trip) {
        error!(reason = %trip, "aborting run");
        if trip.requires_kill_switch()
            && let Err(e) = self.oven.kill()
        {
            error!(error = %e, "kill switch failed");
        }
        self.enter_terminal(EngineState::Aborted);
    }

    fn enter_terminal(&mut self, state: EngineState) {
        self.state = state;
        self.target = 0.0;
        self.heat = 0.0;
        self.command_off();
        if state == EngineState::Aborted && self.config.pid.reset_on_abort {
            self.pid.reset();
        }
        self.save_checkpoint();
        self.publish();
    }

    fn command_off(&mut self) {
        if let Err(e) = self.oven.ensure_off() {
            error!(error = %e, "could not command element off");
        }
    }

    fn try_automatic_restart(&mut self) {
        if self.restart_checked || !self.config.restart.automatic_restarts {
            return;
        }
        self.restart_checked = true;

        let Some(store) = &self.checkpoints else {
            return;
        };
        let Some(checkpoint) = store.load_fresh(self.config.restart.window(), Utc::now()) else {
            return;
        };
        let Some(name) = checkpoint.profile.clone() else {
            return;
        };
        let Some(profiles) = &self.profiles else {
            warn!(profile = %name, "no profile store, cannot resume");
            return;
        };
        match profiles.load(&name) {
            Ok(profile) => {
                warn!(profile = %name, runtime = checkpoint.runtime, "resuming interrupted run");
                self.run_profile(profile, checkpoint.runtime);
                self.cost = checkpoint.cost;
                self.publish();
            }
            Err(e) => warn!(profile = %name, error = %e, "cannot resume run"),
        }
    }

    fn save_checkpoint(&self) {
        if let Some(store) = &self.checkpoints
            && let Err(e) = store.save(&self.snapshot())
        {
            warn!(error = %e, "could not write restart checkpoint");
        }
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.snapshot());
    }

    /// Move the engine onto its own thread.
    ///
    /// # Errors
    ///
    /// [`KilnError::Io`] if the thread cannot be spawned.
    pub fn spawn(mut self) -> Result<EngineHandle, KilnError> {
        let (tx, rx) = mpsc::channel();
        let join = std::thread::Builder::new()
            .name("kiln-engine".to_string())
            .spawn(move || {
                info!("oven engine started");
                loop {
                    let pause = self.tick();
                    match rx.recv_timeout(pause) {
                        Ok(EngineCommand::Shutdown) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                        Ok(command) => self.handle(command),
                        Err(mpsc::RecvTimeoutError::Timeout) => {}
                    }
                }
                self.command_off();
                info!(state = %self.state, "oven engine stopped");
            })?;
        Ok(EngineHandle {
            commands: tx,
            join: Some(join),
        })
    }

    fn handle(&mut self, command: EngineCommand) {
        debug!(?command, "engine command");
        match command {
            EngineCommand::Run {
                profile,
                start_offset,
            } => self.run_profile(profile, start_offset),
            EngineCommand::Stop => self.stop(),
            EngineCommand::Reset => self.reset(),
            EngineCommand::Shutdown => {}
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Threaded handle
// ────────────────────────────────────────────────────────────────────────────

/// Commands accepted by a spawned engine.  They take effect at the next tick
/// boundary.
#[derive(Debug, Clone)]
pub enum EngineCommand {
    Run { profile: Profile, start_offset: f64 },
    Stop,
    Reset,
    Shutdown,
}

/// Owner of a running engine thread.  Dropping it shuts the engine down and
/// joins the thread.
pub struct EngineHandle {
    commands: mpsc::Sender<EngineCommand>,
    join: Option<JoinHandle<()>>,
}

impl EngineHandle {
    pub fn send(&self, command: EngineCommand) -> Result<(), KilnError> {
        self.commands
            .send(command)
            .map_err(|_| KilnError::hardware("engine", "engine thread is not running"))
    }

    pub fn run_profile(&self, profile: Profile, start_offset: f64) -> Result<(), KilnError> {
        self.send(EngineCommand::Run {
            profile,
            start_offset,
        })
    }

    pub fn stop(&self) -> Result<(), KilnError> {
        self.send(EngineCommand::Stop)
    }

    pub fn reset(&self) -> Result<(), KilnError> {
        self.send(EngineCommand::Reset)
    }

    /// Stop the engine thread and wait for it to exit.
    pub fn shutdown(mut self) {
        self.join_thread();
    }

    fn join_thread(&mut self) {
        let _ = self.commands.send(EngineCommand::Shutdown);
        if let Some(join) = self.join.take()
            && join.join().is_err()
        {
            error!("engine thread panicked");
        }
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.join_thread();
    }
}
