//! [`OvenBackend`] – the capability the engine drives, with a simulated and a
//! hardware implementation.
//!
//! The engine's control logic is written once against this trait.  A backend
//! knows how to report the chamber temperature, how to hold the element on
//! for part of a tick, and how to cut power.

use std::sync::Arc;
use std::time::Duration;

use kiln_hal::sim::ThermalModel;
use kiln_hal::{Clock, HeatOutput, KillSwitch, ManualClock, MonotonicClock, Thermocouple};
use kiln_perception::{AcquisitionHandle, Reading, spawn_acquisition};
use kiln_types::{KilnConfig, KilnError, SimulationConfig};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// One kiln the engine can fire.
pub trait OvenBackend: Send {
    fn is_simulated(&self) -> bool;

    /// Filtered chamber temperature.  `0.0` when no good reading exists.
    fn read_temperature(&mut self) -> f64;

    /// Bad-sample percentage over the last acquisition period.
    fn fault_percent(&self) -> f64 {
        0.0
    }

    /// Hold the element on for `fraction` of `tick` and off for the rest.
    ///
    /// Returns how long the engine still has to wait before the next tick:
    /// zero when this call already blocked for the whole tick.
    fn apply_heat(&mut self, fraction: f64, tick: Duration) -> Result<Duration, KilnError>;

    /// Idempotent "element off" command.
    fn ensure_off(&mut self) -> Result<(), KilnError>;

    /// Fire the hard power cutoff, if one is installed.
    fn kill(&mut self) -> Result<(), KilnError>;
}

// ────────────────────────────────────────────────────────────────────────────
// Simulated oven
// ────────────────────────────────────────────────────────────────────────────

/// Longest single integration step used when catching the model up.
const MAX_SIM_STEP: Duration = Duration::from_secs(1);

/// Oven backed by a [`ThermalModel`].
///
/// In real-time mode the engine sleeps through each tick.  In accelerated
/// mode the oven advances a [`ManualClock`] by one tick per heat application
/// instead, so a full firing runs as fast as the CPU allows.
pub struct SimulatedOven {
    model: ThermalModel,
    clock: Arc<dyn Clock>,
    manual: Option<Arc<ManualClock>>,
    simulated_until: Duration,
}

impl SimulatedOven {
    /// Paced against `clock`; the engine sleeps through every tick.
    pub fn realtime(config: &SimulationConfig, clock: Arc<dyn Clock>) -> Self {
        let simulated_until = clock.now();
        Self {
            model: ThermalModel::new(config),
            clock,
            manual: None,
            simulated_until,
        }
    }

    /// Drives `clock` forward itself; share the same clock with the engine.
    pub fn accelerated(config: &SimulationConfig, clock: Arc<ManualClock>) -> Self {
        let simulated_until = clock.now();
        Self {
            model: ThermalModel::new(config),
            clock: Arc::clone(&clock) as Arc<dyn Clock>,
            manual: Some(clock),
            simulated_until,
        }
    }

    /// Build the oven described by `config.simulation` together with the
    /// clock the engine must use with it.
    pub fn from_config(config: &KilnConfig) -> (Self, Arc<dyn Clock>) {
        if config.simulation.realtime {
            let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
            (Self::realtime(&config.simulation, Arc::clone(&clock)), clock)
        } else {
            let manual = Arc::new(ManualClock::new());
            let clock: Arc<dyn Clock> = Arc::clone(&manual) as Arc<dyn Clock>;
            (Self::accelerated(&config.simulation, manual), clock)
        }
    }

    pub fn model(&self) -> &ThermalModel {
        &self.model
    }

    /// Integrate with the element off up to the current time.
    fn catch_up(&mut self) {
        let now = self.clock.now();
        while self.simulated_until < now {
            let step = (now - self.simulated_until).min(MAX_SIM_STEP);
            self.model.step(0.0, step.as_secs_f64());
            self.simulated_until += step;
        }
    }
}

impl OvenBackend for SimulatedOven {
    fn is_simulated(&self) -> bool {
        true
    }

    fn read_temperature(&mut self) -> f64 {
        self.catch_up();
        self.model.chamber_temperature()
    }

    fn apply_heat(&mut self, fraction: f64, tick: Duration) -> Result<Duration, KilnError> {
        self.catch_up();
        self.model.step(fraction, tick.as_secs_f64());
        self.simulated_until += tick;
        debug!(
            heat = fraction,
            chamber = self.model.chamber_temperature(),
            element = self.model.element_temperature(),
            "simulated tick"
        );
        match &self.manual {
            Some(clock) => {
                clock.advance(tick);
                Ok(Duration::ZERO)
            }
            None => Ok(tick),
        }
    }

    fn ensure_off(&mut self) -> Result<(), KilnError> {
        Ok(())
    }

    fn kill(&mut self) -> Result<(), KilnError> {
        warn!("kill switch requested on simulated oven");
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Real oven
// ────────────────────────────────────────────────────────────────────────────

/// Oven wired to a relay, a sampled thermocouple and an optional kill
/// switch.
pub struct RealOven {
    heater: Box<dyn HeatOutput>,
    readings: watch::Receiver<Reading>,
    kill_switch: Option<Box<dyn KillSwitch>>,
    offset: f64,
    acquisition: Option<AcquisitionHandle>,
}

impl std::fmt::Debug for RealOven {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealOven")
            .field("heater", &self.heater.id())
            .field("kill_switch", &self.kill_switch.as_ref().map(|k| k.id().to_string()))
            .field("offset", &self.offset)
            .finish()
    }
}

impl RealOven {
    /// Assemble a real oven from already-running parts.
    ///
    /// # Errors
    ///
    /// [`KilnError::KillSwitchNotFound`] when `require_kill_switch` is set
    /// and no kill switch was supplied.
    pub fn new(
        heater: Box<dyn HeatOutput>,
        readings: watch::Receiver<Reading>,
        kill_switch: Option<Box<dyn KillSwitch>>,
        require_kill_switch: bool,
        offset: f64,
    ) -> Result<Self, KilnError> {
        if require_kill_switch && kill_switch.is_none() {
            error!(heater = heater.id(), "kill switch enabled but not found");
            return Err(KilnError::KillSwitchNotFound(
                "a kill switch is required but none was configured".to_string(),
            ));
        }
        if kill_switch.is_none() {
            warn!("no kill switch installed; emergency aborts rely on the relay alone");
        }
        Ok(Self {
            heater,
            readings,
            kill_switch,
            offset,
            acquisition: None,
        })
    }

    /// Start sampling `sensor` in the background and build an oven around
    /// it.
    ///
    /// # Errors
    ///
    /// See [`RealOven::new`]; also fails if the sampler thread cannot start.
    pub fn with_sensor(
        config: &KilnConfig,
        sensor: Box<dyn Thermocouple>,
        heater: Box<dyn HeatOutput>,
        kill_switch: Option<Box<dyn KillSwitch>>,
        require_kill_switch: bool,
    ) -> Result<Self, KilnError> {
        let acquisition = spawn_acquisition(sensor, &config.acquisition, config.timing.tick())?;
        let mut oven = Self::new(
            heater,
            acquisition.readings(),
            kill_switch,
            require_kill_switch,
            config.acquisition.thermocouple_offset,
        )?;
        oven.acquisition = Some(acquisition);
        info!("real oven ready");
        Ok(oven)
    }
}

impl OvenBackend for RealOven {
    fn is_simulated(&self) -> bool {
        false
    }

    fn read_temperature(&mut self) -> f64 {
        self.readings
            .borrow()
            .temperature
            .map_or(0.0, |t| t + self.offset)
    }

    fn fault_percent(&self) -> f64 {
        self.readings.borrow().fault_percent
    }

    fn apply_heat(&mut self, fraction: f64, tick: Duration) -> Result<Duration, KilnError> {
        let on = tick.mul_f64(fraction.clamp(0.0, 1.0));
        let off = tick.saturating_sub(on);
        if !on.is_zero() {
            self.heater.heat(on)?;
        }
        if !off.is_zero() {
            self.heater.cool(off)?;
        }
        Ok(Duration::ZERO)
    }

    fn ensure_off(&mut self) -> Result<(), KilnError> {
        self.heater.cool(Duration::ZERO)
    }

    fn kill(&mut self) -> Result<(), KilnError> {
        match self.kill_switch.as_mut() {
            Some(switch) => {
                error!(switch = switch.id(), "firing kill switch");
                switch.kill()
            }
            None => {
                warn!("emergency abort without a kill switch");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_hal::sim::{HeatCommand, SimHeatOutput, SimKillSwitch, SimThermocouple};
    use std::sync::atomic::Ordering;

    fn reading(t: f64) -> watch::Receiver<Reading> {
        let (tx, rx) = watch::channel(Reading {
            temperature: Some(t),
            ..Reading::default()
        });
        // Keep the value readable after the sender is gone.
        drop(tx);
        rx
    }

    #[test]
    fn accelerated_sim_advances_its_clock() {
        let clock = Arc::new(ManualClock::new());
        let mut oven = SimulatedOven::accelerated(&SimulationConfig::default(), Arc::clone(&clock));
        let room = oven.read_temperature();
        for _ in 0..120 {
            let pause = oven.apply_heat(1.0, Duration::from_secs(1)).unwrap();
            assert_eq!(pause, Duration::ZERO);
        }
        assert_eq!(clock.now(), Duration::from_secs(120));
        assert!(oven.read_temperature() > room);
    }

    #[test]
    fn realtime_sim_asks_engine_to_wait() {
        let clock = Arc::new(ManualClock::new());
        let mut oven = SimulatedOven::realtime(&SimulationConfig::default(), clock.clone());
        let pause = oven.apply_heat(0.5, Duration::from_secs(2)).unwrap();
        assert_eq!(pause, Duration::from_secs(2));
    }

    #[test]
    fn sim_cools_while_clock_moves_without_heat() {
        let clock = Arc::new(ManualClock::new());
        let mut oven = SimulatedOven::accelerated(&SimulationConfig::default(), Arc::clone(&clock));
        for _ in 0..600 {
            oven.apply_heat(1.0, Duration::from_secs(1)).unwrap();
        }
        let hot = oven.read_temperature();
        clock.advance(Duration::from_secs(600));
        assert!(oven.read_temperature() < hot);
    }

    #[test]
    fn real_oven_splits_tick_into_on_and_off() {
        let heater = SimHeatOutput::new("ssr", false);
        let log = heater.log();
        let mut oven = RealOven::new(Box::new(heater), reading(100.0), None, false, 0.0).unwrap();

        let pause = oven.apply_heat(0.25, Duration::from_secs(2)).unwrap();
        assert_eq!(pause, Duration::ZERO);
        oven.apply_heat(0.0, Duration::from_secs(2)).unwrap();
        oven.ensure_off().unwrap();

        let log = log.lock().unwrap();
        assert_eq!(
            *log,
            vec![
                HeatCommand::Heat(Duration::from_millis(500)),
                HeatCommand::Cool(Duration::from_millis(1500)),
                HeatCommand::Cool(Duration::from_secs(2)),
                HeatCommand::Cool(Duration::ZERO),
            ]
        );
    }

    #[test]
    fn real_oven_applies_offset_and_reports_missing_reading_as_zero() {
        let mut oven = RealOven::new(
            Box::new(SimHeatOutput::new("ssr", false)),
            reading(100.0),
            None,
            false,
            -2.5,
        )
        .unwrap();
        assert_eq!(oven.read_temperature(), 97.5);

        let (_tx, empty) = watch::channel(Reading::default());
        let mut oven = RealOven::new(Box::new(SimHeatOutput::new("ssr", false)), empty, None, false, 0.0).unwrap();
        assert_eq!(oven.read_temperature(), 0.0);
    }

    #[test]
    fn missing_required_kill_switch_is_a_startup_error() {
        let err = RealOven::new(
            Box::new(SimHeatOutput::new("ssr", false)),
            reading(70.0),
            None,
            true,
            0.0,
        )
        .unwrap_err();
        assert!(matches!(err, KilnError::KillSwitchNotFound(_)));
    }

    #[test]
    fn kill_fires_installed_switch() {
        let switch = SimKillSwitch::new("wemo");
        let fired = switch.fired();
        let mut oven = RealOven::new(
            Box::new(SimHeatOutput::new("ssr", false)),
            reading(70.0),
            Some(Box::new(switch)),
            true,
            0.0,
        )
        .unwrap();
        oven.kill().unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn with_sensor_publishes_sampled_temperature() {
        let config = KilnConfig {
            timing: kiln_types::TimingConfig {
                tick_seconds: 0.02,
                ..Default::default()
            },
            ..KilnConfig::default()
        };
        let mut oven = RealOven::with_sensor(
            &config,
            Box::new(SimThermocouple::constant("tc", 400.0)),
            Box::new(SimHeatOutput::new("ssr", false)),
            None,
            false,
        )
        .unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while oven.read_temperature() == 0.0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(oven.read_temperature(), 400.0);
    }
}
