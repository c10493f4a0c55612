//! In-process simulated hardware for running the full controller without a
//! kiln attached.
//!
//! [`ThermalModel`] is a two-node lumped model (heating element and chamber)
//! that loses heat to the room.  The stub drivers record every command so
//! tests can assert on what the engine asked the hardware to do.
//!
//! # Example
//!
//! ```rust
//! use kiln_hal::sim::ThermalModel;
//! use kiln_types::SimulationConfig;
//!
//! let mut model = ThermalModel::new(&SimulationConfig::default());
//! let room = model.chamber_temperature();
//! for _ in 0..60 {
//!     model.step(1.0, 1.0);
//! }
//! assert!(model.chamber_temperature() > room);
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use kiln_types::{KilnError, SensorSample, SimulationConfig};
use tracing::debug;

use crate::heater::HeatOutput;
use crate::kill_switch::KillSwitch;
use crate::thermocouple::Thermocouple;

// ────────────────────────────────────────────────────────────────────────────
// Thermal model
// ────────────────────────────────────────────────────────────────────────────

/// Element → chamber → room heat-flow model.
#[derive(Debug, Clone)]
pub struct ThermalModel {
    room_temp: f64,
    element_capacity: f64,
    chamber_capacity: f64,
    heating_power: f64,
    chamber_to_room: f64,
    element_to_chamber: f64,
    element_temp: f64,
    chamber_temp: f64,
}

impl ThermalModel {
    /// Start with element and chamber at room temperature.
    pub fn new(config: &SimulationConfig) -> Self {
        Self {
            room_temp: config.room_temp,
            element_capacity: config.element_heat_capacity,
            chamber_capacity: config.oven_heat_capacity,
            heating_power: config.heating_power,
            chamber_to_room: config.oven_to_environ_resistance,
            element_to_chamber: config.element_to_oven_resistance,
            element_temp: config.room_temp,
            chamber_temp: config.room_temp,
        }
    }

    /// Advance the model by `dt` seconds with the element on for
    /// `heat_fraction` of that time.
    pub fn step(&mut self, heat_fraction: f64, dt: f64) {
        let energy = self.heating_power * heat_fraction.clamp(0.0, 1.0) * dt;
        self.element_temp += energy / self.element_capacity;

        let into_chamber = (self.element_temp - self.chamber_temp) / self.element_to_chamber;
        self.chamber_temp += into_chamber * dt / self.chamber_capacity;
        self.element_temp -= into_chamber * dt / self.element_capacity;

        let into_room = (self.chamber_temp - self.room_temp) / self.chamber_to_room;
        self.chamber_temp -= into_room * dt / self.chamber_capacity;

        debug!(
            element = self.element_temp,
            chamber = self.chamber_temp,
            into_chamber,
            into_room,
            "thermal model step"
        );
    }

    pub fn chamber_temperature(&self) -> f64 {
        self.chamber_temp
    }

    pub fn element_temperature(&self) -> f64 {
        self.element_temp
    }

    pub fn room_temperature(&self) -> f64 {
        self.room_temp
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Stub heat output
// ────────────────────────────────────────────────────────────────────────────

/// A command received by a [`SimHeatOutput`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeatCommand {
    Heat(Duration),
    Cool(Duration),
}

/// Shared record of every command sent to a [`SimHeatOutput`].
pub type HeatLog = Arc<Mutex<Vec<HeatCommand>>>;

/// A simulated relay.  Records commands and, when `realtime`, sleeps for the
/// commanded duration like a real output would.
pub struct SimHeatOutput {
    id: String,
    on: bool,
    realtime: bool,
    log: HeatLog,
}

impl SimHeatOutput {
    pub fn new(id: impl Into<String>, realtime: bool) -> Self {
        Self {
            id: id.into(),
            on: false,
            realtime,
            log: Arc::default(),
        }
    }

    /// Handle to the command log; clone it before boxing the output.
    pub fn log(&self) -> HeatLog {
        Arc::clone(&self.log)
    }

    fn record(&mut self, command: HeatCommand, duration: Duration) {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(command);
        if self.realtime && !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

impl HeatOutput for SimHeatOutput {
    fn id(&self) -> &str {
        &self.id
    }

    fn heat(&mut self, duration: Duration) -> Result<(), KilnError> {
        self.on = true;
        self.record(HeatCommand::Heat(duration), duration);
        Ok(())
    }

    fn cool(&mut self, duration: Duration) -> Result<(), KilnError> {
        self.on = false;
        self.record(HeatCommand::Cool(duration), duration);
        Ok(())
    }

    fn is_on(&self) -> bool {
        self.on
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Stub thermocouple
// ────────────────────────────────────────────────────────────────────────────

/// A thermocouple that replays a fixed script of samples, repeating the
/// last one once the script runs out.
pub struct SimThermocouple {
    id: String,
    script: VecDeque<SensorSample>,
    last: SensorSample,
}

impl SimThermocouple {
    pub fn scripted(id: impl Into<String>, samples: impl IntoIterator<Item = SensorSample>) -> Self {
        let script: VecDeque<_> = samples.into_iter().collect();
        let last = script.back().copied().unwrap_or(SensorSample::ok(0.0));
        Self {
            id: id.into(),
            script,
            last,
        }
    }

    pub fn constant(id: impl Into<String>, temperature: f64) -> Self {
        Self::scripted(id, [SensorSample::ok(temperature)])
    }
}

impl Thermocouple for SimThermocouple {
    fn id(&self) -> &str {
        &self.id
    }

    fn read(&mut self) -> Result<SensorSample, KilnError> {
        if let Some(sample) = self.script.pop_front() {
            self.last = sample;
        }
        Ok(self.last)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Stub kill switch
// ────────────────────────────────────────────────────────────────────────────

/// A kill switch that counts how many times it was fired.
pub struct SimKillSwitch {
    id: String,
    fired: Arc<AtomicUsize>,
}

impl SimKillSwitch {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fired: Arc::default(),
        }
    }

    /// Shared counter of `kill()` calls; clone it before boxing the switch.
    pub fn fired(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.fired)
    }
}

impl KillSwitch for SimKillSwitch {
    fn id(&self) -> &str {
        &self.id
    }

    fn kill(&mut self) -> Result<(), KilnError> {
        self.fired.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_types::SensorFault;

    #[test]
    fn model_cools_towards_room_without_heat() {
        let mut model = ThermalModel::new(&SimulationConfig::default());
        for _ in 0..600 {
            model.step(1.0, 1.0);
        }
        let hot = model.chamber_temperature();
        for _ in 0..600 {
            model.step(0.0, 1.0);
        }
        let cooled = model.chamber_temperature();
        assert!(cooled < hot);
        assert!(cooled > model.room_temperature());
    }

    #[test]
    fn model_idles_at_room_temperature() {
        let mut model = ThermalModel::new(&SimulationConfig::default());
        for _ in 0..100 {
            model.step(0.0, 1.0);
        }
        assert!((model.chamber_temperature() - 65.0).abs() < 1e-9);
        assert!((model.element_temperature() - 65.0).abs() < 1e-9);
    }

    #[test]
    fn sim_heat_output_records_commands() {
        let mut out = SimHeatOutput::new("ssr", false);
        let log = out.log();
        out.heat(Duration::from_millis(250)).unwrap();
        assert!(out.is_on());
        out.cool(Duration::ZERO).unwrap();
        assert!(!out.is_on());
        let log = log.lock().unwrap();
        assert_eq!(
            *log,
            vec![
                HeatCommand::Heat(Duration::from_millis(250)),
                HeatCommand::Cool(Duration::ZERO)
            ]
        );
    }

    #[test]
    fn sim_thermocouple_replays_then_repeats() {
        let mut tc = SimThermocouple::scripted(
            "tc",
            [
                SensorSample::ok(100.0),
                SensorSample::faulted(SensorFault::NoConnection),
            ],
        );
        assert_eq!(tc.read().unwrap(), SensorSample::ok(100.0));
        assert_eq!(tc.read().unwrap().fault, SensorFault::NoConnection);
        assert_eq!(tc.read().unwrap().fault, SensorFault::NoConnection);
    }

    #[test]
    fn sim_kill_switch_counts() {
        let mut ks = SimKillSwitch::new("wemo");
        let fired = ks.fired();
        ks.kill().unwrap();
        ks.kill().unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }
}
