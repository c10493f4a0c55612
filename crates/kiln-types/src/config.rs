//! Configuration value consumed by every kiln component.
//!
//! A [`KilnConfig`] is built once at start-up (usually from
//! `~/.kiln/config.toml`) and passed by reference into constructors.  Every
//! field has a default so a partial file is always valid.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::KilnError;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct KilnConfig {
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub pid: PidConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
    #[serde(default)]
    pub restart: RestartConfig,
    #[serde(default)]
    pub cost: CostConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub watcher: WatcherConfig,
}

impl KilnConfig {
    /// Reject settings that would stall or spin the control, sampling or
    /// watcher loops.
    ///
    /// # Errors
    ///
    /// [`KilnError::Config`] naming the first offending field.
    pub fn validate(&self) -> Result<(), KilnError> {
        let intervals = [
            ("timing.tick_seconds", self.timing.tick_seconds),
            ("timing.idle_seconds", self.timing.idle_seconds),
            ("watcher.running_seconds", self.watcher.running_seconds),
            ("watcher.idle_seconds", self.watcher.idle_seconds),
        ];
        for (field, value) in intervals {
            if !value.is_finite() || value <= 0.0 || value > MAX_INTERVAL_SECONDS {
                return Err(KilnError::Config(format!(
                    "{field} must be a positive number of seconds up to {MAX_INTERVAL_SECONDS}, got {value}"
                )));
            }
        }
        if self.acquisition.samples_per_tick == 0 {
            return Err(KilnError::Config("acquisition.samples_per_tick must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Upper bound on any loop interval (one day).
const MAX_INTERVAL_SECONDS: f64 = 86_400.0;

/// Non-panicking seconds-to-`Duration`: negatives and NaN become zero,
/// values out of range saturate.
fn seconds(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

// ────────────────────────────────────────────────────────────────────────────
// Timing
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Control-loop period.  Heat-on plus heat-off always sum to one tick.
    #[serde(default = "default_tick_seconds")]
    pub tick_seconds: f64,
    /// Poll interval while not running a profile.
    #[serde(default = "default_idle_seconds")]
    pub idle_seconds: f64,
}

impl TimingConfig {
    pub fn tick(&self) -> Duration {
        seconds(self.tick_seconds)
    }

    pub fn idle(&self) -> Duration {
        seconds(self.idle_seconds)
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            tick_seconds: default_tick_seconds(),
            idle_seconds: default_idle_seconds(),
        }
    }
}

fn default_tick_seconds() -> f64 {
    1.0
}
fn default_idle_seconds() -> f64 {
    2.0
}

// ────────────────────────────────────────────────────────────────────────────
// PID
// ────────────────────────────────────────────────────────────────────────────

/// Which signal the derivative term differentiates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DerivativeMode {
    /// `Kd * d(error)/dt` – reacts to setpoint steps.
    Error,
    /// `-Kd * d(measurement)/dt` – immune to setpoint steps.
    #[default]
    Measurement,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PidConfig {
    #[serde(default = "default_kp")]
    pub kp: f64,
    #[serde(default = "default_ki")]
    pub ki: f64,
    #[serde(default = "default_kd")]
    pub kd: f64,
    #[serde(default)]
    pub derivative_mode: DerivativeMode,
    /// Raw output range; the result is normalised by `output_max`.
    #[serde(default = "default_output_limits")]
    pub output_limits: (f64, f64),
    #[serde(default = "default_integral_limits")]
    pub integral_limits: (f64, f64),
    /// Beyond this absolute error the controller drives full on / full off.
    #[serde(default = "default_control_window")]
    pub control_window: f64,
    /// Clear the integral and derivative memory as soon as a run aborts
    /// rather than waiting for the next `run_profile`.
    #[serde(default = "default_true")]
    pub reset_on_abort: bool,
}

impl Default for PidConfig {
    fn default() -> Self {
        Self {
            kp: default_kp(),
            ki: default_ki(),
            kd: default_kd(),
            derivative_mode: DerivativeMode::default(),
            output_limits: default_output_limits(),
            integral_limits: default_integral_limits(),
            control_window: default_control_window(),
            reset_on_abort: true,
        }
    }
}

fn default_kp() -> f64 {
    1.0
}
fn default_ki() -> f64 {
    0.02
}
fn default_kd() -> f64 {
    30.0
}
fn default_output_limits() -> (f64, f64) {
    (0.0, 100.0)
}
fn default_integral_limits() -> (f64, f64) {
    (0.0, 100.0)
}
fn default_control_window() -> f64 {
    50.0
}
fn default_true() -> bool {
    true
}

// ────────────────────────────────────────────────────────────────────────────
// Safety
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyConfig {
    /// Abort (and fire the kill switch) at or above this temperature.
    #[serde(default = "default_emergency_shutoff")]
    pub emergency_shutoff_temp: f64,
    /// Hold the profile clock while the kiln lags the target.
    #[serde(default = "default_true")]
    pub kiln_must_catch_up: bool,
    /// How far below target the kiln may lag before the clock is held.
    #[serde(default = "default_pause_window")]
    pub pause_window: f64,
    #[serde(default = "default_true")]
    pub stall_detection: bool,
    /// How long heating may fail to make progress before aborting.
    #[serde(default = "default_stall_minutes")]
    pub stall_abort_minutes: f64,
    /// Stall tracking only applies this far (or further) below target.
    #[serde(default = "default_stall_margin")]
    pub stall_temp_margin: f64,
    /// Rise per tick that counts as making progress.
    #[serde(default = "default_stall_min_rise")]
    pub stall_min_rise: f64,
    /// Abort when the thermocouple fault rate exceeds this percentage.
    /// `None` disables the check.
    #[serde(default)]
    pub max_fault_percent: Option<f64>,
}

impl SafetyConfig {
    pub fn stall_abort_after(&self) -> Duration {
        seconds(self.stall_abort_minutes * 60.0)
    }
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            emergency_shutoff_temp: default_emergency_shutoff(),
            kiln_must_catch_up: true,
            pause_window: default_pause_window(),
            stall_detection: true,
            stall_abort_minutes: default_stall_minutes(),
            stall_temp_margin: default_stall_margin(),
            stall_min_rise: default_stall_min_rise(),
            max_fault_percent: None,
        }
    }
}

fn default_emergency_shutoff() -> f64 {
    1200.0
}
fn default_pause_window() -> f64 {
    50.0
}
fn default_stall_minutes() -> f64 {
    1.0
}
fn default_stall_margin() -> f64 {
    50.0
}
fn default_stall_min_rise() -> f64 {
    0.3
}

// ────────────────────────────────────────────────────────────────────────────
// Acquisition
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Added to every filtered reading (calibration).
    #[serde(default)]
    pub thermocouple_offset: f64,
    /// Size of the sliding window of good samples.
    #[serde(default = "default_average_samples")]
    pub average_samples: usize,
    /// Percentage trimmed from each end of the sorted window.
    #[serde(default = "default_trim_percent")]
    pub trim_percent: f64,
    /// Raw samples taken per control tick.
    #[serde(default = "default_samples_per_tick")]
    pub samples_per_tick: u32,
    /// Treat short-to-ground / short-to-VCC samples as good.
    #[serde(default)]
    pub ignore_short_errors: bool,
    /// Report temperatures in Fahrenheit.
    #[serde(default = "default_true")]
    pub fahrenheit: bool,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            thermocouple_offset: 0.0,
            average_samples: default_average_samples(),
            trim_percent: default_trim_percent(),
            samples_per_tick: default_samples_per_tick(),
            ignore_short_errors: false,
            fahrenheit: true,
        }
    }
}

fn default_average_samples() -> usize {
    40
}
fn default_trim_percent() -> f64 {
    25.0
}
fn default_samples_per_tick() -> u32 {
    4
}

// ────────────────────────────────────────────────────────────────────────────
// Automatic restart
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestartConfig {
    #[serde(default)]
    pub automatic_restarts: bool,
    /// Maximum age of a checkpoint that may still be resumed.
    #[serde(default = "default_restart_window")]
    pub window_minutes: f64,
    /// Where the checkpoint is written.  Keep it off tmpfs.
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    /// Directory of `<name>.json` profiles used to resume a run.
    #[serde(default = "default_profiles_dir")]
    pub profiles_dir: PathBuf,
}

impl RestartConfig {
    pub fn window(&self) -> Duration {
        seconds(self.window_minutes * 60.0)
    }
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            automatic_restarts: false,
            window_minutes: default_restart_window(),
            state_file: default_state_file(),
            profiles_dir: default_profiles_dir(),
        }
    }
}

fn default_restart_window() -> f64 {
    5.0
}
fn default_state_file() -> PathBuf {
    PathBuf::from("state.json")
}
fn default_profiles_dir() -> PathBuf {
    PathBuf::from("storage").join("profiles")
}

// ────────────────────────────────────────────────────────────────────────────
// Cost
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostConfig {
    /// Price per kilowatt-hour.
    #[serde(default = "default_kwh_rate")]
    pub kwh_rate: f64,
    /// Element power draw when on, in kilowatts.
    #[serde(default = "default_kw_elements")]
    pub kw_elements: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            kwh_rate: default_kwh_rate(),
            kw_elements: default_kw_elements(),
            currency: default_currency(),
        }
    }
}

fn default_kwh_rate() -> f64 {
    0.20
}
fn default_kw_elements() -> f64 {
    1.46
}
fn default_currency() -> String {
    "$".to_string()
}

// ────────────────────────────────────────────────────────────────────────────
// Simulation
// ────────────────────────────────────────────────────────────────────────────

/// Parameters of the two-node thermal model used by the simulated oven.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_room_temp")]
    pub room_temp: f64,
    /// J/K
    #[serde(default = "default_element_heat_capacity")]
    pub element_heat_capacity: f64,
    /// J/K
    #[serde(default = "default_oven_heat_capacity")]
    pub oven_heat_capacity: f64,
    /// W
    #[serde(default = "default_heating_power")]
    pub heating_power: f64,
    /// K/W
    #[serde(default = "default_oven_to_environ")]
    pub oven_to_environ_resistance: f64,
    /// K/W
    #[serde(default = "default_element_to_oven")]
    pub element_to_oven_resistance: f64,
    /// Sleep through each tick like real hardware.  When `false` the
    /// simulation advances its own clock and runs as fast as possible.
    #[serde(default = "default_true")]
    pub realtime: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            room_temp: default_room_temp(),
            element_heat_capacity: default_element_heat_capacity(),
            oven_heat_capacity: default_oven_heat_capacity(),
            heating_power: default_heating_power(),
            oven_to_environ_resistance: default_oven_to_environ(),
            element_to_oven_resistance: default_element_to_oven(),
            realtime: true,
        }
    }
}

fn default_room_temp() -> f64 {
    65.0
}
fn default_element_heat_capacity() -> f64 {
    200.0
}
fn default_oven_heat_capacity() -> f64 {
    1000.0
}
fn default_heating_power() -> f64 {
    1450.0
}
fn default_oven_to_environ() -> f64 {
    1.2
}
fn default_element_to_oven() -> f64 {
    0.08
}

// ────────────────────────────────────────────────────────────────────────────
// Watcher
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Poll interval while a run is active or just completed.
    #[serde(default = "default_watch_running")]
    pub running_seconds: f64,
    /// Poll interval otherwise.
    #[serde(default = "default_watch_idle")]
    pub idle_seconds: f64,
    /// Hard cap on retained history entries; the oldest are dropped.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Maximum number of points replayed to a new observer.
    #[serde(default = "default_backlog_points")]
    pub backlog_points: usize,
}

impl WatcherConfig {
    pub fn running_interval(&self) -> Duration {
        seconds(self.running_seconds)
    }

    pub fn idle_interval(&self) -> Duration {
        seconds(self.idle_seconds)
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            running_seconds: default_watch_running(),
            idle_seconds: default_watch_idle(),
            history_limit: default_history_limit(),
            backlog_points: default_backlog_points(),
        }
    }
}

fn default_watch_running() -> f64 {
    1.0
}
fn default_watch_idle() -> f64 {
    2.0
}
fn default_history_limit() -> usize {
    50_000
}
fn default_backlog_points() -> usize {
    100
}
