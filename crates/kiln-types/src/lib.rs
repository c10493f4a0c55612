//! `kiln-types` – shared data model for the kiln controller.
//!
//! Everything that crosses a crate boundary lives here: the firing
//! [`Profile`], the engine state machine vocabulary ([`EngineState`],
//! [`EngineSnapshot`]), raw thermocouple samples, the configuration value
//! handed to every component, and the workspace-wide [`KilnError`].

pub mod config;
pub mod profile;

pub use config::{
    AcquisitionConfig, CostConfig, DerivativeMode, KilnConfig, PidConfig, RestartConfig,
    SafetyConfig, SimulationConfig, TimingConfig, WatcherConfig,
};
pub use profile::Profile;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle of an oven engine.
///
/// `Idle` is the resting state after start-up.  `Complete`, `Aborted` and
/// `Stopped` are terminal until the next `run_profile` call, which moves the
/// engine straight back to `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineState {
    #[default]
    Idle,
    Running,
    Complete,
    Aborted,
    Stopped,
}

impl EngineState {
    /// `true` for the states a run ends in.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Aborted | Self::Stopped)
    }

    /// `true` while the watcher should be recording history.
    pub fn is_recording(self) -> bool {
        matches!(self, Self::Running | Self::Complete)
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "IDLE",
            Self::Running => "RUNNING",
            Self::Complete => "COMPLETE",
            Self::Aborted => "ABORTED",
            Self::Stopped => "STOPPED",
        };
        f.write_str(s)
    }
}

/// Component breakdown of the most recent PID computation.
///
/// Always present on [`EngineSnapshot`]; all-zero before the first
/// computation of a run.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PidStats {
    /// Seconds between this computation and the previous one.
    pub time_delta: f64,
    pub setpoint: f64,
    pub measured: f64,
    pub error: f64,
    /// Rate of change used by the derivative term (of error or measurement).
    pub error_delta: f64,
    pub p: f64,
    pub i: f64,
    pub d: f64,
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    /// Sum of the terms, clamped to the output range, before normalisation.
    pub raw_output: f64,
    /// Normalised heat fraction in `[0, 1]`.
    pub output: f64,
    /// `true` when the control-window bypass chose the output.
    pub bypassed: bool,
}

/// Immutable, point-in-time view of an engine.
///
/// Field names on the wire follow the status messages observers already
/// understand (`runtime`, `heat`, `total_time`, ...).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub cost: f64,
    #[serde(rename = "runtime")]
    pub elapsed_seconds: f64,
    pub temperature: f64,
    pub target: f64,
    pub state: EngineState,
    #[serde(rename = "heat")]
    pub heat_fraction: f64,
    #[serde(rename = "total_time")]
    pub total_duration: f64,
    #[serde(rename = "profile")]
    pub profile_name: Option<String>,
    #[serde(rename = "is_simulation")]
    pub is_simulated: bool,
    #[serde(rename = "pidstats", default)]
    pub pid_stats: PidStats,
}

/// Fault classification reported by a thermocouple amplifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SensorFault {
    #[default]
    Ok,
    NoConnection,
    ShortToGround,
    ShortToVcc,
    Unknown,
}

impl SensorFault {
    /// `true` for the two short-circuit flags, which plasma inside a hot
    /// kiln can raise spuriously.
    pub fn is_short(self) -> bool {
        matches!(self, Self::ShortToGround | Self::ShortToVcc)
    }
}

/// One raw reading from the thermocouple.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorSample {
    pub temperature: f64,
    pub fault: SensorFault,
}

impl SensorSample {
    pub fn ok(temperature: f64) -> Self {
        Self {
            temperature,
            fault: SensorFault::Ok,
        }
    }

    pub fn faulted(fault: SensorFault) -> Self {
        Self {
            temperature: 0.0,
            fault,
        }
    }
}

/// Error type shared by every kiln crate.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum KilnError {
    #[error("Hardware Fault on {component}: {details}")]
    HardwareFault { component: String, details: String },

    #[error("Kill switch not found: {0}")]
    KillSwitchNotFound(String),

    #[error("Invalid profile: {0}")]
    InvalidProfile(String),

    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    #[error("Restart checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Observer disconnected")]
    ObserverClosed,

    #[error("I/O error: {0}")]
    Io(String),
}

impl KilnError {
    pub fn hardware(component: impl Into<String>, details: impl Into<String>) -> Self {
        Self::HardwareFault {
            component: component.into(),
            details: details.into(),
        }
    }
}

impl From<std::io::Error> for KilnError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}
