//! [`SafetyMonitor`] – run-level interlocks evaluated on every RUNNING tick.
//!
//! The monitor never touches the actuator.  It only tells the engine what to
//! do: abort the run (a [`Trip`]) or shift the profile clock (catch-up).
//!
//! Checks, in evaluation order:
//!
//! 1. emergency overtemperature,
//! 2. catch-up rescheduling ([`SafetyMonitor::must_catch_up`]),
//! 3. heating stall,
//! 4. sensor fault rate (only when `max_fault_percent` is configured).

use std::fmt;
use std::time::Duration;

use kiln_types::SafetyConfig;
use tracing::{debug, error, warn};

// ────────────────────────────────────────────────────────────────────────────
// Public types
// ────────────────────────────────────────────────────────────────────────────

/// Reason a run must be aborted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Trip {
    /// Filtered temperature reached the emergency shutoff threshold.
    Emergency { temperature: f64, threshold: f64 },
    /// Heat was applied but the chamber did not warm up.
    Stall {
        stalled_for: Duration,
        temperature: f64,
        target: f64,
    },
    /// Too many bad thermocouple samples.
    SensorFaults { fault_percent: f64, limit: f64 },
}

impl Trip {
    /// Whether the hard kill switch must be fired for this trip.
    pub fn requires_kill_switch(&self) -> bool {
        matches!(self, Trip::Emergency { .. })
    }
}

impl fmt::Display for Trip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trip::Emergency {
                temperature,
                threshold,
            } => write!(
                f,
                "emergency shutoff: temperature {temperature:.1} reached {threshold:.1}"
            ),
            Trip::Stall {
                stalled_for,
                temperature,
                target,
            } => write!(
                f,
                "heating stall: {temperature:.1} below target {target:.1} for {}s",
                stalled_for.as_secs()
            ),
            Trip::SensorFaults {
                fault_percent,
                limit,
            } => write!(
                f,
                "thermocouple fault rate {fault_percent:.0}% exceeds {limit:.0}%"
            ),
        }
    }
}

/// What the engine observed during one RUNNING tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickObservation {
    /// Monotonic timestamp of the tick.
    pub now: Duration,
    pub temperature: f64,
    pub target: f64,
    /// Heat fraction commanded this tick.
    pub heat: f64,
    /// Latest bad-sample percentage, `0.0` for simulated ovens.
    pub fault_percent: f64,
}

// ────────────────────────────────────────────────────────────────────────────
// SafetyMonitor
// ────────────────────────────────────────────────────────────────────────────

/// Emergency, catch-up, stall and fault-rate checks.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use kiln_kernel::safety::{SafetyMonitor, TickObservation};
/// use kiln_types::SafetyConfig;
///
/// let mut monitor = SafetyMonitor::new(&SafetyConfig::default());
/// let trip = monitor.evaluate(TickObservation {
///     now: Duration::ZERO,
///     temperature: 1250.0,
///     target: 1000.0,
///     heat: 0.0,
///     fault_percent: 0.0,
/// });
/// assert!(trip.is_some_and(|t| t.requires_kill_switch()));
/// ```
#[derive(Debug, Clone)]
pub struct SafetyMonitor {
    config: SafetyConfig,
    stall_started: Option<Duration>,
    last_temperature: Option<f64>,
}

impl SafetyMonitor {
    pub fn new(config: &SafetyConfig) -> Self {
        Self {
            config: config.clone(),
            stall_started: None,
            last_temperature: None,
        }
    }

    pub fn config(&self) -> &SafetyConfig {
        &self.config
    }

    /// Forget stall tracking.  Called whenever a run starts.
    pub fn reset(&mut self) {
        self.stall_started = None;
        self.last_temperature = None;
    }

    /// Emergency overtemperature check.
    pub fn check_emergency(&self, temperature: f64) -> Option<Trip> {
        let threshold = self.config.emergency_shutoff_temp;
        (temperature >= threshold).then(|| {
            error!(temperature, threshold, "emergency overtemperature");
            Trip::Emergency {
                temperature,
                threshold,
            }
        })
    }

    /// `true` when the kiln is too cold to follow the profile and the
    /// profile clock should be held back.
    pub fn must_catch_up(&self, target: f64, temperature: f64) -> bool {
        if !self.config.kiln_must_catch_up {
            return false;
        }
        let behind = target - temperature > self.config.pause_window;
        if behind {
            debug!(target, temperature, window = self.config.pause_window, "kiln must catch up");
        }
        behind
    }

    /// Stall detection.  Must be fed every RUNNING tick so the
    /// per-tick temperature rise can be measured.
    pub fn check_stall(&mut self, heat: f64, target: f64, temperature: f64, now: Duration) -> Option<Trip> {
        let previous = self.last_temperature.replace(temperature);
        if !self.config.stall_detection {
            return None;
        }

        let rising = previous.is_some_and(|p| temperature - p >= self.config.stall_min_rise);
        let far_below = target - temperature >= self.config.stall_temp_margin;

        if heat <= 0.0 || !far_below || rising {
            self.stall_started = None;
            return None;
        }

        let started = *self.stall_started.get_or_insert(now);
        let stalled_for = now.saturating_sub(started);
        if stalled_for >= self.config.stall_abort_after() {
            error!(
                temperature,
                target,
                stalled_secs = stalled_for.as_secs(),
                "heating stall"
            );
            return Some(Trip::Stall {
                stalled_for,
                temperature,
                target,
            });
        }
        if stalled_for > Duration::ZERO {
            warn!(temperature, target, stalled_secs = stalled_for.as_secs(), "temperature not rising");
        }
        None
    }

    /// Fault-rate check.  Disabled unless `max_fault_percent` is set.
    pub fn check_faults(&self, fault_percent: f64) -> Option<Trip> {
        let limit = self.config.max_fault_percent?;
        (fault_percent > limit).then(|| {
            error!(fault_percent, limit, "too many thermocouple errors");
            Trip::SensorFaults {
                fault_percent,
                limit,
            }
        })
    }

    /// Run the abort checks for one tick in order and return the first
    /// trip, if any.
    pub fn evaluate(&mut self, obs: TickObservation) -> Option<Trip> {
        if let Some(trip) = self.check_emergency(obs.temperature) {
            return Some(trip);
        }
        if let Some(trip) = self.check_stall(obs.heat, obs.target, obs.temperature, obs.now) {
            return Some(trip);
        }
        self.check_faults(obs.fault_percent)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
