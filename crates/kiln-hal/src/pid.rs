//! PID (Proportional–Integral–Derivative) control law for the heating element.
//!
//! The controller works in a wide raw output range (by default `0..=100`)
//! and normalises the clamped result into a heat fraction in `[0, 1]` – the
//! share of the next tick the element should be on.
//!
//! Far from the setpoint a plain PID is a poor fit: the integral keeps
//! winding while the kiln is still ramping.  When the absolute error is
//! larger than the configured control window the PID computation is skipped
//! and the output is driven to the extreme instead (full on when too cold,
//! full off when too hot).  The integral is left untouched in that branch.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use kiln_hal::pid::PidController;
//!
//! let mut pid = PidController::new(2.0, 0.0, 0.0);
//! pid.set_output_limits(0.0, 100.0);
//!
//! // error = 10 → raw = 20 → 20 % of the tick
//! let heat = pid.compute(110.0, 100.0, Duration::from_secs(1));
//! assert!((heat - 0.2).abs() < 1e-9);
//! ```

use std::time::Duration;

use kiln_types::{DerivativeMode, PidConfig, PidStats};
use tracing::debug;

/// Floor applied to the integration interval so a zero or backwards clock
/// can never divide by zero.
const MIN_DT_SECONDS: f64 = 1e-4;

/// Stateful PID controller.
///
/// Call [`PidController::reset`] at the start of every run; stale integral
/// or derivative memory from a previous firing otherwise leaks into the new
/// one.
#[derive(Debug, Clone)]
pub struct PidController {
    kp: f64,
    ki: f64,
    kd: f64,
    derivative_mode: DerivativeMode,
    output_min: f64,
    output_max: f64,
    integral_min: f64,
    integral_max: f64,
    control_window: f64,
    integral: f64,
    last_error: Option<f64>,
    last_measurement: Option<f64>,
    last_time: Option<Duration>,
    stats: PidStats,
}

impl PidController {
    /// Create a controller with the given gains.
    ///
    /// Output and integral are unclamped, the derivative acts on the error
    /// and the control-window bypass is disabled until configured.
    pub fn new(kp: f64, ki: f64, kd: f64) -> Self {
        Self {
            kp,
            ki,
            kd,
            derivative_mode: DerivativeMode::Error,
            output_min: f64::NEG_INFINITY,
            output_max: f64::INFINITY,
            integral_min: f64::NEG_INFINITY,
            integral_max: f64::INFINITY,
            control_window: 0.0,
            integral: 0.0,
            last_error: None,
            last_measurement: None,
            last_time: None,
            stats: PidStats::default(),
        }
    }

    /// Build a controller from the `[pid]` configuration section.
    pub fn from_config(config: &PidConfig) -> Self {
        let mut pid = Self::new(config.kp, config.ki, config.kd);
        pid.set_derivative_mode(config.derivative_mode);
        pid.set_output_limits(config.output_limits.0, config.output_limits.1);
        pid.set_integral_limits(config.integral_limits.0, config.integral_limits.1);
        pid.set_control_window(config.control_window);
        pid
    }

    pub fn set_gains(&mut self, kp: f64, ki: f64, kd: f64) {
        self.kp = kp;
        self.ki = ki;
        self.kd = kd;
    }

    pub fn gains(&self) -> (f64, f64, f64) {
        (self.kp, self.ki, self.kd)
    }

    pub fn set_derivative_mode(&mut self, mode: DerivativeMode) {
        self.derivative_mode = mode;
    }

    /// Clamp the raw output to `[min, max]`.  The heat fraction is the
    /// clamped output divided by `max`.
    pub fn set_output_limits(&mut self, min: f64, max: f64) {
        self.output_min = min;
        self.output_max = max;
    }

    /// Clamp the integral accumulator to `[min, max]` (anti-windup).
    pub fn set_integral_limits(&mut self, min: f64, max: f64) {
        self.integral_min = min;
        self.integral_max = max;
        self.integral = self.integral.clamp(min, max);
    }

    /// Absolute error beyond which the PID is bypassed.  Non-positive
    /// values disable the bypass.
    pub fn set_control_window(&mut self, window: f64) {
        self.control_window = window;
    }

    /// Current value of the integral accumulator.
    pub fn integral(&self) -> f64 {
        self.integral
    }

    /// Component breakdown of the last [`compute`](Self::compute) call.
    pub fn stats(&self) -> PidStats {
        self.stats
    }

    /// Compute the heat fraction for this tick.
    ///
    /// `now` is a monotonic timestamp; the interval since the previous call
    /// is used for integration and differentiation.
    pub fn compute(&mut self, setpoint: f64, measured: f64, now: Duration) -> f64 {
        let dt = self
            .last_time
            .map_or(0.0, |prev| now.saturating_sub(prev).as_secs_f64())
            .max(MIN_DT_SECONDS);
        let error = setpoint - measured;

        if self.control_window > 0.0 && error.abs() > self.control_window {
            let output = if error > 0.0 { 1.0 } else { 0.0 };
            debug!(error, output, "outside PID control window");
            self.stats = PidStats {
                time_delta: dt,
                setpoint,
                measured,
                error,
                kp: self.kp,
                ki: self.ki,
                kd: self.kd,
                i: self.integral,
                raw_output: output * self.output_max_or_one(),
                output,
                bypassed: true,
                ..PidStats::default()
            };
            self.remember(error, measured, now);
            return output;
        }

        let p = self.kp * error;

        self.integral = (self.integral + self.ki * error * dt).clamp(self.integral_min, self.integral_max);
        let i = self.integral;

        let rate = match self.derivative_mode {
            DerivativeMode::Error => self.last_error.map_or(0.0, |prev| (error - prev) / dt),
            DerivativeMode::Measurement => self
                .last_measurement
                .map_or(0.0, |prev| (measured - prev) / dt),
        };
        let d = match self.derivative_mode {
            DerivativeMode::Error => self.kd * rate,
            DerivativeMode::Measurement => -self.kd * rate,
        };

        let raw_output = (p + i + d).clamp(self.output_min, self.output_max);
        let output = (raw_output / self.output_max_or_one()).clamp(0.0, 1.0);

        self.stats = PidStats {
            time_delta: dt,
            setpoint,
            measured,
            error,
            error_delta: rate,
            p,
            i,
            d,
            kp: self.kp,
            ki: self.ki,
            kd: self.kd,
            raw_output,
            output,
            bypassed: false,
        };
        self.remember(error, measured, now);
        output
    }

    /// Zero the integral and forget derivative and timing memory.
    pub fn reset(&mut self) {
        self.integral = 0.0_f64.clamp(self.integral_min, self.integral_max);
        self.last_error = None;
        self.last_measurement = None;
        self.last_time = None;
        self.stats = PidStats::default();
    }

    fn remember(&mut self, error: f64, measured: f64, now: Duration) {
        self.last_error = Some(error);
        self.last_measurement = Some(measured);
        self.last_time = Some(now);
    }

    fn output_max_or_one(&self) -> f64 {
        if self.output_max.is_finite() && self.output_max > 0.0 {
            self.output_max
        } else {
            1.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn kiln_pid() -> PidController {
        let mut pid = PidController::new(1.0, 0.5, 0.0);
        pid.set_output_limits(0.0, 100.0);
        pid.set_integral_limits(0.0, 40.0);
        pid
    }

    #[test]
    fn proportional_only_normalises_output() {
        let mut pid = PidController::new(2.0, 0.0, 0.0);
        pid.set_output_limits(0.0, 100.0);
        let out = pid.compute(110.0, 100.0, secs(0));
        assert!((out - 0.2).abs() < 1e-9);
        assert!((pid.stats().p - 20.0).abs() < 1e-9);
    }

    #[test]
    fn output_is_zero_at_setpoint() {
        let mut pid = kiln_pid();
        assert_eq!(pid.compute(500.0, 500.0, secs(0)), 0.0);
    }

    #[test]
    fn output_never_negative_when_too_hot() {
        let mut pid = PidController::new(5.0, 0.0, 0.0);
        pid.set_output_limits(-100.0, 100.0);
        let out = pid.compute(100.0, 110.0, secs(0));
        assert_eq!(out, 0.0);
        assert!(pid.stats().raw_output < 0.0);
    }

    #[test]
    fn output_is_monotonic_while_error_persists() {
        let mut pid = kiln_pid();
        let mut previous = 0.0;
        for t in 0..200 {
            let out = pid.compute(120.0, 100.0, secs(t));
            assert!(out >= previous, "output decreased at t={t}: {out} < {previous}");
            assert!((0.0..=1.0).contains(&out));
            previous = out;
        }
        // 20 (P) + 40 (clamped I) = 60 %
        assert!((previous - 0.6).abs() < 1e-9);
    }

    #[test]
    fn integral_is_clamped() {
        let mut pid = kiln_pid();
        for t in 0..10_000 {
            pid.compute(140.0, 100.0, secs(t));
            assert!(pid.integral() <= 40.0 + 1e-12);
        }
        assert!((pid.integral() - 40.0).abs() < 1e-9);
    }

    #[test]
    fn control_window_bypass_drives_extremes_and_keeps_integral() {
        let mut pid = kiln_pid();
        pid.set_control_window(50.0);
        pid.compute(110.0, 100.0, secs(0));
        pid.compute(110.0, 100.0, secs(1));
        let integral = pid.integral();
        assert!(integral > 0.0);

        let cold = pid.compute(500.0, 100.0, secs(2));
        assert_eq!(cold, 1.0);
        assert!(pid.stats().bypassed);
        assert_eq!(pid.integral(), integral);

        let hot = pid.compute(100.0, 500.0, secs(3));
        assert_eq!(hot, 0.0);
        assert_eq!(pid.integral(), integral);
    }

    #[test]
    fn derivative_on_measurement_ignores_setpoint_steps() {
        let mut pid = PidController::new(0.0, 0.0, 10.0);
        pid.set_output_limits(-100.0, 100.0);
        pid.set_derivative_mode(DerivativeMode::Measurement);
        pid.compute(100.0, 50.0, secs(0));
        pid.compute(140.0, 50.0, secs(1));
        assert_eq!(pid.stats().d, 0.0);

        // Rising measurement produces a braking (negative) derivative.
        pid.compute(140.0, 52.0, secs(2));
        assert!((pid.stats().d + 20.0).abs() < 1e-9);
    }

    #[test]
    fn derivative_on_error_reacts_to_setpoint_steps() {
        let mut pid = PidController::new(0.0, 0.0, 10.0);
        pid.set_output_limits(-100.0, 100.0);
        pid.compute(100.0, 50.0, secs(0));
        pid.compute(102.0, 50.0, secs(1));
        assert!((pid.stats().d - 20.0).abs() < 1e-9);
    }

    #[test]
    fn zero_interval_is_floored() {
        let mut pid = PidController::new(0.0, 1.0, 0.0);
        pid.set_output_limits(0.0, 100.0);
        pid.compute(110.0, 100.0, secs(5));
        pid.compute(110.0, 100.0, secs(5));
        assert!(pid.stats().time_delta > 0.0);
        assert!(pid.integral().is_finite());
    }

    #[test]
    fn reset_clears_state() {
        let mut pid = kiln_pid();
        for t in 0..20 {
            pid.compute(130.0, 100.0, secs(t));
        }
        assert!(pid.integral() > 0.0);
        pid.reset();
        assert_eq!(pid.integral(), 0.0);
        assert_eq!(pid.stats(), PidStats::default());

        let mut fresh = kiln_pid();
        assert_eq!(
            pid.compute(130.0, 100.0, secs(100)),
            fresh.compute(130.0, 100.0, secs(100))
        );
    }

    #[test]
    fn from_config_applies_limits() {
        let config = PidConfig::default();
        let mut pid = PidController::from_config(&config);
        assert_eq!(pid.gains(), (1.0, 0.02, 30.0));
        // 60 degrees cold is outside the default 50 degree window.
        assert_eq!(pid.compute(160.0, 100.0, secs(0)), 1.0);
    }
}
