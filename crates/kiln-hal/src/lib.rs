//! `kiln-hal` – Hardware Abstraction Layer
//!
//! The contracts the control engine drives hardware through, plus the pure
//! control law that turns a setpoint and a measurement into a heat fraction.
//!
//! # Modules
//!
//! - [`heater`] – [`HeatOutput`]: the solid-state relay. Each call blocks for
//!   the commanded duration, which paces the control loop.
//! - [`thermocouple`] – [`Thermocouple`] and the MAX31855 frame decoder.
//! - [`kill_switch`] – [`KillSwitch`]: independent hard power cutoff.
//! - [`pid`] – [`PidController`]: PID with anti-windup, selectable
//!   derivative source and a control-window bypass.
//! - [`clock`] – [`Clock`] abstraction with wall-clock and manual variants.
//! - [`sim`] – thermal model and stub drivers for headless runs and tests.

pub mod clock;
pub mod heater;
pub mod kill_switch;
pub mod pid;
pub mod sim;
pub mod thermocouple;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use heater::HeatOutput;
pub use kill_switch::KillSwitch;
pub use pid::PidController;
pub use thermocouple::{FrameSource, Max31855, Thermocouple, decode_max31855};
