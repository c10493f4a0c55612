//! `kiln-kernel` – Safety
//!
//! Interlocks that decide whether a firing may continue.  The kernel never
//! drives hardware itself; it returns verdicts that the engine acts on.
//!
//! # Modules
//!
//! - [`safety`] – [`SafetyMonitor`][safety::SafetyMonitor]: emergency
//!   overtemperature, catch-up rescheduling, heating-stall detection and an
//!   optional thermocouple fault-rate limit.  Abort reasons are reported as a
//!   [`Trip`][safety::Trip].

pub mod safety;

pub use safety::{SafetyMonitor, TickObservation, Trip};
