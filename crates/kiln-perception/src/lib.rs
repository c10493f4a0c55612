//! `kiln-perception` – turns raw thermocouple samples into a trustworthy
//! chamber temperature.
//!
//! # Modules
//!
//! - [`acquisition`] – [`TemperatureAcquisition`][acquisition::TemperatureAcquisition]:
//!   fault classification, a bounded sample window and trimmed-mean
//!   filtering, plus [`spawn_acquisition`][acquisition::spawn_acquisition]
//!   which samples a [`Thermocouple`](kiln_hal::Thermocouple) on a
//!   background thread and publishes a [`Reading`][acquisition::Reading]
//!   once per tick.

pub mod acquisition;

pub use acquisition::{AcquisitionHandle, Reading, TemperatureAcquisition, spawn_acquisition, trimmed_mean};
