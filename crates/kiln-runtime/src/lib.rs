//! `kiln-runtime` – the firing engine and everything that keeps it running.
//!
//! # Modules
//!
//! - [`engine`] – [`OvenEngine`][engine::OvenEngine]: the IDLE / RUNNING /
//!   COMPLETE / ABORTED / STOPPED state machine and the per-tick control
//!   loop, plus [`EngineHandle`][engine::EngineHandle] for running it on its
//!   own thread.
//! - [`oven`] – [`OvenBackend`][oven::OvenBackend] with the
//!   [`SimulatedOven`][oven::SimulatedOven] and hardware-backed
//!   [`RealOven`][oven::RealOven] implementations.
//! - [`checkpoint`] – [`CheckpointStore`][checkpoint::CheckpointStore]:
//!   restart checkpoint persistence and freshness checks.
//! - [`store`] – [`ProfileStore`][store::ProfileStore] and the
//!   [`JsonDirStore`][store::JsonDirStore] directory reader.
//! - [`controller`] – [`KilnController`][controller::KilnController]: owns the
//!   snapshot cell, the watcher and the active engine; swaps ovens safely.
//! - [`telemetry`] – `tracing` subscriber set-up with optional OTLP export.

pub mod checkpoint;
pub mod controller;
pub mod engine;
pub mod oven;
pub mod store;
pub mod telemetry;

pub use checkpoint::{CheckpointStore, RestartCheckpoint};
pub use controller::KilnController;
pub use engine::{EngineCommand, EngineHandle, OvenEngine};
pub use oven::{OvenBackend, RealOven, SimulatedOven};
pub use store::{JsonDirStore, ProfileStore};
