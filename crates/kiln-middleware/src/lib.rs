//! `kiln-middleware` – status fan-out.
//!
//! # Modules
//!
//! - [`observer`] – [`ObserverSink`][observer::ObserverSink]: the only
//!   contract a transport must satisfy to receive live status, with
//!   [`ChannelSink`][observer::ChannelSink] (tokio mpsc) and a
//!   `tokio::sync::broadcast` implementation.
//! - [`watcher`] – [`OvenWatcher`][watcher::OvenWatcher]: polls the engine's
//!   snapshot cell, keeps a bounded run history, replays a down-sampled
//!   backlog to new observers and pushes every snapshot to live ones.

pub mod observer;
pub mod watcher;

pub use observer::{ChannelSink, ObserverSink};
pub use watcher::{Backlog, ObserverId, OvenWatcher, ProfileInfo};
