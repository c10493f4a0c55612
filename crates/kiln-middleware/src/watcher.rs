//! [`OvenWatcher`] – samples engine snapshots and fans them out to observers.
//!
//! The watcher polls the engine's snapshot cell on its own cadence (faster
//! while a run is active or just completed, slower otherwise).  Snapshots
//! taken while RUNNING or COMPLETE are appended to a bounded history, which
//! is cleared when the engine goes back to IDLE or a new run starts.
//!
//! A new observer first receives a *backlog* message:
//!
//! ```json
//! {"type": "backlog",
//!  "profile": {"name": "cone-6", "data": [[0, 70], [3600, 1000]], "type": "profile"},
//!  "log": [ /* down-sampled snapshots */ ]}
//! ```
//!
//! and every snapshot after that.  Observers whose send fails, or that report
//! themselves disconnected, are dropped.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use kiln_types::{EngineSnapshot, EngineState, KilnError, Profile, WatcherConfig};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::observer::ObserverSink;

// ────────────────────────────────────────────────────────────────────────────
// Wire types
// ────────────────────────────────────────────────────────────────────────────

/// Profile metadata as replayed to observers.
#[derive(Debug, Clone, Serialize)]
pub struct ProfileInfo<'a> {
    pub name: &'a str,
    pub data: &'a [(f64, f64)],
    #[serde(rename = "type")]
    pub kind: &'static str,
}

impl<'a> From<&'a Profile> for ProfileInfo<'a> {
    fn from(profile: &'a Profile) -> Self {
        Self {
            name: profile.name(),
            data: profile.keyframes(),
            kind: "profile",
        }
    }
}

/// First message sent to every new observer.
#[derive(Debug, Clone, Serialize)]
pub struct Backlog<'a> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub profile: Option<ProfileInfo<'a>>,
    pub log: Vec<EngineSnapshot>,
}

/// Handle returned by [`OvenWatcher::add_observer`].
pub type ObserverId = Uuid;

// ────────────────────────────────────────────────────────────────────────────
// Watcher
// ────────────────────────────────────────────────────────────────────────────

struct WatcherInner {
    history: VecDeque<EngineSnapshot>,
    observers: Vec<(ObserverId, Box<dyn ObserverSink>)>,
    profile: Option<Profile>,
    last_state: EngineState,
}

/// History recorder and observer multiplexer.
///
/// Share it behind an [`Arc`]; all methods take `&self`.
pub struct OvenWatcher {
    snapshots: watch::Receiver<EngineSnapshot>,
    config: WatcherConfig,
    inner: Mutex<WatcherInner>,
}

impl OvenWatcher {
    /// Watch the snapshot cell behind `snapshots`.
    pub fn new(snapshots: watch::Receiver<EngineSnapshot>, config: &WatcherConfig) -> Self {
        Self {
            snapshots,
            config: config.clone(),
            inner: Mutex::new(WatcherInner {
                history: VecDeque::new(),
                observers: Vec::new(),
                profile: None,
                last_state: EngineState::Idle,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, WatcherInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set the profile shown in backlogs.  `None` clears it.
    pub fn set_profile(&self, profile: Option<Profile>) {
        self.lock().profile = profile;
    }

    pub fn profile(&self) -> Option<Profile> {
        self.lock().profile.clone()
    }

    pub fn observer_count(&self) -> usize {
        self.lock().observers.len()
    }

    pub fn history_len(&self) -> usize {
        self.lock().history.len()
    }

    /// Feed one snapshot into the history.
    pub fn record(&self, snapshot: &EngineSnapshot) {
        let mut inner = self.lock();
        let previous = std::mem::replace(&mut inner.last_state, snapshot.state);

        let went_idle = snapshot.state == EngineState::Idle && previous != EngineState::Idle;
        let new_run = snapshot.state == EngineState::Running && previous != EngineState::Running;
        if went_idle || new_run {
            debug!(from = %previous, to = %snapshot.state, "clearing watcher history");
            inner.history.clear();
        }

        if snapshot.state.is_recording() {
            if inner.history.len() >= self.config.history_limit.max(1) {
                inner.history.pop_front();
            }
            inner.history.push_back(snapshot.clone());
        }
    }

    /// Read the current snapshot, record it and push it to every observer.
    pub fn poll_once(&self) -> EngineSnapshot {
        let snapshot = self.snapshots.borrow().clone();
        self.record(&snapshot);
        self.notify_all(&snapshot);
        snapshot
    }

    /// History down-sampled to at most `max_points` entries.
    ///
    /// Entries are ordered by elapsed time and picked at a uniform stride
    /// that always includes the first and the last point.
    pub fn sampled_history(&self, max_points: usize) -> Vec<EngineSnapshot> {
        sample_history(&self.lock().history, max_points)
    }

    /// Send the backlog to `sink`, then register it for live updates.
    ///
    /// # Errors
    ///
    /// Returns the sink's error (and does not register it) if the backlog
    /// cannot be delivered.
    pub fn add_observer(&self, sink: Box<dyn ObserverSink>) -> Result<ObserverId, KilnError> {
        // Held until the sink is registered so no recorded snapshot falls
        // between the backlog and the live stream.
        let mut inner = self.lock();
        let backlog = Backlog {
            kind: "backlog",
            profile: inner.profile.as_ref().map(ProfileInfo::from),
            log: sample_history(&inner.history, self.config.backlog_points),
        };
        let points = backlog.log.len();
        let message = serde_json::to_string(&backlog).map_err(|e| KilnError::Serialization(e.to_string()))?;
        if let Err(e) = sink.send(&message) {
            warn!(error = %e, "could not send backlog to new observer");
            return Err(e);
        }

        let id = Uuid::new_v4();
        inner.observers.push((id, sink));
        info!(observer = %id, points, "observer registered");
        Ok(id)
    }

    /// Unregister an observer.  Returns `false` if it was already gone.
    pub fn remove_observer(&self, id: ObserverId) -> bool {
        let mut inner = self.lock();
        let before = inner.observers.len();
        inner.observers.retain(|(oid, _)| *oid != id);
        inner.observers.len() != before
    }

    /// Push `snapshot` to every observer, dropping the ones that fail.
    pub fn notify_all(&self, snapshot: &EngineSnapshot) {
        let message = match serde_json::to_string(snapshot) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "could not serialize snapshot");
                return;
            }
        };
        let mut inner = self.lock();
        inner.observers.retain(|(id, sink)| {
            if !sink.is_connected() {
                debug!(observer = %id, "observer disconnected");
                return false;
            }
            match sink.send(&message) {
                Ok(()) => true,
                Err(e) => {
                    warn!(observer = %id, error = %e, "dropping observer");
                    false
                }
            }
        });
    }

    /// Run the polling loop on the tokio runtime until `shutdown` flips to
    /// `true` or its sender is dropped.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("oven watcher started");
            loop {
                let snapshot = self.poll_once();
                let interval = if snapshot.state.is_recording() {
                    self.config.running_interval()
                } else {
                    self.config.idle_interval()
                };
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("oven watcher stopped");
        })
    }
}

fn sample_history(history: &VecDeque<EngineSnapshot>, max_points: usize) -> Vec<EngineSnapshot> {
    let mut points: Vec<EngineSnapshot> = history.iter().cloned().collect();
    points.sort_by(|a, b| a.elapsed_seconds.total_cmp(&b.elapsed_seconds));
    downsample(points, max_points)
}

/// Uniform-stride selection of at most `max_points` entries, keeping both
/// endpoints when `max_points >= 2`.
fn downsample<T>(points: Vec<T>, max_points: usize) -> Vec<T> {
    let len = points.len();
    if len <= max_points {
        return points;
    }
    match max_points {
        0 => Vec::new(),
        1 => points.into_iter().last().into_iter().collect(),
        _ => {
            let mut picked = Vec::with_capacity(max_points);
            let mut next = 0;
            for (idx, point) in points.into_iter().enumerate() {
                if picked.len() < max_points && idx == next * (len - 1) / (max_points - 1) {
                    picked.push(point);
                    next += 1;
                }
            }
            picked
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::ChannelSink;
    use std::time::Duration;

    struct BrokenSink;

    impl ObserverSink for BrokenSink {
        fn send(&self, _message: &str) -> Result<(), KilnError> {
            Err(KilnError::ObserverClosed)
        }
    }

    /// Accepts the backlog, then fails every send.
    struct FlakySink(Mutex<u32>);

    impl ObserverSink for FlakySink {
        fn send(&self, _message: &str) -> Result<(), KilnError> {
            let mut sent = self.0.lock().unwrap();
            *sent += 1;
            if *sent > 1 {
                Err(KilnError::ObserverClosed)
            } else {
                Ok(())
            }
        }
    }

    fn snapshot(state: EngineState, elapsed: f64) -> EngineSnapshot {
        EngineSnapshot {
            state,
            elapsed_seconds: elapsed,
            temperature: 70.0 + elapsed,
            ..EngineSnapshot::default()
        }
    }

    fn watcher() -> (watch::Sender<EngineSnapshot>, OvenWatcher) {
        let (tx, rx) = watch::channel(EngineSnapshot::default());
        (tx, OvenWatcher::new(rx, &WatcherConfig::default()))
    }

    #[test]
    fn fresh_backlog_is_empty_without_profile() -> Result<(), Box<dyn std::error::Error>> {
        let (_tx, watcher) = watcher();
        let (sink, mut rx) = ChannelSink::new();
        watcher.add_observer(Box::new(sink))?;

        let backlog: serde_json::Value = serde_json::from_str(&rx.try_recv()?)?;
        assert_eq!(backlog["type"], "backlog");
        assert!(backlog["profile"].is_null());
        assert_eq!(backlog["log"].as_array().map(Vec::len), Some(0));
        Ok(())
    }

    #[test]
    fn backlog_carries_profile_metadata() -> Result<(), Box<dyn std::error::Error>> {
        let (_tx, watcher) = watcher();
        watcher.set_profile(Some(Profile::new("cone-6", vec![(0.0, 70.0), (3600.0, 1000.0)])?));
        let (sink, mut rx) = ChannelSink::new();
        watcher.add_observer(Box::new(sink))?;

        let backlog: serde_json::Value = serde_json::from_str(&rx.try_recv()?)?;
        assert_eq!(backlog["profile"]["name"], "cone-6");
        assert_eq!(backlog["profile"]["type"], "profile");
        assert_eq!(backlog["profile"]["data"][1][1], 1000.0);
        Ok(())
    }

    #[test]
    fn history_only_records_active_runs() {
        let (_tx, watcher) = watcher();
        watcher.record(&snapshot(EngineState::Idle, 0.0));
        assert_eq!(watcher.history_len(), 0);

        for t in 0..5 {
            watcher.record(&snapshot(EngineState::Running, f64::from(t)));
        }
        watcher.record(&snapshot(EngineState::Complete, 5.0));
        watcher.record(&snapshot(EngineState::Aborted, 5.0));
        assert_eq!(watcher.history_len(), 6);

        watcher.record(&snapshot(EngineState::Idle, 0.0));
        assert_eq!(watcher.history_len(), 0);
    }

    #[test]
    fn new_run_clears_previous_history() {
        let (_tx, watcher) = watcher();
        for t in 0..3 {
            watcher.record(&snapshot(EngineState::Running, f64::from(t)));
        }
        watcher.record(&snapshot(EngineState::Stopped, 3.0));
        watcher.record(&snapshot(EngineState::Running, 0.0));
        assert_eq!(watcher.history_len(), 1);
    }

    #[test]
    fn history_is_bounded() {
        let (_tx, rx) = watch::channel(EngineSnapshot::default());
        let config = WatcherConfig {
            history_limit: 10,
            ..WatcherConfig::default()
        };
        let watcher = OvenWatcher::new(rx, &config);
        for t in 0..25 {
            watcher.record(&snapshot(EngineState::Running, f64::from(t)));
        }
        let history = watcher.sampled_history(100);
        assert_eq!(history.len(), 10);
        assert_eq!(history[0].elapsed_seconds, 15.0);
    }

    #[test]
    fn sampling_keeps_order_and_endpoints() {
        let (_tx, watcher) = watcher();
        // Recorded out of order on purpose.
        for t in (0..1000).rev() {
            watcher.lock().history.push_back(snapshot(EngineState::Running, f64::from(t)));
        }
        let sampled = watcher.sampled_history(100);
        assert_eq!(sampled.len(), 100);
        assert_eq!(sampled.first().map(|s| s.elapsed_seconds), Some(0.0));
        assert_eq!(sampled.last().map(|s| s.elapsed_seconds), Some(999.0));
        assert!(sampled.windows(2).all(|w| w[0].elapsed_seconds < w[1].elapsed_seconds));
    }

    #[test]
    fn downsample_edge_cases() {
        assert_eq!(downsample(vec![1, 2, 3], 5), vec![1, 2, 3]);
        assert_eq!(downsample(vec![1, 2, 3], 0), Vec::<i32>::new());
        assert_eq!(downsample(vec![1, 2, 3], 1), vec![3]);
        assert_eq!(downsample((0..10).collect(), 2), vec![0, 9]);
        assert_eq!(downsample((0..10).collect(), 4), vec![0, 3, 6, 9]);
    }

    #[test]
    fn failing_observers_are_dropped() -> Result<(), Box<dyn std::error::Error>> {
        let (_tx, watcher) = watcher();
        assert!(watcher.add_observer(Box::new(BrokenSink)).is_err());
        assert_eq!(watcher.observer_count(), 0);

        let (good, mut rx) = ChannelSink::new();
        let (gone, gone_rx) = ChannelSink::new();
        watcher.add_observer(Box::new(good))?;
        watcher.add_observer(Box::new(gone))?;
        watcher.add_observer(Box::new(FlakySink(Mutex::new(0))))?;
        drop(gone_rx);
        assert_eq!(watcher.observer_count(), 3);

        watcher.notify_all(&snapshot(EngineState::Running, 1.0));
        assert_eq!(watcher.observer_count(), 1);

        let _backlog = rx.try_recv()?;
        let live: serde_json::Value = serde_json::from_str(&rx.try_recv()?)?;
        assert_eq!(live["state"], "RUNNING");
        assert_eq!(live["runtime"], 1.0);
        Ok(())
    }

    #[test]
    fn observer_added_mid_run_misses_no_snapshot() -> Result<(), Box<dyn std::error::Error>> {
        const TICKS: u32 = 2_000;
        let (tx, rx) = watch::channel(EngineSnapshot::default());
        let config = WatcherConfig {
            backlog_points: TICKS as usize,
            ..WatcherConfig::default()
        };
        let watcher = Arc::new(OvenWatcher::new(rx, &config));

        let poller = {
            let watcher = Arc::clone(&watcher);
            std::thread::spawn(move || {
                for t in 1..=TICKS {
                    tx.send_replace(snapshot(EngineState::Running, f64::from(t)));
                    watcher.poll_once();
                }
            })
        };
        let mut observers = Vec::new();
        for _ in 0..20 {
            let (sink, rx) = ChannelSink::new();
            watcher.add_observer(Box::new(sink))?;
            observers.push(rx);
            std::thread::yield_now();
        }
        poller.join().map_err(|_| "poller panicked")?;

        for mut rx in observers {
            let backlog: serde_json::Value = serde_json::from_str(&rx.try_recv()?)?;
            let mut seen: Vec<u64> = backlog["log"]
                .as_array()
                .ok_or("log is not an array")?
                .iter()
                .filter_map(|s| s["runtime"].as_f64())
                .map(|t| t as u64)
                .collect();
            while let Ok(message) = rx.try_recv() {
                let live: serde_json::Value = serde_json::from_str(&message)?;
                seen.extend(live["runtime"].as_f64().map(|t| t as u64));
            }
            seen.sort_unstable();
            seen.dedup();
            // Every snapshot from the first one seen onward reached the observer.
            let first = seen.first().copied().ok_or("observer saw nothing")?;
            assert_eq!(seen, (first..=u64::from(TICKS)).collect::<Vec<_>>());
        }
        Ok(())
    }

    #[test]
    fn remove_observer_unregisters() -> Result<(), Box<dyn std::error::Error>> {
        let (_tx, watcher) = watcher();
        let (sink, _rx) = ChannelSink::new();
        let id = watcher.add_observer(Box::new(sink))?;
        assert!(watcher.remove_observer(id));
        assert!(!watcher.remove_observer(id));
        Ok(())
    }

    #[tokio::test]
    async fn spawned_watcher_streams_snapshots() -> Result<(), Box<dyn std::error::Error>> {
        let (tx, rx) = watch::channel(EngineSnapshot::default());
        let config = WatcherConfig {
            running_seconds: 0.01,
            idle_seconds: 0.01,
            ..WatcherConfig::default()
        };
        let watcher = Arc::new(OvenWatcher::new(rx, &config));
        let (sink, mut messages) = ChannelSink::new();
        watcher.add_observer(Box::new(sink))?;

        let (stop_tx, stop_rx) = watch::channel(false);
        let task = Arc::clone(&watcher).spawn(stop_rx);
        tx.send_replace(snapshot(EngineState::Running, 42.0));

        let found = tokio::time::timeout(Duration::from_secs(2), async {
            while let Some(msg) = messages.recv().await {
                if msg.contains("\"runtime\":42.0") {
                    return true;
                }
            }
            false
        })
        .await?;
        assert!(found);

        stop_tx.send(true)?;
        task.await?;
        assert!(watcher.history_len() >= 1);
        Ok(())
    }
}
