//! Temperature acquisition: fault filtering and trimmed-mean smoothing.
//!
//! A background sampler reads the thermocouple several times per control
//! tick.  Samples flagged by the amplifier are counted and discarded; good
//! samples go into a bounded sliding window.  Once per tick the window is
//! sorted, a percentage is trimmed from each tail and the rest is averaged,
//! and the result is published as a [`Reading`].
//!
//! Faults never stop acquisition.  Whether an accumulated fault rate is
//! fatal is decided by the engine's safety layer.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use kiln_hal::Thermocouple;
use kiln_types::{AcquisitionConfig, KilnError, SensorFault, SensorSample};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Fault counters are rolled into a percentage every this many ticks.
const FAULT_PERIOD_TICKS: u32 = 2;

/// Average of `samples` after sorting and discarding `trim_percent` of the
/// entries from each end.
///
/// At least one sample always survives trimming.  Returns `None` for an
/// empty slice.
///
/// ```
/// use kiln_perception::acquisition::trimmed_mean;
///
/// let mean = trimmed_mean(&[10.0, 20.0, 20.0, 20.0, 1000.0], 20.0);
/// assert_eq!(mean, Some(20.0));
/// ```
pub fn trimmed_mean(samples: &[f64], trim_percent: f64) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(f64::total_cmp);

    let len = sorted.len();
    let chop = ((len as f64 * trim_percent.clamp(0.0, 50.0) / 100.0) as usize).min((len - 1) / 2);
    let kept = &sorted[chop..len - chop];
    Some(kept.iter().sum::<f64>() / kept.len() as f64)
}

/// Published output of the acquisition pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Reading {
    /// Filtered temperature, `None` while no good sample has been seen.
    pub temperature: Option<f64>,
    /// Percentage of bad samples over the last fault period.
    pub fault_percent: f64,
    /// Most recent non-`Ok` classification, if any.
    pub last_fault: Option<SensorFault>,
    /// Number of good samples currently in the window.
    pub window_len: usize,
}

/// Sliding-window filter over classified thermocouple samples.
#[derive(Debug, Clone)]
pub struct TemperatureAcquisition {
    window: VecDeque<f64>,
    capacity: usize,
    trim_percent: f64,
    ignore_short_errors: bool,
    ok_count: u32,
    bad_count: u32,
    fault_percent: f64,
    last_fault: Option<SensorFault>,
}

impl TemperatureAcquisition {
    pub fn new(config: &AcquisitionConfig) -> Self {
        let capacity = config.average_samples.max(1);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
            trim_percent: config.trim_percent,
            ignore_short_errors: config.ignore_short_errors,
            ok_count: 0,
            bad_count: 0,
            fault_percent: 0.0,
            last_fault: None,
        }
    }

    /// `true` when `sample` must be kept out of the window.
    pub fn is_bad(&self, sample: &SensorSample) -> bool {
        match sample.fault {
            SensorFault::Ok => false,
            SensorFault::NoConnection | SensorFault::Unknown => true,
            SensorFault::ShortToGround | SensorFault::ShortToVcc => !self.ignore_short_errors,
        }
    }

    /// Classify `sample` and add it to the window if it is good.
    ///
    /// Returns whether the sample was accepted.
    pub fn record(&mut self, sample: SensorSample) -> bool {
        if sample.fault != SensorFault::Ok {
            self.last_fault = Some(sample.fault);
        }
        if self.is_bad(&sample) || !sample.temperature.is_finite() {
            self.bad_count += 1;
            warn!(fault = ?sample.fault, "bad thermocouple sample discarded");
            return false;
        }
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(sample.temperature);
        self.ok_count += 1;
        true
    }

    /// Trimmed mean of the current window.
    pub fn filtered(&self) -> Option<f64> {
        let samples: Vec<f64> = self.window.iter().copied().collect();
        trimmed_mean(&samples, self.trim_percent)
    }

    /// Close the current fault period: compute the bad-sample percentage
    /// and reset the counters.
    pub fn roll_fault_period(&mut self) -> f64 {
        let total = self.ok_count + self.bad_count;
        self.fault_percent = if total == 0 {
            0.0
        } else {
            f64::from(self.bad_count) * 100.0 / f64::from(total)
        };
        self.ok_count = 0;
        self.bad_count = 0;
        self.fault_percent
    }

    pub fn fault_percent(&self) -> f64 {
        self.fault_percent
    }

    pub fn reading(&self) -> Reading {
        Reading {
            temperature: self.filtered(),
            fault_percent: self.fault_percent,
            last_fault: self.last_fault,
            window_len: self.window.len(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Background sampler
// ────────────────────────────────────────────────────────────────────────────

/// Handle to a running sampler thread.  Dropping it stops and joins the
/// thread.
pub struct AcquisitionHandle {
    readings: watch::Receiver<Reading>,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl AcquisitionHandle {
    /// A receiver that observes every published [`Reading`].
    pub fn readings(&self) -> watch::Receiver<Reading> {
        self.readings.clone()
    }

    /// Copy of the most recently published reading.
    pub fn latest(&self) -> Reading {
        *self.readings.borrow()
    }

    /// Stop the sampler and wait for it to exit.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take()
            && join.join().is_err()
        {
            warn!("acquisition thread panicked");
        }
    }
}

impl Drop for AcquisitionHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Start sampling `sensor` on a dedicated thread.
///
/// The sensor is read `samples_per_tick` times per `tick`; the filtered
/// reading is published once per tick.
///
/// # Errors
///
/// Returns [`KilnError::Io`] if the thread cannot be spawned.
pub fn spawn_acquisition(
    mut sensor: Box<dyn Thermocouple>,
    config: &AcquisitionConfig,
    tick: Duration,
) -> Result<AcquisitionHandle, KilnError> {
    let samples_per_tick = config.samples_per_tick.max(1);
    let interval = tick / samples_per_tick;
    let mut filter = TemperatureAcquisition::new(config);
    let (tx, rx) = watch::channel(Reading::default());
    let shutdown = Arc::new(AtomicBool::new(false));
    let stop = Arc::clone(&shutdown);

    info!(sensor = sensor.id(), ?interval, "starting temperature acquisition");
    let join = std::thread::Builder::new()
        .name("kiln-acquisition".to_string())
        .spawn(move || {
            let mut taken: u32 = 0;
            while !stop.load(Ordering::SeqCst) {
                let sample = sensor.read().unwrap_or_else(|e| {
                    warn!(error = %e, "thermocouple read failed");
                    SensorSample::faulted(SensorFault::Unknown)
                });
                filter.record(sample);
                taken += 1;

                if taken % (samples_per_tick * FAULT_PERIOD_TICKS) == 0 {
                    let percent = filter.roll_fault_period();
                    if percent > 0.0 {
                        debug!(fault_percent = percent, "thermocouple fault rate");
                    }
                }
                if taken % samples_per_tick == 0 {
                    tx.send_replace(filter.reading());
                }
                std::thread::sleep(interval);
            }
            debug!("temperature acquisition stopped");
        })?;

    Ok(AcquisitionHandle {
        readings: rx,
        shutdown,
        join: Some(join),
    })
}
