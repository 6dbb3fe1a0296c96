//! # Run Session
//!
//! Session controller owned by the host's workout screen. Replaces a
//! process-wide singleton: the host constructs one per run and injects the
//! user's stride model.
//!
//! ## Architecture
//!
//! - Samples go to the [`CadenceEstimator`] window and to a session log used
//!   for the final cadence.
//! - Fixes go to the [`DistanceAccumulator`].
//! - Every applied cadence tick is forwarded to the accumulator's pedometer
//!   fallback with the sample-clock time it covered. Ticks from a previous
//!   run are dropped.
//!
//! All methods take `&self`; the session can be shared between the sample
//! delivery context and the UI through an `Arc`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::cadence::{CadenceConfig, CadenceEstimator, CadenceListener, CadenceUpdate};
use crate::distance::{DistanceAccumulator, DistanceConfig, SignalQuality};
use crate::stride::{CalibrationRecord, StrideModel};
use crate::{GpsFix, GpsPoint, SensorSample};

/// Configuration for a run session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct SessionConfig {
    pub cadence: CadenceConfig,
    pub distance: DistanceConfig,
}

/// What the host gets back when a session ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Cadence over the whole session in SPM (0 = unknown)
    pub final_cadence: f64,
    pub total_steps: u64,
    /// Meters
    pub total_distance: f64,
    pub gps_distance: f64,
    pub pedometer_distance: f64,
    pub path: Vec<GpsPoint>,
    /// Length of the drawn path in meters, poor fixes included
    pub path_length: f64,
    /// First to last sample, in seconds
    pub duration_seconds: f64,
    pub average_heart_rate: Option<f64>,
    pub max_heart_rate: Option<u16>,
    pub stride_model: Option<StrideModel>,
}

impl SessionSummary {
    /// Turn a run over the calibration course into a calibration record.
    /// `None` if the run has no steps, cadence or duration.
    pub fn to_calibration_record(&self) -> Option<CalibrationRecord> {
        let total_steps = u32::try_from(self.total_steps).ok()?;
        let record = CalibrationRecord::new(total_steps, self.final_cadence, self.duration_seconds);
        record.validate().ok()?;
        Some(record)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Forwards cadence ticks into the pedometer fallback.
struct DistanceForwarder {
    distance: Arc<Mutex<DistanceAccumulator>>,
    /// Generation the accumulator was last reset for
    generation: Arc<AtomicU64>,
}

impl CadenceListener for DistanceForwarder {
    fn on_cadence_update(&self, update: &CadenceUpdate) {
        let mut distance = self.distance.lock().unwrap_or_else(PoisonError::into_inner);
        // Checked under the distance lock, so a reset cannot slip in between
        if update.generation != self.generation.load(Ordering::SeqCst) {
            debug!(
                "[RunSession] Dropping cadence update from run {}",
                update.generation
            );
            return;
        }
        distance.on_cadence_update(update.cadence, update.elapsed_seconds);
    }
}

/// One run: cadence, steps, distance and path.
pub struct RunSession {
    cadence: CadenceEstimator,
    distance: Arc<Mutex<DistanceAccumulator>>,
    generation: Arc<AtomicU64>,
    samples: Mutex<Vec<SensorSample>>,
}

impl RunSession {
    /// Create a session with default configuration.
    pub fn new() -> Self {
        Self::with_config(SessionConfig::default())
    }

    pub fn with_config(config: SessionConfig) -> Self {
        let cadence = CadenceEstimator::with_config(config.cadence);
        let distance = Arc::new(Mutex::new(DistanceAccumulator::with_config(config.distance)));
        let generation = Arc::new(AtomicU64::new(cadence.tick_token().generation()));

        cadence.add_listener(Arc::new(DistanceForwarder {
            distance: Arc::clone(&distance),
            generation: Arc::clone(&generation),
        }));

        Self {
            cadence,
            distance,
            generation,
            samples: Mutex::new(Vec::new()),
        }
    }

    fn lock_distance(&self) -> MutexGuard<'_, DistanceAccumulator> {
        self.distance.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_samples(&self) -> MutexGuard<'_, Vec<SensorSample>> {
        self.samples.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Clear all per-session state and start monitoring. A bound stride model
    /// carries over.
    pub fn start(&self) {
        // New generation first: a tick from the previous run that is still
        // in flight is then dropped by the forwarder
        self.lock_samples().clear();
        self.cadence.start();
        let generation = self.cadence.tick_token().generation();

        let mut distance = self.lock_distance();
        distance.reset_distance();
        self.generation.store(generation, Ordering::SeqCst);
        drop(distance);

        info!("[RunSession] Started");
    }

    /// Stop monitoring and summarize the session.
    ///
    /// A last tick runs first so steps and pedometer distance since the
    /// previous tick are included.
    pub fn stop(&self) -> SessionSummary {
        self.cadence.tick();
        self.cadence.stop();

        let samples = std::mem::take(&mut *self.lock_samples());
        let final_cadence = if samples.is_empty() {
            self.cadence.current_cadence()
        } else {
            self.cadence.finalize(&samples)
        };

        let (first, last) = samples.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), s| {
            (lo.min(s.timestamp), hi.max(s.timestamp))
        });
        let duration_seconds = if last > first { last - first } else { 0.0 };

        let heart_rates: Vec<u16> = samples.iter().filter_map(|s| s.heart_rate).collect();
        let average_heart_rate = if heart_rates.is_empty() {
            None
        } else {
            Some(heart_rates.iter().map(|&hr| hr as f64).sum::<f64>() / heart_rates.len() as f64)
        };
        let max_heart_rate = heart_rates.iter().copied().max();

        let distance = self.lock_distance();
        let summary = SessionSummary {
            final_cadence,
            total_steps: self.cadence.current_steps(),
            total_distance: distance.total_distance(),
            gps_distance: distance.gps_distance(),
            pedometer_distance: distance.pedometer_distance(),
            path: distance.path().to_vec(),
            path_length: distance.path_length(),
            duration_seconds,
            average_heart_rate,
            max_heart_rate,
            stride_model: distance.stride_model().cloned(),
        };
        drop(distance);

        info!(
            "[RunSession] Stopped: {:.0}m, {} steps, {:.1} SPM over {:.0}s",
            summary.total_distance, summary.total_steps, summary.final_cadence, summary.duration_seconds
        );
        summary
    }

    pub fn is_active(&self) -> bool {
        self.cadence.is_active()
    }

    // ========================================================================
    // Inputs
    // ========================================================================

    /// Feed one inertial sample.
    pub fn add_sample(&self, sample: SensorSample) {
        if !self.cadence.is_active() || !sample.timestamp.is_finite() {
            return;
        }
        self.lock_samples().push(sample.clone());
        self.cadence.add_sample(sample);
    }

    /// Feed one GPS fix. Returns the distance it credited.
    pub fn add_location(&self, fix: GpsFix) -> f64 {
        self.lock_distance().add_location(fix)
    }

    /// Bind the user's stride model for the pedometer fallback.
    pub fn set_stride_model(&self, model: StrideModel) {
        self.lock_distance().set_stride_model(model);
    }

    /// Run a cadence tick now instead of waiting for the scheduler.
    pub fn tick(&self) -> Option<CadenceUpdate> {
        self.cadence.tick()
    }

    /// Register an extra listener for cadence ticks.
    pub fn add_listener(&self, listener: Arc<dyn CadenceListener>) {
        self.cadence.add_listener(listener);
    }

    // ========================================================================
    // Outputs
    // ========================================================================

    pub fn current_cadence(&self) -> f64 {
        self.cadence.current_cadence()
    }

    pub fn current_steps(&self) -> u64 {
        self.cadence.current_steps()
    }

    pub fn total_distance(&self) -> f64 {
        self.lock_distance().total_distance()
    }

    pub fn path(&self) -> Vec<GpsPoint> {
        self.lock_distance().path().to_vec()
    }

    pub fn signal_quality(&self) -> SignalQuality {
        self.lock_distance().signal_quality()
    }

    pub fn stride_model(&self) -> Option<StrideModel> {
        self.lock_distance().stride_model().cloned()
    }

    pub fn cadence_estimator(&self) -> &CadenceEstimator {
        &self.cadence
    }
}

impl Default for RunSession {
    fn default() -> Self {
        Self::new()
    }
}
