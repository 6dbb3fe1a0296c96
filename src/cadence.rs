//! # Cadence Estimation
//!
//! Converts a raw wrist/ankle inertial stream into footstrike events, a
//! steps-per-minute cadence and a cumulative step count.
//!
//! ## Architecture
//!
//! - [`FootstrikeDetector`] is a three-phase state machine over `gyro_z` and
//!   `accel_y`: a swing phase followed by a sharp backward rotation marks a
//!   footstrike.
//! - [`compute_cadence`] runs the detector over a slice of samples and turns
//!   the peak timestamps into SPM, returning `0.0` whenever the answer is
//!   unknown.
//! - [`CadenceEstimator`] owns a sliding 10 s window fed by a high-frequency
//!   producer and recomputed every 3 s by a [`PeriodicTask`].
//!
//! A single sensor only sees one leg, so every detected peak stands for two
//! steps.
//!
//! ## Example
//! ```rust
//! use stride_meter::cadence::{compute_cadence, CadenceConfig};
//! use stride_meter::SensorSample;
//!
//! // 2 s at 20 Hz with footstrikes at 0.5 s and 1.5 s
//! let samples: Vec<SensorSample> = (0..40)
//!     .map(|i| {
//!         let gyro_z = if i == 10 || i == 30 { -3.0 } else { 0.5 };
//!         SensorSample::new(i as f64 / 20.0, [1.0, 0.5, 0.0], [0.0, 0.0, gyro_z])
//!     })
//!     .collect();
//!
//! let spm = compute_cadence(&samples, &CadenceConfig::default());
//! assert_eq!(spm, 120.0);
//! ```

use std::collections::{HashSet, VecDeque};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::scheduler::PeriodicTask;
use crate::SensorSample;

/// Each detected peak is one foot; double it for bilateral steps.
pub const STEPS_PER_PEAK: u64 = 2;

// ============================================================================
// Configuration
// ============================================================================

/// Which footstrike detector to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum DetectorKind {
    /// Three-phase gyro_z / accel_y state machine
    #[default]
    StateMachine,
    /// Single-sample acceleration/rotation thresholds with a refractory gap.
    /// Kept for comparison against recorded traces; not validated as primary.
    Threshold,
}

/// Configuration for cadence estimation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct CadenceConfig {
    /// Length of the sliding sample window in seconds.
    /// Default: 10.0
    pub window_seconds: f64,

    /// How often the window is recomputed while monitoring.
    /// Default: 3.0 seconds
    pub update_interval_seconds: f64,

    /// Spawn a background ticker on `start()`. When false the host drives
    /// `tick()` itself, once per `update_interval_seconds`.
    /// Default: true
    pub auto_tick: bool,

    /// Samples required before a cadence is attempted (~1 s at 20 Hz).
    /// Default: 20
    pub min_samples: u32,

    /// Lowest plausible cadence; anything slower is treated as noise.
    /// Default: 60.0 SPM
    pub min_spm: f64,

    /// Highest plausible cadence.
    /// Default: 300.0 SPM
    pub max_spm: f64,

    /// gyro_z at or below this value (rad/s) marks a footstrike.
    /// Default: -2.0
    pub strike_gyro_z: f64,

    /// Detector used for peaks.
    /// Default: StateMachine
    pub detector: DetectorKind,

    /// Threshold detector: minimum forward acceleration in g.
    /// Default: 1.5
    pub threshold_accel_x: f64,

    /// Threshold detector: minimum spacing between peaks in seconds.
    /// Default: 0.35
    pub threshold_min_spacing: f64,
}

impl Default for CadenceConfig {
    fn default() -> Self {
        Self {
            window_seconds: 10.0,
            update_interval_seconds: 3.0,
            auto_tick: true,
            min_samples: 20,
            min_spm: 60.0,
            max_spm: 300.0,
            strike_gyro_z: -2.0,
            detector: DetectorKind::StateMachine,
            threshold_accel_x: 1.5,
            threshold_min_spacing: 0.35,
        }
    }
}

// ============================================================================
// Footstrike Detection
// ============================================================================

/// Phase of the footstrike state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrikePhase {
    /// Waiting for forward rotation with positive accel_y (leg swinging forward)
    WaitingForSwingStart,
    /// In swing, waiting for the rapid backward rotation of ground contact
    WaitingForStrike,
    /// Strike recorded; waiting for forward rotation before re-arming
    Cooldown,
}

/// Stateful footstrike detector. Feed samples in time order.
#[derive(Debug, Clone)]
pub struct FootstrikeDetector {
    phase: StrikePhase,
    strike_gyro_z: f64,
}

impl FootstrikeDetector {
    pub fn new(strike_gyro_z: f64) -> Self {
        Self {
            phase: StrikePhase::WaitingForSwingStart,
            strike_gyro_z,
        }
    }

    pub fn phase(&self) -> StrikePhase {
        self.phase
    }

    /// Advance by one sample. Returns `true` when this sample is a footstrike.
    ///
    /// At most one transition happens per sample.
    pub fn update(&mut self, sample: &SensorSample) -> bool {
        match self.phase {
            StrikePhase::WaitingForSwingStart => {
                if sample.gyro_z > 0.0 && sample.accel_y > 0.0 {
                    self.phase = StrikePhase::WaitingForStrike;
                }
                false
            }
            StrikePhase::WaitingForStrike => {
                if sample.gyro_z <= self.strike_gyro_z {
                    self.phase = StrikePhase::Cooldown;
                    true
                } else {
                    false
                }
            }
            StrikePhase::Cooldown => {
                if sample.gyro_z > 0.0 {
                    self.phase = StrikePhase::WaitingForSwingStart;
                }
                false
            }
        }
    }

    pub fn reset(&mut self) {
        self.phase = StrikePhase::WaitingForSwingStart;
    }
}

/// Timestamps of footstrikes in `samples` (expected in time order).
pub fn detect_peaks(samples: &[SensorSample], config: &CadenceConfig) -> Vec<f64> {
    match config.detector {
        DetectorKind::StateMachine => {
            let mut detector = FootstrikeDetector::new(config.strike_gyro_z);
            samples
                .iter()
                .filter(|s| detector.update(s))
                .map(|s| s.timestamp)
                .collect()
        }
        DetectorKind::Threshold => detect_threshold_peaks(samples, config),
    }
}

fn detect_threshold_peaks(samples: &[SensorSample], config: &CadenceConfig) -> Vec<f64> {
    let mut peaks = Vec::new();
    let mut last_peak: Option<f64> = None;

    for s in samples {
        let candidate = s.accel_x >= config.threshold_accel_x && s.accel_y < 0.0 && s.gyro_z < 0.0;
        if !candidate {
            continue;
        }
        let spaced = last_peak.map_or(true, |t| s.timestamp - t >= config.threshold_min_spacing);
        if spaced {
            peaks.push(s.timestamp);
            last_peak = Some(s.timestamp);
        }
    }

    peaks
}

// ============================================================================
// Cadence Computation
// ============================================================================

/// Convert footstrike timestamps into SPM. Returns `0.0` when indeterminate.
pub fn cadence_from_peaks(peaks: &[f64], config: &CadenceConfig) -> f64 {
    if peaks.len() < 2 {
        return 0.0;
    }

    let elapsed = peaks[peaks.len() - 1] - peaks[0];
    if !elapsed.is_finite() || elapsed <= 0.0 {
        debug!("[CadenceEstimator] Non-positive peak span {:.3}s", elapsed);
        return 0.0;
    }

    let total_steps = (peaks.len() - 1) as f64 * STEPS_PER_PEAK as f64;
    let spm = total_steps / elapsed * 60.0;

    if spm < config.min_spm || spm > config.max_spm {
        debug!(
            "[CadenceEstimator] Rejecting implausible cadence {:.1} SPM",
            spm
        );
        return 0.0;
    }

    spm
}

/// Compute cadence in SPM over `samples`. Returns `0.0` when there are too
/// few samples or peaks, or when the result is implausible.
///
/// Samples out of time order are sorted on a copy first.
pub fn compute_cadence(samples: &[SensorSample], config: &CadenceConfig) -> f64 {
    if samples.len() < config.min_samples as usize {
        return 0.0;
    }

    let in_order = samples.windows(2).all(|w| w[0].timestamp <= w[1].timestamp);
    let peaks = if in_order {
        detect_peaks(samples, config)
    } else {
        let mut sorted = samples.to_vec();
        sorted.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        detect_peaks(&sorted, config)
    };

    cadence_from_peaks(&peaks, config)
}

// ============================================================================
// Notifications
// ============================================================================

/// What a tick publishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct CadenceUpdate {
    /// Cadence over the current window in SPM (0 = unknown)
    pub cadence: f64,
    /// Cumulative bilateral steps since `start()`
    pub total_steps: u64,
    /// Steps added by this tick
    pub new_steps: u64,
    /// Samples in the window at the time of the tick
    pub window_samples: u32,
    /// Sample-clock seconds covered since the previous applied tick
    pub elapsed_seconds: f64,
    /// Run the tick belongs to; bumped by every `start()` and `stop()`
    pub generation: u64,
}

/// Receives cadence updates from the estimator's tick.
///
/// Called on the ticking thread, outside the estimator's lock. An update
/// from a superseded run can still arrive after a restart; its `generation`
/// no longer matches [`CadenceEstimator::tick_token`].
pub trait CadenceListener: Send + Sync {
    fn on_cadence_update(&self, update: &CadenceUpdate);
}

struct ChannelListener {
    tx: Mutex<mpsc::Sender<CadenceUpdate>>,
}

impl CadenceListener for ChannelListener {
    fn on_cadence_update(&self, update: &CadenceUpdate) {
        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        tx.send(update.clone()).ok();
    }
}

/// Generation captured when a tick was scheduled. A tick only applies if the
/// estimator has not been stopped or restarted since.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickToken(u64);

impl TickToken {
    pub fn generation(&self) -> u64 {
        self.0
    }
}

// ============================================================================
// Cadence Estimator
// ============================================================================

#[derive(Debug, Default)]
struct CadenceState {
    window: VecDeque<SensorSample>,
    /// Peak timestamps (as bits) already added to `total_steps`
    counted_peaks: HashSet<u64>,
    total_steps: u64,
    cadence: f64,
    /// Newest sample timestamp already covered by an applied tick
    tick_mark: Option<f64>,
    generation: u64,
    active: bool,
}

struct Shared {
    config: CadenceConfig,
    state: Mutex<CadenceState>,
    listeners: Mutex<Vec<Arc<dyn CadenceListener>>>,
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, CadenceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn run_tick(&self, token: TickToken) -> Option<CadenceUpdate> {
        // Snapshot under the lock, compute outside it
        let snapshot: Vec<SensorSample> = {
            let state = self.lock_state();
            if !state.active || state.generation != token.0 {
                return None;
            }
            state.window.iter().cloned().collect()
        };

        let peaks = if snapshot.len() >= self.config.min_samples as usize {
            detect_peaks(&snapshot, &self.config)
        } else {
            Vec::new()
        };
        let cadence = if snapshot.len() >= self.config.min_samples as usize {
            cadence_from_peaks(&peaks, &self.config)
        } else {
            0.0
        };

        let update = {
            let mut state = self.lock_state();
            // stop()/start() may have run while we were computing
            if !state.active || state.generation != token.0 {
                return None;
            }

            let mut new_peaks = 0u64;
            for t in &peaks {
                if state.counted_peaks.insert(t.to_bits()) {
                    new_peaks += 1;
                }
            }
            if let Some(oldest) = snapshot.first().map(|s| s.timestamp) {
                state
                    .counted_peaks
                    .retain(|bits| f64::from_bits(*bits) >= oldest);
            }

            let new_steps = new_peaks * STEPS_PER_PEAK;
            state.total_steps += new_steps;
            state.cadence = cadence;

            let elapsed_seconds = match (state.tick_mark, snapshot.last()) {
                (Some(mark), Some(newest)) if newest.timestamp > mark => {
                    state.tick_mark = Some(newest.timestamp);
                    newest.timestamp - mark
                }
                _ => 0.0,
            };

            CadenceUpdate {
                cadence,
                total_steps: state.total_steps,
                new_steps,
                window_samples: snapshot.len() as u32,
                elapsed_seconds,
                generation: token.0,
            }
        };

        debug!(
            "[CadenceEstimator] Tick: {:.1} SPM over {:.2}s, +{} steps ({} total, {} samples)",
            update.cadence,
            update.elapsed_seconds,
            update.new_steps,
            update.total_steps,
            update.window_samples
        );

        let listeners: Vec<Arc<dyn CadenceListener>> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in &listeners {
            listener.on_cadence_update(&update);
        }

        Some(update)
    }
}

/// Sliding-window cadence estimator with a periodic recompute.
///
/// All methods take `&self`; the estimator can be shared between a sample
/// producer and the host through an `Arc`.
pub struct CadenceEstimator {
    shared: Arc<Shared>,
    task: Mutex<Option<PeriodicTask>>,
}

impl CadenceEstimator {
    /// Create a new estimator with default configuration.
    pub fn new() -> Self {
        Self::with_config(CadenceConfig::default())
    }

    /// Create a new estimator with custom configuration.
    pub fn with_config(config: CadenceConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(CadenceState::default()),
                listeners: Mutex::new(Vec::new()),
            }),
            task: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &CadenceConfig {
        &self.shared.config
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Reset all state and begin periodic ticks.
    pub fn start(&self) {
        let token = {
            let mut state = self.shared.lock_state();
            state.window.clear();
            state.counted_peaks.clear();
            state.total_steps = 0;
            state.cadence = 0.0;
            state.tick_mark = None;
            state.generation += 1;
            state.active = true;
            TickToken(state.generation)
        };

        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(mut previous) = task.take() {
            previous.cancel();
        }

        if self.shared.config.auto_tick {
            let interval = Duration::try_from_secs_f64(self.shared.config.update_interval_seconds)
                .ok()
                .filter(|d| !d.is_zero())
                .unwrap_or(Duration::from_secs(3));
            let shared = Arc::clone(&self.shared);
            match PeriodicTask::spawn("cadence-tick", interval, move || {
                shared.run_tick(token);
            }) {
                Ok(t) => *task = Some(t),
                Err(e) => warn!(
                    "[CadenceEstimator] Could not spawn ticker, tick() must be driven manually: {}",
                    e
                ),
            }
        }
        drop(task);

        info!(
            "[CadenceEstimator] Started (window {:.0}s, tick every {:.1}s)",
            self.shared.config.window_seconds, self.shared.config.update_interval_seconds
        );
    }

    /// Stop periodic ticks and clear the window.
    ///
    /// Step count and counted peaks are kept for final reporting. Any tick
    /// already scheduled or in flight becomes a no-op.
    pub fn stop(&self) {
        let was_active = {
            let mut state = self.shared.lock_state();
            let was_active = state.active;
            if was_active {
                state.generation += 1;
                state.active = false;
                state.window.clear();
            }
            was_active
        };

        if let Some(mut task) = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.cancel();
        }

        if was_active {
            info!(
                "[CadenceEstimator] Stopped with {} steps",
                self.current_steps()
            );
        }
    }

    pub fn is_active(&self) -> bool {
        self.shared.lock_state().active
    }

    // ========================================================================
    // Sample Ingestion
    // ========================================================================

    /// Add a sample to the window, evicting anything older than the window.
    ///
    /// Late samples are inserted in time order; exact duplicate timestamps are
    /// dropped. Returns `false` if the sample was not buffered (not
    /// monitoring, invalid timestamp, duplicate, or already outside the window).
    pub fn add_sample(&self, sample: SensorSample) -> bool {
        if !sample.timestamp.is_finite() {
            warn!("[CadenceEstimator] Dropping sample with non-finite timestamp");
            return false;
        }

        let mut state = self.shared.lock_state();
        if !state.active {
            return false;
        }

        let ts = sample.timestamp;
        // The first sample of a run starts the tick clock
        if state.tick_mark.is_none() {
            state.tick_mark = Some(ts);
        }
        match state.window.back() {
            Some(last) if ts <= last.timestamp => {
                let pos = state.window.partition_point(|s| s.timestamp < ts);
                if state.window.get(pos).is_some_and(|s| s.timestamp == ts) {
                    debug!("[CadenceEstimator] Dropping duplicate sample at {:.3}s", ts);
                    return false;
                }
                state.window.insert(pos, sample);
            }
            _ => state.window.push_back(sample),
        }

        let newest = state.window.back().map_or(ts, |s| s.timestamp);
        let cutoff = newest - self.shared.config.window_seconds;
        while state.window.front().is_some_and(|s| s.timestamp < cutoff) {
            state.window.pop_front();
        }

        ts >= cutoff
    }

    // ========================================================================
    // Ticking
    // ========================================================================

    /// Token for the current generation. Pass to [`run_tick`](Self::run_tick).
    pub fn tick_token(&self) -> TickToken {
        TickToken(self.shared.lock_state().generation)
    }

    /// Run a tick scheduled under `token`. Returns `None` without touching
    /// any state if the estimator was stopped or restarted since.
    pub fn run_tick(&self, token: TickToken) -> Option<CadenceUpdate> {
        self.shared.run_tick(token)
    }

    /// Recompute cadence and count new steps now.
    pub fn tick(&self) -> Option<CadenceUpdate> {
        let token = self.tick_token();
        self.shared.run_tick(token)
    }

    /// Compute cadence over `samples` with this estimator's configuration.
    pub fn compute_cadence(&self, samples: &[SensorSample]) -> f64 {
        compute_cadence(samples, &self.shared.config)
    }

    /// Compute cadence over a whole session and publish it in place of the
    /// last rolling estimate.
    pub fn finalize(&self, all_samples: &[SensorSample]) -> f64 {
        let cadence = compute_cadence(all_samples, &self.shared.config);
        self.shared.lock_state().cadence = cadence;
        info!(
            "[CadenceEstimator] Final cadence {:.1} SPM over {} samples",
            cadence,
            all_samples.len()
        );
        cadence
    }

    // ========================================================================
    // Outputs
    // ========================================================================

    /// Last published cadence in SPM. `0.0` means unknown.
    pub fn current_cadence(&self) -> f64 {
        self.shared.lock_state().cadence
    }

    /// Cumulative bilateral step count.
    pub fn current_steps(&self) -> u64 {
        self.shared.lock_state().total_steps
    }

    pub fn window_len(&self) -> usize {
        self.shared.lock_state().window.len()
    }

    /// Register a listener for every applied tick.
    pub fn add_listener(&self, listener: Arc<dyn CadenceListener>) {
        self.shared
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Receive every applied tick on a channel.
    pub fn subscribe(&self) -> mpsc::Receiver<CadenceUpdate> {
        let (tx, rx) = mpsc::channel();
        self.add_listener(Arc::new(ChannelListener { tx: Mutex::new(tx) }));
        rx
    }
}

impl Default for CadenceEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CadenceEstimator {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// Tests
// ============================================================================
