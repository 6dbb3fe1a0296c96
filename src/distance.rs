//! # Distance Accumulation
//!
//! Fuses GPS fixes with the personalized stride model into a single
//! cumulative distance and a display path.
//!
//! - Fixes are graded by horizontal accuracy. Only good or excellent fixes
//!   move the distance; every fix with valid coordinates lands in the path.
//! - While GPS is weak or silent, published cadence is converted into
//!   distance through the bound [`StrideModel`].
//! - Each interval is credited by one source. After a pedometer credit, the
//!   next good fix only re-anchors, because the span since the previous
//!   anchor was already paid for by the pedometer.
//!
//! Distance never decreases within a session; every guard fails closed to
//! "no contribution".

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::geo_utils::{haversine_distance, polyline_length};
use crate::stride::StrideModel;
use crate::{GpsFix, GpsPoint};

// ============================================================================
// Signal Quality
// ============================================================================

/// GPS fix quality, graded by horizontal accuracy. Ordered worst to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum SignalQuality {
    /// Negative or missing accuracy: no fix
    None,
    /// ≥ 50 m
    Poor,
    /// < 50 m
    Fair,
    /// < 20 m
    Good,
    /// < 10 m
    Excellent,
}

impl SignalQuality {
    /// Grade a horizontal accuracy in meters.
    pub fn from_accuracy(horizontal_accuracy: f64) -> Self {
        if !horizontal_accuracy.is_finite() || horizontal_accuracy < 0.0 {
            SignalQuality::None
        } else if horizontal_accuracy < 10.0 {
            SignalQuality::Excellent
        } else if horizontal_accuracy < 20.0 {
            SignalQuality::Good
        } else if horizontal_accuracy < 50.0 {
            SignalQuality::Fair
        } else {
            SignalQuality::Poor
        }
    }
}

/// Grade a fix by its horizontal accuracy.
pub fn evaluate_signal_quality(fix: &GpsFix) -> SignalQuality {
    SignalQuality::from_accuracy(fix.horizontal_accuracy)
}

/// Which source credited the most recent distance increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum DistanceSource {
    Gps,
    Pedometer,
}

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for distance accumulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct DistanceConfig {
    /// Largest increment accepted between consecutive GPS anchors, however
    /// close together in time. Bigger jumps come from signal reacquisition
    /// and only move the anchor.
    /// Default: 100.0 meters
    pub max_increment_m: f64,

    /// Fastest plausible ground speed. Anchors further apart in time may be
    /// up to `max_speed_mps × gap` meters apart, never less than
    /// `max_increment_m`.
    /// Default: 12.5 m/s
    pub max_speed_mps: f64,

    /// Lowest fix quality that may contribute distance.
    /// Default: Good
    pub min_quality: SignalQuality,

    /// Cadence time without any fix after which GPS counts as lost even if
    /// the last fix was good.
    /// Default: 10.0 seconds
    pub gps_timeout_seconds: f64,
}

impl Default for DistanceConfig {
    fn default() -> Self {
        Self {
            max_increment_m: 100.0,
            max_speed_mps: 12.5,
            min_quality: SignalQuality::Good,
            gps_timeout_seconds: 10.0,
        }
    }
}

// ============================================================================
// Distance Accumulator
// ============================================================================

/// Cumulative distance and path for one session.
#[derive(Debug, Clone)]
pub struct DistanceAccumulator {
    config: DistanceConfig,
    total_distance: f64,
    gps_distance: f64,
    pedometer_distance: f64,
    path: Vec<GpsPoint>,
    last_fix: Option<GpsFix>,
    stride_model: Option<StrideModel>,
    last_source: Option<DistanceSource>,
    quality: SignalQuality,
    /// Cadence-clock seconds since the last fix arrived
    seconds_since_fix: f64,
}

impl DistanceAccumulator {
    pub fn new() -> Self {
        Self::with_config(DistanceConfig::default())
    }

    pub fn with_config(config: DistanceConfig) -> Self {
        Self {
            config,
            total_distance: 0.0,
            gps_distance: 0.0,
            pedometer_distance: 0.0,
            path: Vec::new(),
            last_fix: None,
            stride_model: None,
            last_source: None,
            quality: SignalQuality::None,
            seconds_since_fix: 0.0,
        }
    }

    // ========================================================================
    // GPS Path
    // ========================================================================

    /// Add a GPS fix. Returns the distance credited by this fix (usually 0
    /// for anything but a good fix following a good fix).
    pub fn add_location(&mut self, fix: GpsFix) -> f64 {
        let point = fix.point();
        if !point.is_valid() {
            warn!(
                "[DistanceAccumulator] Ignoring fix with invalid coordinates ({}, {})",
                fix.latitude, fix.longitude
            );
            return 0.0;
        }

        let quality = evaluate_signal_quality(&fix);
        self.quality = quality;
        self.seconds_since_fix = 0.0;
        self.path.push(point);

        if quality < self.config.min_quality {
            debug!(
                "[DistanceAccumulator] {:?} fix (±{:.0}m) kept for path only",
                quality, fix.horizontal_accuracy
            );
            return 0.0;
        }

        let Some(prev) = self.last_fix.as_ref() else {
            debug!("[DistanceAccumulator] First accepted fix anchors the track");
            self.last_fix = Some(fix);
            return 0.0;
        };

        if fix.timestamp.is_finite() && prev.timestamp.is_finite() && fix.timestamp < prev.timestamp {
            debug!(
                "[DistanceAccumulator] Stale fix at {:.1}s (anchor at {:.1}s) kept for path only",
                fix.timestamp, prev.timestamp
            );
            return 0.0;
        }

        if self.last_source == Some(DistanceSource::Pedometer) {
            debug!("[DistanceAccumulator] GPS recovered, re-anchoring after pedometer interval");
            self.last_fix = Some(fix);
            self.last_source = Some(DistanceSource::Gps);
            return 0.0;
        }

        let gap = fix.timestamp - prev.timestamp;
        let cap = if gap.is_finite() && gap > 0.0 && self.config.max_speed_mps.is_finite() {
            self.config.max_increment_m.max(self.config.max_speed_mps * gap)
        } else {
            self.config.max_increment_m
        };

        let increment = haversine_distance(&prev.point(), &point);
        if !increment.is_finite() || increment < 0.0 || increment >= cap {
            warn!(
                "[DistanceAccumulator] Rejecting GPS jump of {:.1}m in {:.1}s, re-anchoring",
                increment, gap
            );
            self.last_fix = Some(fix);
            return 0.0;
        }

        self.total_distance += increment;
        self.gps_distance += increment;
        self.last_source = Some(DistanceSource::Gps);
        self.last_fix = Some(fix);
        increment
    }

    // ========================================================================
    // Pedometer Fallback
    // ========================================================================

    /// Bind a stride model for the pedometer fallback. Replaces any
    /// previously bound model.
    pub fn set_stride_model(&mut self, model: StrideModel) {
        info!(
            "[DistanceAccumulator] Bound stride model (R² {:.3}, n={})",
            model.r_squared, model.sample_count
        );
        self.stride_model = Some(model);
    }

    /// Whether GPS is currently good enough to own distance.
    pub fn gps_is_sufficient(&self) -> bool {
        self.quality >= self.config.min_quality
            && self.seconds_since_fix <= self.config.gps_timeout_seconds
    }

    /// Credit distance from cadence over `elapsed_seconds` when GPS is not
    /// sufficient and a stride model is bound. Returns the credited distance.
    pub fn on_cadence_update(&mut self, cadence: f64, elapsed_seconds: f64) -> f64 {
        if elapsed_seconds.is_finite() && elapsed_seconds > 0.0 {
            self.seconds_since_fix += elapsed_seconds;
        } else {
            return 0.0;
        }

        if self.gps_is_sufficient() {
            return 0.0;
        }

        let Some(model) = self.stride_model.as_ref() else {
            return 0.0;
        };

        if !(cadence.is_finite() && cadence > 0.0) {
            return 0.0;
        }

        let stride = model.predict(cadence);
        let increment = stride * (cadence / 60.0) * elapsed_seconds;
        if !increment.is_finite() || increment < 0.0 {
            return 0.0;
        }

        debug!(
            "[DistanceAccumulator] Pedometer +{:.1}m ({:.1} SPM x {:.2}m over {:.1}s)",
            increment, cadence, stride, elapsed_seconds
        );

        self.total_distance += increment;
        self.pedometer_distance += increment;
        self.last_source = Some(DistanceSource::Pedometer);
        increment
    }

    /// Zero the distance and clear the path. The stride model stays bound.
    pub fn reset_distance(&mut self) {
        self.total_distance = 0.0;
        self.gps_distance = 0.0;
        self.pedometer_distance = 0.0;
        self.path.clear();
        self.last_fix = None;
        self.last_source = None;
        self.quality = SignalQuality::None;
        self.seconds_since_fix = 0.0;
    }

    // ========================================================================
    // Outputs
    // ========================================================================

    /// Cumulative distance in meters.
    pub fn total_distance(&self) -> f64 {
        self.total_distance
    }

    /// Portion of the distance credited from GPS.
    pub fn gps_distance(&self) -> f64 {
        self.gps_distance
    }

    /// Portion of the distance credited from the stride model.
    pub fn pedometer_distance(&self) -> f64 {
        self.pedometer_distance
    }

    pub fn path(&self) -> &[GpsPoint] {
        &self.path
    }

    /// Length of the drawn path, poor fixes included. For display only; it
    /// is never credited to the distance.
    pub fn path_length(&self) -> f64 {
        polyline_length(&self.path)
    }

    pub fn last_accepted_fix(&self) -> Option<&GpsFix> {
        self.last_fix.as_ref()
    }

    pub fn stride_model(&self) -> Option<&StrideModel> {
        self.stride_model.as_ref()
    }

    /// Quality of the most recent fix.
    pub fn signal_quality(&self) -> SignalQuality {
        self.quality
    }

    pub fn last_source(&self) -> Option<DistanceSource> {
        self.last_source
    }
}

impl Default for DistanceAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    /// ~55.6 m of latitude
    const STEP_DEG: f64 = 0.0005;

    fn fix(lat: f64, accuracy: f64, timestamp: f64) -> GpsFix {
        GpsFix::new(lat, -0.1278, accuracy, timestamp)
    }

    fn model() -> StrideModel {
        StrideModel {
            alpha: 0.005,
            beta: 0.05,
            r_squared: 1.0,
            created_at: Utc::now(),
            sample_count: 5,
        }
    }

    #[test]
    fn test_quality_bands() {
        assert_eq!(SignalQuality::from_accuracy(-1.0), SignalQuality::None);
        assert_eq!(SignalQuality::from_accuracy(f64::NAN), SignalQuality::None);
        assert_eq!(SignalQuality::from_accuracy(0.0), SignalQuality::Excellent);
        assert_eq!(SignalQuality::from_accuracy(9.99), SignalQuality::Excellent);
        assert_eq!(SignalQuality::from_accuracy(10.0), SignalQuality::Good);
        assert_eq!(SignalQuality::from_accuracy(20.0), SignalQuality::Fair);
        assert_eq!(SignalQuality::from_accuracy(49.9), SignalQuality::Fair);
        assert_eq!(SignalQuality::from_accuracy(50.0), SignalQuality::Poor);
        assert!(SignalQuality::Excellent > SignalQuality::Good);
        assert!(SignalQuality::Fair < SignalQuality::Good);
    }

    #[test]
    fn test_first_fix_only_anchors() {
        let mut acc = DistanceAccumulator::new();
        assert_eq!(acc.add_location(fix(51.5, 5.0, 0.0)), 0.0);
        assert_eq!(acc.total_distance(), 0.0);
        assert_eq!(acc.path().len(), 1);
        assert!(acc.last_accepted_fix().is_some());
    }

    #[test]
    fn test_good_fixes_accumulate() {
        let mut acc = DistanceAccumulator::new();
        for i in 0..5 {
            acc.add_location(fix(51.5 + i as f64 * STEP_DEG, 8.0, i as f64 * 10.0));
        }
        let expected = 4.0 * 55.6;
        assert!((acc.total_distance() - expected).abs() < 1.0);
        assert_eq!(acc.gps_distance(), acc.total_distance());
        assert_eq!(acc.last_source(), Some(DistanceSource::Gps));
        assert_eq!(acc.path().len(), 5);
    }

    #[test]
    fn test_poor_fixes_path_only() {
        let mut acc = DistanceAccumulator::new();
        acc.add_location(fix(51.5, 60.0, 0.0));
        acc.add_location(fix(51.5 + STEP_DEG, 80.0, 1.0));
        assert_eq!(acc.total_distance(), 0.0);
        assert_eq!(acc.path().len(), 2);
        assert!((acc.path_length() - 55.6).abs() < 1.0);
        assert!(acc.last_accepted_fix().is_none());
        assert_eq!(acc.signal_quality(), SignalQuality::Poor);
    }

    #[test]
    fn test_fair_and_missing_fixes_do_not_contribute() {
        let mut acc = DistanceAccumulator::new();
        acc.add_location(fix(51.5, 5.0, 0.0));
        acc.add_location(fix(51.5 + STEP_DEG, 30.0, 1.0));
        acc.add_location(fix(51.5 + 2.0 * STEP_DEG, -1.0, 2.0));
        assert_eq!(acc.total_distance(), 0.0);
        assert_eq!(acc.path().len(), 3);
    }

    #[test]
    fn test_jump_rejected_and_reanchored() {
        let mut acc = DistanceAccumulator::new();
        acc.add_location(fix(51.5, 5.0, 0.0));
        // ~1.1 km
        assert_eq!(acc.add_location(fix(51.51, 5.0, 1.0)), 0.0);
        assert_eq!(acc.total_distance(), 0.0);
        // Next step is measured from the new anchor
        let inc = acc.add_location(fix(51.51 + STEP_DEG, 5.0, 2.0));
        assert!((inc - 55.6).abs() < 1.0);
    }

    #[test]
    fn test_sparse_fixes_scale_the_cap() {
        let mut acc = DistanceAccumulator::new();
        // ~111 m every 20 s (5.6 m/s)
        for i in 0..6 {
            acc.add_location(fix(51.5 + i as f64 * 0.001, 4.0, i as f64 * 20.0));
        }
        assert!((acc.total_distance() - 5.0 * 111.2).abs() < 2.0);
        assert!((acc.total_distance() - acc.path_length()).abs() < 1e-6);

        // Same gap, but faster than anyone runs: rejected
        let before = acc.total_distance();
        assert_eq!(acc.add_location(fix(51.51, 4.0, 120.0)), 0.0);
        assert_eq!(acc.total_distance(), before);
    }

    #[test]
    fn test_stale_fix_path_only() {
        let mut acc = DistanceAccumulator::new();
        acc.add_location(fix(51.5, 5.0, 10.0));
        assert_eq!(acc.add_location(fix(51.5 + STEP_DEG, 5.0, 5.0)), 0.0);
        assert_eq!(acc.path().len(), 2);
        assert_eq!(acc.last_accepted_fix().unwrap().timestamp, 10.0);
    }

    #[test]
    fn test_invalid_coordinates_ignored() {
        let mut acc = DistanceAccumulator::new();
        acc.add_location(fix(f64::NAN, 5.0, 0.0));
        acc.add_location(fix(95.0, 5.0, 1.0));
        assert!(acc.path().is_empty());
    }

    #[test]
    fn test_reset_then_single_fix() {
        let mut acc = DistanceAccumulator::new();
        acc.set_stride_model(model());
        for i in 0..3 {
            acc.add_location(fix(51.5 + i as f64 * STEP_DEG, 5.0, i as f64));
        }
        assert!(acc.total_distance() > 0.0);

        acc.reset_distance();
        assert_eq!(acc.total_distance(), 0.0);
        assert!(acc.path().is_empty());
        assert!(acc.stride_model().is_some());

        acc.add_location(fix(51.6, 5.0, 100.0));
        assert_eq!(acc.total_distance(), 0.0);
        assert_eq!(acc.path().len(), 1);
    }

    #[test]
    fn test_fallback_requires_model() {
        let mut acc = DistanceAccumulator::new();
        assert_eq!(acc.on_cadence_update(170.0, 3.0), 0.0);

        acc.set_stride_model(model());
        let inc = acc.on_cadence_update(170.0, 3.0);
        // 0.9 m * 170/60 steps/s * 3 s
        assert!((inc - 0.9 * 170.0 / 60.0 * 3.0).abs() < 1e-9);
        assert_eq!(acc.total_distance(), inc);
        assert_eq!(acc.last_source(), Some(DistanceSource::Pedometer));
    }

    #[test]
    fn test_fallback_guards() {
        let mut acc = DistanceAccumulator::new();
        acc.set_stride_model(model());
        assert_eq!(acc.on_cadence_update(0.0, 3.0), 0.0);
        assert_eq!(acc.on_cadence_update(f64::NAN, 3.0), 0.0);
        assert_eq!(acc.on_cadence_update(170.0, -3.0), 0.0);
        assert_eq!(acc.on_cadence_update(170.0, f64::INFINITY), 0.0);
        assert_eq!(acc.total_distance(), 0.0);
    }

    #[test]
    fn test_fallback_uses_clamped_stride() {
        let mut acc = DistanceAccumulator::new();
        acc.set_stride_model(model());
        let inc = acc.on_cadence_update(10_000.0, 1.0);
        assert!((inc - 1.2 * 10_000.0 / 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_no_fallback_while_gps_good() {
        let mut acc = DistanceAccumulator::new();
        acc.set_stride_model(model());
        acc.add_location(fix(51.5, 5.0, 0.0));
        assert_eq!(acc.on_cadence_update(170.0, 3.0), 0.0);
    }

    #[test]
    fn test_gps_timeout_enables_fallback() {
        let mut acc = DistanceAccumulator::new();
        acc.set_stride_model(model());
        acc.add_location(fix(51.5, 5.0, 0.0));
        assert_eq!(acc.on_cadence_update(170.0, 3.0), 0.0);
        assert_eq!(acc.on_cadence_update(170.0, 3.0), 0.0);
        assert_eq!(acc.on_cadence_update(170.0, 3.0), 0.0);
        // 12 s without a fix
        assert!(acc.on_cadence_update(170.0, 3.0) > 0.0);
        assert!(!acc.gps_is_sufficient());
    }

    #[test]
    fn test_no_double_count_after_outage() {
        let mut acc = DistanceAccumulator::new();
        acc.set_stride_model(model());

        acc.add_location(fix(51.5, 5.0, 0.0));
        // Signal degrades
        acc.add_location(fix(51.5 + STEP_DEG, 70.0, 3.0));
        let pedometer = acc.on_cadence_update(170.0, 3.0) + acc.on_cadence_update(170.0, 3.0);
        assert!(pedometer > 0.0);

        // Recovered fix two steps from the old anchor: re-anchor only
        assert_eq!(acc.add_location(fix(51.5 + 2.0 * STEP_DEG, 5.0, 9.0)), 0.0);
        assert!((acc.total_distance() - pedometer).abs() < 1e-9);
        assert_eq!(acc.last_source(), Some(DistanceSource::Gps));

        // Then GPS credits normally again
        let inc = acc.add_location(fix(51.5 + 3.0 * STEP_DEG, 5.0, 12.0));
        assert!((inc - 55.6).abs() < 1.0);
        assert!((acc.total_distance() - (pedometer + inc)).abs() < 1e-9);
    }

    #[test]
    fn test_distance_never_decreases() {
        let mut acc = DistanceAccumulator::new();
        acc.set_stride_model(model());
        let accuracies = [5.0, 15.0, 60.0, -1.0, 30.0, 8.0, 200.0, 9.0, 12.0];
        let mut last = 0.0;
        for (i, accuracy) in accuracies.iter().enumerate() {
            let jitter = if i % 3 == 0 { 0.02 } else { 0.0 };
            acc.add_location(fix(51.5 + i as f64 * STEP_DEG + jitter, *accuracy, i as f64));
            assert!(acc.total_distance() >= last);
            last = acc.total_distance();
            acc.on_cadence_update(165.0, 1.0);
            assert!(acc.total_distance() >= last);
            last = acc.total_distance();
        }
        assert_eq!(acc.path().len(), accuracies.len());
    }
}
