//! # Stride Meter
//!
//! Running cadence, personalized stride length and fused distance from a
//! wrist-worn IMU and intermittent GPS.
//!
//! This library provides:
//! - Footstrike detection and steps-per-minute cadence over a sliding window
//! - Per-user stride length calibration by ordinary least squares
//! - Cumulative distance from GPS with a stride-model pedometer fallback
//!
//! Everything else (screens, storage, device transport) belongs to the host,
//! which feeds samples and fixes in and reads cadence, steps, distance and
//! path out.
//!
//! ## Features
//!
//! - **`ffi`** - Enable FFI bindings for mobile platforms (iOS/Android)
//!
//! ## Quick Start
//!
//! ```rust
//! use stride_meter::{GpsFix, RunSession};
//!
//! let session = RunSession::new();
//! session.start();
//!
//! session.add_location(GpsFix::new(51.5074, -0.1278, 5.0, 0.0));
//! session.add_location(GpsFix::new(51.5078, -0.1278, 5.0, 10.0));
//!
//! let summary = session.stop();
//! assert!(summary.total_distance > 40.0);
//! ```

use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{OptionExt, Result, StrideError};

// Geographic utilities (haversine distance, polyline length)
pub mod geo_utils;

// Cancellable periodic task driving the cadence tick
pub mod scheduler;
pub use scheduler::PeriodicTask;

// Footstrike detection and cadence estimation
pub mod cadence;
pub use cadence::{
    compute_cadence, CadenceConfig, CadenceEstimator, CadenceListener, CadenceUpdate,
    DetectorKind, FootstrikeDetector, StrikePhase, TickToken,
};

// Stride length calibration
pub mod stride;
pub use stride::{CalibrationRecord, StrideConfig, StrideModel, StrideModelFitter};

// GPS / pedometer distance fusion
pub mod distance;
pub use distance::{
    evaluate_signal_quality, DistanceAccumulator, DistanceConfig, DistanceSource, SignalQuality,
};

// Session controller wiring the estimators together
pub mod session;
pub use session::{RunSession, SessionConfig, SessionSummary};

// FFI bindings for mobile platforms (iOS/Android)
#[cfg(feature = "ffi")]
pub mod ffi;

#[cfg(feature = "ffi")]
uniffi::setup_scaffolding!();

/// Initialize logging for Android (only used in FFI)
#[cfg(all(feature = "ffi", target_os = "android"))]
pub(crate) fn init_logging() {
    use android_logger::Config;
    use log::LevelFilter;

    android_logger::init_once(
        Config::default()
            .with_max_level(LevelFilter::Debug)
            .with_tag("StrideMeterRust"),
    );
}

#[cfg(all(feature = "ffi", not(target_os = "android")))]
pub(crate) fn init_logging() {
    // No-op on non-Android platforms
}

// ============================================================================
// Core Types
// ============================================================================

/// A GPS coordinate with latitude and longitude.
///
/// # Example
/// ```
/// use stride_meter::GpsPoint;
/// let point = GpsPoint::new(51.5074, -0.1278); // London
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsPoint {
    /// Create a new GPS point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// One inertial sample from the wrist device.
///
/// Timestamps are seconds on the session clock. Samples may arrive slightly
/// out of order over the wireless link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct SensorSample {
    /// Acceleration in g
    pub accel_x: f64,
    pub accel_y: f64,
    pub accel_z: f64,
    /// Angular rate in rad/s
    pub gyro_x: f64,
    pub gyro_y: f64,
    pub gyro_z: f64,
    /// Heart rate in bpm, when the device reported one
    pub heart_rate: Option<u16>,
    pub timestamp: f64,
}

impl SensorSample {
    /// Create a sample from accelerometer and gyroscope triples.
    pub fn new(timestamp: f64, accel: [f64; 3], gyro: [f64; 3]) -> Self {
        Self {
            accel_x: accel[0],
            accel_y: accel[1],
            accel_z: accel[2],
            gyro_x: gyro[0],
            gyro_y: gyro[1],
            gyro_z: gyro[2],
            heart_rate: None,
            timestamp,
        }
    }

    pub fn with_heart_rate(mut self, bpm: u16) -> Self {
        self.heart_rate = Some(bpm);
        self
    }
}

/// A GPS fix from the host's location provider.
///
/// A negative or non-finite `horizontal_accuracy` means "no fix".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct GpsFix {
    pub latitude: f64,
    pub longitude: f64,
    /// Meters above sea level
    pub altitude: f64,
    /// Horizontal accuracy radius in meters
    pub horizontal_accuracy: f64,
    /// Vertical accuracy in meters
    pub vertical_accuracy: f64,
    /// Speed in m/s (negative when unknown)
    pub speed: f64,
    /// Course in degrees from north (negative when unknown)
    pub course: f64,
    /// Seconds on the session clock
    pub timestamp: f64,
}

impl GpsFix {
    /// Create a fix with position, accuracy and time; the rest unknown.
    pub fn new(latitude: f64, longitude: f64, horizontal_accuracy: f64, timestamp: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude: 0.0,
            horizontal_accuracy,
            vertical_accuracy: -1.0,
            speed: -1.0,
            course: -1.0,
            timestamp,
        }
    }

    pub fn point(&self) -> GpsPoint {
        GpsPoint::new(self.latitude, self.longitude)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gps_point_validation() {
        assert!(GpsPoint::new(51.5074, -0.1278).is_valid());
        assert!(!GpsPoint::new(91.0, 0.0).is_valid());
        assert!(!GpsPoint::new(0.0, 181.0).is_valid());
        assert!(!GpsPoint::new(f64::NAN, 0.0).is_valid());
    }

    #[test]
    fn test_sensor_sample_constructor() {
        let s = SensorSample::new(1.25, [1.0, 2.0, 3.0], [4.0, 5.0, 6.0]).with_heart_rate(158);
        assert_eq!(s.accel_y, 2.0);
        assert_eq!(s.gyro_z, 6.0);
        assert_eq!(s.heart_rate, Some(158));
        assert_eq!(s.timestamp, 1.25);
    }

    #[test]
    fn test_gps_fix_point() {
        let fix = GpsFix::new(51.5, -0.12, 8.0, 3.0);
        assert_eq!(fix.point(), GpsPoint::new(51.5, -0.12));
        assert_eq!(evaluate_signal_quality(&fix), SignalQuality::Excellent);
    }
}
