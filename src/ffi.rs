//! FFI bindings for mobile platforms (iOS/Android).
//!
//! This module provides the UniFFI bindings that expose Rust functionality
//! to Kotlin and Swift. Calibration records and stride models cross the
//! boundary as JSON strings, the same shape the host persists them in.

use std::sync::Arc;

use log::{debug, info, warn};

use crate::{
    init_logging, CadenceListener, CadenceUpdate, CalibrationRecord, GpsFix, GpsPoint, RunSession,
    SensorSample, SessionConfig, SignalQuality, StrideModel, StrideModelFitter,
};

// ============================================================================
// Cadence Callback Interface (for real-time updates to mobile)
// ============================================================================

/// Callback interface for receiving cadence updates during a run.
/// Implement this in Kotlin/Swift to drive the workout screen.
#[uniffi::export(callback_interface)]
pub trait CadenceCallback: Send + Sync {
    /// Called after every applied cadence tick.
    fn on_cadence_update(&self, update: CadenceUpdate);
}

struct CallbackListener(Box<dyn CadenceCallback>);

impl CadenceListener for CallbackListener {
    fn on_cadence_update(&self, update: &CadenceUpdate) {
        self.0.on_cadence_update(update.clone());
    }
}

// ============================================================================
// Stride Model Functions
// ============================================================================

/// Fit a stride model from a JSON array of calibration records.
/// Returns the model as JSON, or None if the records cannot be fitted.
#[uniffi::export]
pub fn fit_stride_model(records_json: String) -> Option<String> {
    init_logging();
    let values: Vec<serde_json::Value> = match serde_json::from_str(&records_json) {
        Ok(values) => values,
        Err(e) => {
            warn!("[StrideMeterRust] fit_stride_model: bad JSON array: {}", e);
            return None;
        }
    };

    // Individual records that fail to decode are skipped, not fatal
    let records: Vec<CalibrationRecord> = values
        .iter()
        .filter_map(|value| CalibrationRecord::from_json(&value.to_string()).ok())
        .collect();
    info!(
        "[StrideMeterRust] fit_stride_model called with {} records ({} decoded)",
        values.len(),
        records.len()
    );

    StrideModelFitter::new().fit(&records).map(|model| model.to_json())
}

/// Predict step length in meters for a cadence, from a model in JSON.
/// Returns 0 if the model does not decode.
#[uniffi::export]
pub fn predict_step_length(model_json: String, cadence: f64) -> f64 {
    init_logging();
    match StrideModel::from_json(&model_json) {
        Ok(model) => model.predict(cadence),
        Err(e) => {
            warn!("[StrideMeterRust] predict_step_length: {}", e);
            0.0
        }
    }
}

/// Classify a fix's horizontal accuracy.
#[uniffi::export]
pub fn ffi_evaluate_signal_quality(fix: GpsFix) -> SignalQuality {
    crate::evaluate_signal_quality(&fix)
}

/// Get default session configuration.
#[uniffi::export]
pub fn default_session_config() -> SessionConfig {
    init_logging();
    debug!("[StrideMeterRust] default_session_config requested");
    SessionConfig::default()
}

// ============================================================================
// Run Session Object
// ============================================================================

/// A run session owned by the host.
#[derive(uniffi::Object)]
pub struct FfiRunSession {
    inner: RunSession,
}

#[uniffi::export]
impl FfiRunSession {
    #[uniffi::constructor]
    pub fn new(config: SessionConfig) -> Arc<Self> {
        init_logging();
        info!("[StrideMeterRust] FfiRunSession created");
        Arc::new(Self {
            inner: RunSession::with_config(config),
        })
    }

    pub fn start(&self) {
        self.inner.start();
    }

    /// Stop the run. Returns the session summary as JSON.
    pub fn stop(&self) -> String {
        self.inner.stop().to_json()
    }

    pub fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    pub fn add_sample(&self, sample: SensorSample) {
        self.inner.add_sample(sample);
    }

    /// Feed a batch of samples in one call.
    pub fn add_samples(&self, samples: Vec<SensorSample>) {
        for sample in samples {
            self.inner.add_sample(sample);
        }
    }

    pub fn add_location(&self, fix: GpsFix) -> f64 {
        self.inner.add_location(fix)
    }

    /// Bind the user's stride model from JSON. Returns false if it does not decode.
    pub fn set_stride_model(&self, model_json: String) -> bool {
        match StrideModel::from_json(&model_json) {
            Ok(model) => {
                self.inner.set_stride_model(model);
                true
            }
            Err(e) => {
                warn!("[StrideMeterRust] set_stride_model rejected: {}", e);
                false
            }
        }
    }

    pub fn set_cadence_callback(&self, callback: Box<dyn CadenceCallback>) {
        self.inner.add_listener(Arc::new(CallbackListener(callback)));
    }

    pub fn current_cadence(&self) -> f64 {
        self.inner.current_cadence()
    }

    pub fn current_steps(&self) -> u64 {
        self.inner.current_steps()
    }

    pub fn total_distance(&self) -> f64 {
        self.inner.total_distance()
    }

    pub fn path(&self) -> Vec<GpsPoint> {
        self.inner.path()
    }

    pub fn signal_quality(&self) -> SignalQuality {
        self.inner.signal_quality()
    }
}
