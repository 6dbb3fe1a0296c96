//! # Stride Model
//!
//! Personalized stride length as a linear function of cadence:
//! `step_length ≈ alpha · cadence + beta`, fitted by ordinary least squares
//! from calibration runs over a course of known length.
//!
//! Predictions are always clamped to plausible human stride bounds before they
//! reach distance accumulation.
//!
//! Precondition: fitting and live monitoring never run at the same time for
//! the same user profile. Nothing here enforces that.
//!
//! ## Example
//! ```rust
//! use stride_meter::stride::fit_points;
//!
//! let points = [(150.0, 0.80), (160.0, 0.85), (170.0, 0.90), (180.0, 0.95), (190.0, 1.00)];
//! let ols = fit_points(&points).unwrap();
//! assert!((ols.alpha - 0.005).abs() < 1e-12);
//! assert!((ols.beta - 0.05).abs() < 1e-9);
//! ```

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{OptionExt, Result, StrideError};

/// Shortest plausible stride in meters.
pub const STRIDE_MIN_M: f64 = 0.3;
/// Longest plausible stride in meters.
pub const STRIDE_MAX_M: f64 = 1.2;
/// Fewest calibration records a model may be fitted from.
pub const MIN_FIT_SIZE: u32 = 5;

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for stride model fitting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct StrideConfig {
    /// Minimum number of valid calibration records. Values below
    /// [`MIN_FIT_SIZE`] are raised to it, so every fitted model can be read
    /// back with [`StrideModel::from_json`].
    /// Default: 5
    pub minimum_fit_size: u32,

    /// Length of the calibration course in meters.
    /// Default: 100.0
    pub known_distance_m: f64,
}

impl Default for StrideConfig {
    fn default() -> Self {
        Self {
            minimum_fit_size: MIN_FIT_SIZE,
            known_distance_m: 100.0,
        }
    }
}

// ============================================================================
// Core Types
// ============================================================================

/// One calibration run over the known course.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationRecord {
    pub total_steps: u32,
    /// Average cadence over the run in SPM
    pub average_cadence: f64,
    pub elapsed_seconds: f64,
    pub measured_at: DateTime<Utc>,
}

impl CalibrationRecord {
    /// Create a record measured now.
    pub fn new(total_steps: u32, average_cadence: f64, elapsed_seconds: f64) -> Self {
        Self {
            total_steps,
            average_cadence,
            elapsed_seconds,
            measured_at: Utc::now(),
        }
    }

    /// Average step length over a course of `known_distance` meters.
    pub fn step_length(&self, known_distance: f64) -> f64 {
        if self.total_steps == 0 {
            return 0.0;
        }
        known_distance / self.total_steps as f64
    }

    /// Check the record's invariants.
    pub fn validate(&self) -> Result<()> {
        if self.total_steps == 0 {
            return Err(StrideError::InvalidValue {
                field: "totalSteps",
                message: "must be greater than zero".to_string(),
            });
        }
        if !(self.average_cadence.is_finite() && self.average_cadence > 0.0) {
            return Err(StrideError::InvalidValue {
                field: "averageCadence",
                message: format!("{} is not a positive cadence", self.average_cadence),
            });
        }
        if !(self.elapsed_seconds.is_finite() && self.elapsed_seconds > 0.0) {
            return Err(StrideError::InvalidValue {
                field: "elapsedSeconds",
                message: format!("{} is not a positive duration", self.elapsed_seconds),
            });
        }
        Ok(())
    }

    /// Decode a record, distinguishing missing, malformed and invalid fields.
    pub fn from_json(json: &str) -> Result<Self> {
        let record: Self = decode_object(json, CALIBRATION_RECORD_SCHEMA)?;
        record.validate()?;
        Ok(record)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// A fitted stride model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrideModel {
    /// Meters of stride per SPM
    pub alpha: f64,
    /// Intercept in meters
    pub beta: f64,
    /// Coefficient of determination of the fit
    pub r_squared: f64,
    pub created_at: DateTime<Utc>,
    /// Number of calibration records the model was fitted from
    pub sample_count: u32,
}

impl StrideModel {
    /// Predicted stride length in meters, clamped to [0.3, 1.2].
    ///
    /// Non-finite results fail closed to the lower bound.
    pub fn predict(&self, cadence: f64) -> f64 {
        let raw = self.alpha * cadence + self.beta;
        if !raw.is_finite() {
            return STRIDE_MIN_M;
        }
        raw.clamp(STRIDE_MIN_M, STRIDE_MAX_M)
    }

    /// Whether this model should replace `other`: better R², or equal R² from
    /// more calibration runs.
    pub fn is_better_than(&self, other: &StrideModel) -> bool {
        const EPS: f64 = 1e-9;
        if (self.r_squared - other.r_squared).abs() <= EPS {
            self.sample_count > other.sample_count
        } else {
            self.r_squared > other.r_squared
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("alpha", self.alpha),
            ("beta", self.beta),
            ("rSquared", self.r_squared),
        ] {
            if !value.is_finite() {
                return Err(StrideError::InvalidValue {
                    field,
                    message: format!("{} is not finite", value),
                });
            }
        }
        if self.sample_count < MIN_FIT_SIZE {
            return Err(StrideError::InvalidValue {
                field: "sampleCount",
                message: format!(
                    "{} is below the minimum fit size {}",
                    self.sample_count, MIN_FIT_SIZE
                ),
            });
        }
        Ok(())
    }

    /// Decode a model, distinguishing missing, malformed and invalid fields.
    pub fn from_json(json: &str) -> Result<Self> {
        let model: Self = decode_object(json, STRIDE_MODEL_SCHEMA)?;
        model.validate()?;
        Ok(model)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

// ============================================================================
// Least Squares
// ============================================================================

/// Result of a simple linear regression.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OlsFit {
    pub alpha: f64,
    pub beta: f64,
    pub r_squared: f64,
}

/// Ordinary least squares over `(cadence, step_length)` pairs.
///
/// Fails on fewer than two points or zero cadence variance. R² is 0 when the
/// step lengths have no variance.
pub fn fit_points(points: &[(f64, f64)]) -> Result<OlsFit> {
    if points.len() < 2 {
        return Err(StrideError::InsufficientData {
            what: "regression points",
            count: points.len(),
            minimum: 2,
        });
    }

    let n = points.len() as f64;
    let x_mean = points.iter().map(|(x, _)| x).sum::<f64>() / n;
    let y_mean = points.iter().map(|(_, y)| y).sum::<f64>() / n;

    let (sxy, sxx) = points.iter().fold((0.0, 0.0), |(sxy, sxx), (x, y)| {
        let dx = x - x_mean;
        (sxy + dx * (y - y_mean), sxx + dx * dx)
    });

    let alpha = Some(sxx)
        .filter(|d| *d != 0.0 && d.is_finite())
        .map(|d| sxy / d)
        .ok_or_degenerate("cadence has zero variance")?;
    let beta = y_mean - alpha * x_mean;

    let ss_res: f64 = points
        .iter()
        .map(|(x, y)| (y - (alpha * x + beta)).powi(2))
        .sum();
    let ss_tot: f64 = points.iter().map(|(_, y)| (y - y_mean).powi(2)).sum();

    let r_squared = if ss_tot == 0.0 {
        0.0
    } else {
        (1.0 - ss_res / ss_tot).clamp(0.0, 1.0)
    };

    if !(alpha.is_finite() && beta.is_finite()) {
        return Err(StrideError::DegenerateInput {
            message: "regression produced non-finite coefficients".to_string(),
        });
    }

    Ok(OlsFit {
        alpha,
        beta,
        r_squared,
    })
}

// ============================================================================
// Fitter
// ============================================================================

/// Fits [`StrideModel`]s from calibration records.
#[derive(Debug, Clone, Default)]
pub struct StrideModelFitter {
    config: StrideConfig,
}

impl StrideModelFitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: StrideConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StrideConfig {
        &self.config
    }

    /// Fit a model, reporting why it could not be fitted.
    ///
    /// Records violating their invariants are skipped before the size check.
    pub fn try_fit(&self, records: &[CalibrationRecord]) -> Result<StrideModel> {
        let valid: Vec<&CalibrationRecord> = records
            .iter()
            .filter(|r| match r.validate() {
                Ok(()) => true,
                Err(e) => {
                    warn!("[StrideModelFitter] Skipping calibration record: {}", e);
                    false
                }
            })
            .collect();

        let minimum = self.config.minimum_fit_size.max(MIN_FIT_SIZE) as usize;
        if valid.len() < minimum {
            return Err(StrideError::InsufficientData {
                what: "calibration records",
                count: valid.len(),
                minimum,
            });
        }

        let points: Vec<(f64, f64)> = valid
            .iter()
            .map(|r| (r.average_cadence, r.step_length(self.config.known_distance_m)))
            .collect();
        let ols = fit_points(&points)?;

        Ok(StrideModel {
            alpha: ols.alpha,
            beta: ols.beta,
            r_squared: ols.r_squared,
            created_at: Utc::now(),
            sample_count: valid.len() as u32,
        })
    }

    /// Fit a model from calibration records. `None` when there are too few
    /// records or the cadences have no spread.
    pub fn fit(&self, records: &[CalibrationRecord]) -> Option<StrideModel> {
        match self.try_fit(records) {
            Ok(model) => {
                info!(
                    "[StrideModelFitter] Fitted stride = {:.5} * cadence + {:.4} (R² {:.3}, n={})",
                    model.alpha, model.beta, model.r_squared, model.sample_count
                );
                Some(model)
            }
            Err(e) => {
                info!("[StrideModelFitter] No model: {}", e);
                None
            }
        }
    }

    /// Fit from `records` and return whichever of the new fit and `current`
    /// should be held.
    pub fn refit(
        &self,
        current: Option<&StrideModel>,
        records: &[CalibrationRecord],
    ) -> Option<StrideModel> {
        let fitted = self.fit(records);
        match (fitted, current) {
            (Some(new), Some(old)) if !new.is_better_than(old) => {
                debug!(
                    "[StrideModelFitter] Keeping existing model (R² {:.3} vs {:.3})",
                    old.r_squared, new.r_squared
                );
                Some(old.clone())
            }
            (Some(new), _) => Some(new),
            (None, old) => old.cloned(),
        }
    }

    /// Clamped stride prediction for `cadence`.
    pub fn predict(&self, model: &StrideModel, cadence: f64) -> f64 {
        model.predict(cadence)
    }
}

// ============================================================================
// Structured Decoding
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum FieldKind {
    Number,
    Count,
    Timestamp,
}

const CALIBRATION_RECORD_SCHEMA: &[(&str, FieldKind)] = &[
    ("totalSteps", FieldKind::Count),
    ("averageCadence", FieldKind::Number),
    ("elapsedSeconds", FieldKind::Number),
    ("measuredAt", FieldKind::Timestamp),
];

const STRIDE_MODEL_SCHEMA: &[(&str, FieldKind)] = &[
    ("alpha", FieldKind::Number),
    ("beta", FieldKind::Number),
    ("rSquared", FieldKind::Number),
    ("createdAt", FieldKind::Timestamp),
    ("sampleCount", FieldKind::Count),
];

fn check_field(obj: &Map<String, Value>, field: &'static str, kind: FieldKind) -> Result<()> {
    let value = match obj.get(field) {
        None | Some(Value::Null) => return Err(StrideError::MissingField { field }),
        Some(v) => v,
    };

    let malformed = |message: String| StrideError::MalformedField { field, message };

    match kind {
        FieldKind::Number => value
            .as_f64()
            .map(|_| ())
            .ok_or_else(|| malformed(format!("expected a number, got {}", value))),
        FieldKind::Count => value
            .as_u64()
            .filter(|n| *n <= u32::MAX as u64)
            .map(|_| ())
            .ok_or_else(|| malformed(format!("expected a non-negative integer, got {}", value))),
        FieldKind::Timestamp => {
            let text = value
                .as_str()
                .ok_or_else(|| malformed(format!("expected an RFC 3339 string, got {}", value)))?;
            DateTime::parse_from_rfc3339(text)
                .map(|_| ())
                .map_err(|e| malformed(e.to_string()))
        }
    }
}

fn decode_object<T: DeserializeOwned>(json: &str, schema: &[(&'static str, FieldKind)]) -> Result<T> {
    let value: Value = serde_json::from_str(json).map_err(|e| StrideError::InvalidJson {
        message: e.to_string(),
    })?;
    let obj = value.as_object().ok_or_else(|| StrideError::InvalidJson {
        message: "expected a JSON object".to_string(),
    })?;

    // A missing field is reported ahead of any malformed one
    for (field, _) in schema {
        if matches!(obj.get(*field), None | Some(Value::Null)) {
            return Err(StrideError::MissingField { field: *field });
        }
    }
    for (field, kind) in schema {
        check_field(obj, *field, *kind)?;
    }

    serde_json::from_value(value).map_err(|e| StrideError::InvalidJson {
        message: e.to_string(),
    })
}

// ============================================================================
// Tests
// ============================================================================
