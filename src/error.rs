//! Unified error handling for the stride-meter library.
//!
//! Real-time estimation never surfaces these errors to the host: cadence
//! collapses to `0.0` and a failed fit collapses to `None`. The typed errors
//! exist so that the fallible internals (`try_fit`, record decoding) can say
//! exactly what went wrong before the sentinel is returned.

use thiserror::Error;

/// Unified error type for stride-meter operations.
#[derive(Debug, Error)]
pub enum StrideError {
    /// Too few samples, peaks or calibration records for the operation
    #[error("Insufficient {what}: got {count}, minimum {minimum} required")]
    InsufficientData {
        what: &'static str,
        count: usize,
        minimum: usize,
    },
    /// Input exists but cannot define a result (zero variance, zero elapsed time)
    #[error("Degenerate input: {message}")]
    DegenerateInput { message: String },
    /// A required field is absent from a serialized record
    #[error("Missing field '{field}'")]
    MissingField { field: &'static str },
    /// A field is present but has the wrong shape
    #[error("Malformed field '{field}': {message}")]
    MalformedField { field: &'static str, message: String },
    /// A field decoded but violates the record's invariants
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: &'static str, message: String },
    /// Payload is not JSON, or not a JSON object
    #[error("Invalid JSON: {message}")]
    InvalidJson { message: String },
}

/// Result type alias for stride-meter operations.
pub type Result<T> = std::result::Result<T, StrideError>;

/// Extension trait for converting Option to StrideError.
pub trait OptionExt<T> {
    /// Convert Option to Result with an insufficient data error.
    fn ok_or_insufficient(self, what: &'static str, count: usize, minimum: usize) -> Result<T>;

    /// Convert Option to Result with a degenerate input error.
    fn ok_or_degenerate(self, message: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_insufficient(self, what: &'static str, count: usize, minimum: usize) -> Result<T> {
        self.ok_or(StrideError::InsufficientData {
            what,
            count,
            minimum,
        })
    }

    fn ok_or_degenerate(self, message: &str) -> Result<T> {
        self.ok_or_else(|| StrideError::DegenerateInput {
            message: message.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StrideError::InsufficientData {
            what: "calibration records",
            count: 3,
            minimum: 5,
        };
        assert!(err.to_string().contains("calibration records"));
        assert!(err.to_string().contains("got 3"));

        let err = StrideError::MissingField { field: "alpha" };
        assert_eq!(err.to_string(), "Missing field 'alpha'");
    }

    #[test]
    fn test_option_ext() {
        let none: Option<i32> = None;
        let result = none.ok_or_insufficient("peaks", 1, 2);
        assert!(matches!(
            result,
            Err(StrideError::InsufficientData { minimum: 2, .. })
        ));

        let none: Option<i32> = None;
        assert!(matches!(
            none.ok_or_degenerate("zero variance"),
            Err(StrideError::DegenerateInput { .. })
        ));
        assert_eq!(Some(4).ok_or_degenerate("unused").unwrap(), 4);
    }
}
