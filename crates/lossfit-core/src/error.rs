//! Error types for the training core.
//!
//! Configuration problems are reported before any epoch runs; numerical
//! degeneracies that have no safe in-place fallback surface as
//! [`TrainingError::NumericalError`] and end the run.

use thiserror::Error;

/// Errors that can occur while configuring or driving a training run.
#[derive(Debug, Clone, Error)]
pub enum TrainingError {
    /// The optimizer or stopping criteria were configured with an
    /// unusable value (e.g. a negative learning rate or a zero
    /// parameter count).
    #[error("Invalid training configuration: {reason} ({parameter} = {value})")]
    InvalidConfiguration {
        /// Description of the configuration error
        reason: String,
        /// Name of the offending parameter
        parameter: String,
        /// Value that was rejected
        value: String,
    },

    /// Dimension mismatch between vectors or matrices.
    ///
    /// Raised when a gradient or candidate parameter vector does not match
    /// the model's parameter count.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected dimensions
        expected: String,
        /// Actual dimensions
        actual: String,
    },

    /// Numerical instability detected.
    ///
    /// Raised for non-finite losses or gradients and for search states
    /// that cannot be recovered by a restart.
    #[error("Numerical instability detected: {reason}")]
    NumericalError {
        /// Description of the numerical issue
        reason: String,
    },
}

impl TrainingError {
    /// Create an InvalidConfiguration error.
    pub fn invalid_configuration<S1, S2, S3>(reason: S1, parameter: S2, value: S3) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
    {
        Self::InvalidConfiguration {
            reason: reason.into(),
            parameter: parameter.into(),
            value: value.into(),
        }
    }

    /// Create a DimensionMismatch error.
    pub fn dimension_mismatch<S1, S2>(expected: S1, actual: S2) -> Self
    where
        S1: std::fmt::Display,
        S2: std::fmt::Display,
    {
        Self::DimensionMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Create a NumericalError with a custom reason.
    pub fn numerical_error<S: Into<String>>(reason: S) -> Self {
        Self::NumericalError {
            reason: reason.into(),
        }
    }
}

/// Result type alias for training operations.
pub type Result<T> = std::result::Result<T, TrainingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = TrainingError::invalid_configuration("must be positive", "momentum", "-0.5");
        assert!(matches!(err, TrainingError::InvalidConfiguration { .. }));
        assert!(err.to_string().contains("momentum"));

        let err = TrainingError::dimension_mismatch(3, 4);
        assert_eq!(err.to_string(), "Dimension mismatch: expected 3, got 4");
    }

    #[test]
    fn test_error_display_non_empty() {
        let errors = vec![
            TrainingError::invalid_configuration("unreachable goal", "loss_goal", "NaN"),
            TrainingError::dimension_mismatch("5", "0"),
            TrainingError::numerical_error("loss is not finite"),
        ];

        for err in errors {
            assert!(!err.to_string().is_empty());
        }
    }
}
