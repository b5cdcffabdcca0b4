use thiserror::Error;

/// Failures the estimator core can report.
///
/// Only `InvalidCalibration` is fatal.  Fit failures are folded into
/// `Prediction::InsufficientData` before they reach a caller, and log
/// row problems are recovered where they are found.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CycleError {
    #[error("invalid calibration: dry_value {dry} and wet_value {wet} do not span a range")]
    InvalidCalibration { dry: f64, wet: f64 },

    #[error("insufficient data: need {needed} observations, have {available}")]
    InsufficientData { needed: usize, available: usize },

    #[error("row {row}: malformed timestamp '{value}'")]
    MalformedTimestamp { row: usize, value: String },

    #[error("row {row}: malformed value '{value}'")]
    MalformedValue { row: usize, value: String },

    #[error("autoregressive fit is numerically singular")]
    SingularFit,
}
