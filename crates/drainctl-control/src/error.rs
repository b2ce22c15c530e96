//! Controller error types.

use thiserror::Error;

/// Errors surfaced when constructing a controller.
///
/// These are configuration mistakes: nothing here occurs once the control
/// loop is running.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("control period must be positive")]
    ZeroPeriod,

    #[error("drain horizon must be positive")]
    ZeroDrainHorizon,

    #[error("smoother size must be positive")]
    ZeroSmootherSize,

    #[error("initial worker guess must be finite and non-negative, got {0}")]
    BadInitialGuess(f64),
}
