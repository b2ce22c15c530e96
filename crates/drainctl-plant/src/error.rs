//! Plant error types.

use thiserror::Error;

/// Errors raised while reducing raw metric series to plant stats.
#[derive(Debug, Error)]
pub enum PlantError {
    /// A rate series needs at least two data points: the freshest bucket
    /// may still be filling and cannot be trusted.
    #[error("rate series needs at least two data points, got {0}")]
    ShortRateSeries(usize),

    #[error("gauge series has no data points")]
    EmptyGaugeSeries,
}
