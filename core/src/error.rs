//! Crate error type.
//!
//! Only contract violations and I/O failures are errors. Epochs that cannot be
//! used for a correction (no satellites, no solver, unresolved clock jump) are
//! reported through [`crate::tightly::CorrectionOutcome`] instead.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("state index {index} out of range (state size {size})")]
    InvalidIndex { index: usize, size: usize },
    #[error("clock channel {channel} out of range ({channels} channels)")]
    InvalidClockChannel { channel: usize, channels: usize },
    #[error("{what}: expected dimension {expected}, got {actual}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("innovation covariance is not invertible")]
    SingularInnovation,
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
