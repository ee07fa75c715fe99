//! Crate error type.

use thiserror::Error;

/// Errors surfaced to callers of the engine.
///
/// Numerical trouble inside the update path (degenerate Sherman–Morrison
/// denominators, drifted inverses) is healed internally and never shows up
/// here.
#[derive(Debug, Error)]
pub enum Error {
    /// Caller error: empty candidate set or wrong context length.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Rejected at engine construction.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// No inverse could be obtained for `arm`'s design matrix.
    ///
    /// Unreachable for ridge-regularized state; kept so a pathological state
    /// is reported rather than silently scored.
    #[error("singular design matrix for arm {arm:?}")]
    SingularMatrix { arm: String },

    #[error("snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot (de)serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn dimension_mismatch(what: &str, expected: usize, actual: usize) -> Self {
        Error::InvalidInput(format!(
            "{what} has length {actual}, engine dimension is {expected}"
        ))
    }
}
