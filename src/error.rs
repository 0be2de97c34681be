use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("dimension mismatch: expected {expected} columns, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("tracker is not initialized yet")]
    NotInitialized,

    #[error("linear solve failed: {0}")]
    SolveFailed(&'static str),
}
