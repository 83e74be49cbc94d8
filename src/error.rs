//! Error types for fedaf-sim

use thiserror::Error;

/// All possible errors raised while running a simulation
#[derive(Error, Debug)]
pub enum FedError {
    /// No updates were provided for aggregation
    #[error("Empty updates provided")]
    EmptyUpdates,

    /// Updates have inconsistent dimensions
    #[error("Dimension mismatch in updates")]
    DimensionMismatch,

    /// A model state lacks a parameter another state has
    #[error("Missing parameter '{0}' in model state")]
    MissingParameter(String),

    /// Not enough participants (or total weight) to aggregate
    #[error("Insufficient quorum: need {needed}, got {actual}")]
    InsufficientQuorum {
        /// Minimum required participants
        needed: usize,
        /// Actual participants received
        actual: usize,
    },

    /// Trim fraction is outside valid range
    #[error("Invalid trim fraction: {0} (must be 0.0-0.5)")]
    InvalidTrimFraction(f32),

    /// Experiment configuration rejected by validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Data could not be partitioned across clients
    #[error("Partition error: {0}")]
    Partition(String),

    /// An operation needed at least one sample
    #[error("Dataset is empty")]
    EmptyDataset,

    /// Array shape mismatch
    #[error("Array shape error: {0}")]
    Shape(String),

    /// Filesystem failure in the distillation store
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<ndarray::ShapeError> for FedError {
    fn from(e: ndarray::ShapeError) -> Self {
        FedError::Shape(e.to_string())
    }
}
