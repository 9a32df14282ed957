use pcreg_compute::ComputeError;
use thiserror::Error;

/// Errors raised by the registration pipeline.
#[derive(Debug, Error)]
pub enum IcpError {
    /// Error from the compute backend.
    #[error(transparent)]
    Compute(#[from] ComputeError),

    /// A stage or the session was configured with invalid parameters.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The point grid does not have the dimensions the session was built for.
    #[error("point grid is {actual_width}x{actual_height}, expected {width}x{height}")]
    GridSizeMismatch {
        /// Expected width.
        width: usize,
        /// Expected height.
        height: usize,
        /// Width of the grid provided.
        actual_width: usize,
        /// Height of the grid provided.
        actual_height: usize,
    },

    /// A raw buffer does not hold a whole number of points.
    #[error("raw buffer holds {0} floats, expected {1}")]
    RawLength(usize, usize),

    /// A covariance bundle was read with the wrong length.
    #[error("covariance bundle needs 11 values, got {0}")]
    BundleLength(usize),

    /// Failed to read a file.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Path of the file.
        path: String,
        /// The underlying error.
        source: std::io::Error,
    },

    /// Failed to parse a configuration.
    #[error("failed to parse configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl IcpError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        IcpError::InvalidConfig(reason.into())
    }
}
