use thiserror::Error;

/// Errors raised by the compute backend.
#[derive(Debug, Error, PartialEq)]
pub enum ComputeError {
    /// The work-group size must be a power of two and at least 4.
    #[error("invalid work-group size {0}: must be a power of two and at least 4")]
    InvalidWorkGroupSize(usize),

    /// The requested number of compute units is invalid.
    #[error("compute unit count must be > 0, got {0}")]
    InvalidComputeUnits(usize),

    /// The thread pool backing the device failed to build.
    #[error("failed to build thread pool: {0}")]
    ThreadPool(String),

    /// A kernel was configured with a shape it cannot handle.
    #[error("{kernel}: {reason}")]
    InvalidShape {
        /// Name of the kernel that rejected the configuration.
        kernel: &'static str,
        /// Human readable reason.
        reason: String,
    },

    /// The buffer handle does not belong to this arena.
    #[error("buffer #{0} does not exist")]
    UnknownBuffer(usize),

    /// The buffer is currently checked out by a running command.
    #[error("buffer #{0} is in use by a running command")]
    BufferInUse(usize),

    /// The buffer stores a different element type than the handle.
    #[error("buffer #{0} holds a different element type")]
    TypeMismatch(usize),

    /// The data length does not match the buffer length.
    #[error("buffer #{id} has {expected} elements, got {actual}")]
    LengthMismatch {
        /// Buffer id.
        id: usize,
        /// Number of elements of the buffer.
        expected: usize,
        /// Number of elements provided.
        actual: usize,
    },

    /// A queued command failed while the queue was drained.
    #[error("command `{label}` failed: {source}")]
    CommandFailed {
        /// Label given when the command was enqueued.
        label: &'static str,
        /// The underlying error.
        source: Box<ComputeError>,
    },
}

impl ComputeError {
    /// Shortcut to build an [`ComputeError::InvalidShape`] error.
    pub fn invalid_shape(kernel: &'static str, reason: impl Into<String>) -> Self {
        ComputeError::InvalidShape {
            kernel,
            reason: reason.into(),
        }
    }
}
