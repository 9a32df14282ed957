#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

mod buffer;
pub use buffer::{Buffer, BufferArena, Element};

mod device;
pub use device::{Device, DEFAULT_WORK_GROUP_SIZE};

mod error;
pub use error::ComputeError;

/// Work-group tiling helpers for writing kernels.
pub mod launch;

mod queue;
pub use queue::{Command, Queue};

/// Row-wise min/max/sum reduction.
pub mod reduce;
pub use reduce::{Reduce, ReduceOp};

/// Row-wise inclusive/exclusive prefix scan.
pub mod scan;
pub use scan::{Scan, ScanKind};
