#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

mod centroid;
pub use centroid::*;

mod config;
pub use config::{IcpConfig, IndexKind, RotationStrategy, Weighting};

mod covariance;
pub use covariance::*;

mod deviation;
pub use deviation::*;

mod error;
pub use error::IcpError;

/// Correspondence search over the fixed landmarks.
pub mod index;
pub use index::{Correspondence, KdTreeIndex, RbcIndex, SpatialIndex};

mod point;
pub use point::*;

mod registration;
pub use registration::*;

mod rotation;
pub use rotation::*;

/// Landmark and representative sampling.
pub mod sampling;
pub use sampling::{Landmarks, Representatives};

mod state;
pub use state::*;

mod step;
pub use step::*;

/// Synthetic colored surfaces for tests, benchmarks and demos.
pub mod synthetic;

mod transform;
pub use transform::*;

mod weights;
pub use weights::*;
