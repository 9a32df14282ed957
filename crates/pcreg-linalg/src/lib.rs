#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Power iteration on Horn's quaternion matrix.
pub mod power;

/// Module to calculate SVD of a 3x3 matrix
pub mod svd;

/// Quaternion, axis-angle and similarity helpers.
pub mod transforms;
