#![doc = env!("CARGO_PKG_DESCRIPTION")]

#[doc(inline)]
pub use pcreg_compute as compute;

#[doc(inline)]
pub use pcreg_linalg as linalg;

#[doc(inline)]
pub use pcreg_icp as icp;
