use pcreg_compute::{Buffer, Queue};

use crate::error::IcpError;
use crate::point::Point8;

mod kdtree;
pub use kdtree::KdTreeIndex;

mod rbc;
pub use rbc::RbcIndex;

/// Result of a nearest neighbour query.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Correspondence {
    /// Distance to the nearest fixed landmark, `‖Δp‖² + α‖Δc‖²`.
    pub dist: f32,
    /// Index of the nearest fixed landmark.
    pub id: u32,
}

/// Joint geometric and photometric distance between two points.
///
/// `d(a, b) = ‖Δp‖² + α‖Δc‖²`, with `α` weighting the color term.
#[inline]
pub fn distance(a: &Point8, b: &Point8, alpha: f32) -> f32 {
    a.position().distance_squared(b.position()) + alpha * a.color().distance_squared(b.color())
}

/// Exact nearest neighbour by exhaustive search. Ties go to the lowest index.
pub fn nearest_brute_force(points: &[Point8], query: &Point8, alpha: f32) -> Correspondence {
    points
        .iter()
        .enumerate()
        .fold(
            Correspondence {
                dist: f32::INFINITY,
                id: 0,
            },
            |best, (i, p)| {
                let dist = distance(p, query, alpha);
                if dist < best.dist {
                    Correspondence { dist, id: i as u32 }
                } else {
                    best
                }
            },
        )
}

/// A correspondence search structure over the fixed landmarks.
///
/// Implementations are configured with the handles of the buffers they read:
/// the fixed landmarks, the representatives and the query points. Building and
/// searching only enqueue commands.
pub trait SpatialIndex: Send + std::fmt::Debug {
    /// Enqueues the construction of the index from the fixed landmarks.
    fn build(&mut self, queue: &mut Queue) -> Result<(), IcpError>;

    /// Enqueues a search for every query point.
    ///
    /// Query `i` writes its nearest fixed landmark to `nearest_points()[i]` and
    /// its distance and index to `correspondences()[i]`.
    fn search(&self, queue: &mut Queue);

    /// Buffer of the matched fixed points, aligned with the queries.
    fn nearest_points(&self) -> Buffer<Point8>;

    /// Buffer of the matches, aligned with the queries.
    fn correspondences(&self) -> Buffer<Correspondence>;

    /// Weight of the color term of the distance.
    fn alpha(&self) -> f32;

    /// Updates the weight of the color term. Takes effect at the next build.
    fn set_alpha(&mut self, alpha: f32) -> Result<(), IcpError>;
}

pub(crate) fn check_alpha(alpha: f32) -> Result<(), IcpError> {
    if !alpha.is_finite() || alpha < 0.0 {
        return Err(IcpError::invalid(format!(
            "index_scale_alpha must be finite and >= 0, got {alpha}"
        )));
    }
    Ok(())
}

pub(crate) fn check_queries(landmarks: Buffer<Point8>, queries: Buffer<Point8>) -> Result<(), IcpError> {
    if landmarks.is_empty() || queries.is_empty() {
        return Err(IcpError::invalid("spatial index needs landmarks and queries"));
    }
    if landmarks.len() > u32::MAX as usize {
        return Err(IcpError::invalid("too many landmarks for 32 bit ids"));
    }
    Ok(())
}
