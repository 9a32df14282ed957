use std::f32::consts::PI;

use glam::{DQuat, DVec3, Vec3};

use crate::point::{Point8, PointGrid};

/// Focal length, in pixels, of the simulated camera.
pub const FOCAL_LENGTH: f32 = 525.0;

/// A smooth non-planar surface about one meter in front of the camera.
///
/// Positions are back-projected through a pinhole camera with the principal
/// point at the grid center. The color encodes the pixel: `r = u / (w − 1)`,
/// `g = v / (h − 1)` and `b = 0.5`.
pub fn surface(width: usize, height: usize) -> PointGrid {
    let (w, h) = (width as f32, height as f32);
    let (cx, cy) = ((w - 1.0) / 2.0, (h - 1.0) / 2.0);
    PointGrid::from_fn(width, height, |u, v| {
        let (uf, vf) = (u as f32, v as f32);
        let z = 1000.0
            + 150.0 * (2.0 * PI * uf / w).sin() * (PI * vf / h).cos()
            + 60.0 * (3.0 * PI * vf / h).sin()
            + 40.0 * (uf / w - 0.3) * (vf / h + 0.2);
        Point8::new(
            [(uf - cx) * z / FOCAL_LENGTH, (vf - cy) * z / FOCAL_LENGTH, z],
            [uf / (w - 1.0).max(1.0), vf / (h - 1.0).max(1.0), 0.5],
        )
    })
}

/// Moves a grid so that `rotation · p + translation` takes it back onto `fixed`.
///
/// Each position becomes `Rᵀ (p − t)`, colors are kept.
pub fn displaced(fixed: &PointGrid, rotation: DQuat, translation: DVec3) -> PointGrid {
    let inverse = rotation.inverse();
    fixed.map_positions(|p| {
        let q = inverse * (p.as_dvec3() - translation);
        Vec3::new(q.x as f32, q.y as f32, q.z as f32)
    })
}
