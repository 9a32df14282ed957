use std::path::Path;

use glam::Vec3;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::IcpError;

/// A colored point: homogeneous position `(x, y, z, 1)` and color `(r, g, b, 1)`.
///
/// Positions are in physical units (millimeters for depth sensors) and colors
/// are normalized to `[0, 1]`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point8 {
    /// Homogeneous position.
    pub geometry: [f32; 4],
    /// Color, with a unit fourth component.
    pub photometry: [f32; 4],
}

impl Point8 {
    /// Creates a point from a position and a color.
    pub fn new(position: [f32; 3], color: [f32; 3]) -> Self {
        Self {
            geometry: [position[0], position[1], position[2], 1.0],
            photometry: [color[0], color[1], color[2], 1.0],
        }
    }

    /// Position as a vector.
    #[inline]
    pub fn position(&self) -> Vec3 {
        Vec3::new(self.geometry[0], self.geometry[1], self.geometry[2])
    }

    /// Color as a vector.
    #[inline]
    pub fn color(&self) -> Vec3 {
        Vec3::new(self.photometry[0], self.photometry[1], self.photometry[2])
    }

    /// Returns a copy with the position replaced and the color untouched.
    #[inline]
    pub fn with_position(mut self, position: Vec3) -> Self {
        self.geometry[0] = position.x;
        self.geometry[1] = position.y;
        self.geometry[2] = position.z;
        self
    }

    /// The 8 scalars of the point, position first.
    pub fn to_array(&self) -> [f32; 8] {
        let [x, y, z, w] = self.geometry;
        let [r, g, b, a] = self.photometry;
        [x, y, z, w, r, g, b, a]
    }

    /// Builds a point from 8 interleaved scalars.
    pub fn from_array(v: [f32; 8]) -> Self {
        Self {
            geometry: [v[0], v[1], v[2], v[3]],
            photometry: [v[4], v[5], v[6], v[7]],
        }
    }
}

/// A dense, row-major grid of points as produced by an RGB-D camera.
#[derive(Debug, Clone, PartialEq)]
pub struct PointGrid {
    width: usize,
    height: usize,
    points: Vec<Point8>,
}

impl PointGrid {
    /// Wraps `width * height` points.
    pub fn new(width: usize, height: usize, points: Vec<Point8>) -> Result<Self, IcpError> {
        if points.len() != width * height {
            return Err(IcpError::invalid(format!(
                "a {width}x{height} grid needs {} points, got {}",
                width * height,
                points.len()
            )));
        }
        Ok(Self {
            width,
            height,
            points,
        })
    }

    /// Builds a grid by evaluating `f(x, y)` at every cell.
    pub fn from_fn(width: usize, height: usize, f: impl Fn(usize, usize) -> Point8 + Sync) -> Self {
        let points = (0..width * height)
            .into_par_iter()
            .map(|i| f(i % width, i / width))
            .collect();
        Self {
            width,
            height,
            points,
        }
    }

    /// Builds a grid from 8 interleaved `f32` per point.
    pub fn from_raw_f32(width: usize, height: usize, data: &[f32]) -> Result<Self, IcpError> {
        if data.len() != 8 * width * height {
            return Err(IcpError::RawLength(data.len(), 8 * width * height));
        }
        let points = data
            .chunks_exact(8)
            .map(|c| Point8::from_array([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
            .collect();
        Self::new(width, height, points)
    }

    /// Reads a grid stored as little-endian interleaved `f32`, 8 per point.
    pub fn read_raw(path: impl AsRef<Path>, width: usize, height: usize) -> Result<Self, IcpError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| IcpError::Io {
            path: path.display().to_string(),
            source,
        })?;
        if bytes.len() % 4 != 0 {
            return Err(IcpError::RawLength(bytes.len() / 4, 8 * width * height));
        }
        let data = bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect::<Vec<_>>();
        Self::from_raw_f32(width, height, &data)
    }

    /// Writes the grid as little-endian interleaved `f32`.
    pub fn write_raw(&self, path: impl AsRef<Path>) -> Result<(), IcpError> {
        let path = path.as_ref();
        let bytes = self
            .points
            .iter()
            .flat_map(|p| p.to_array())
            .flat_map(f32::to_le_bytes)
            .collect::<Vec<u8>>();
        std::fs::write(path, bytes).map_err(|source| IcpError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    /// Number of columns.
    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of rows.
    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Number of points.
    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Check if the grid is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// The points in row-major order.
    pub fn points(&self) -> &[Point8] {
        &self.points
    }

    /// The point at column `x` and row `y`.
    pub fn get(&self, x: usize, y: usize) -> Option<&Point8> {
        if x >= self.width {
            return None;
        }
        self.points.get(y * self.width + x)
    }

    /// Applies `f` to every position, keeping colors and the grid layout.
    pub fn map_positions(&self, f: impl Fn(Vec3) -> Vec3 + Sync) -> Self {
        let points = self
            .points
            .par_iter()
            .map(|p| p.with_position(f(p.position())))
            .collect();
        Self {
            width: self.width,
            height: self.height,
            points,
        }
    }
}

/// Positions and colors of a point set as two separate arrays, ready for upload
/// to a renderer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DisplayBuffers {
    /// Homogeneous positions.
    pub geometry: Vec<[f32; 4]>,
    /// Colors.
    pub colors: Vec<[f32; 4]>,
}

impl DisplayBuffers {
    /// Splits interleaved points.
    pub fn split(points: &[Point8]) -> Self {
        let (geometry, colors) = points.iter().map(|p| (p.geometry, p.photometry)).unzip();
        Self { geometry, colors }
    }

    /// Interleaves the arrays back into points.
    pub fn interleave(&self) -> Vec<Point8> {
        self.geometry
            .iter()
            .zip(&self.colors)
            .map(|(&geometry, &photometry)| Point8 {
                geometry,
                photometry,
            })
            .collect()
    }
}
