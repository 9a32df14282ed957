use pcreg_compute::launch::launch_items;
use pcreg_compute::{Buffer, Queue};

use crate::error::IcpError;
use crate::point::{Point8, PointGrid};

/// Columns of the landmark grid.
pub const LANDMARKS_WIDTH: usize = 128;
/// Rows of the landmark grid.
pub const LANDMARKS_HEIGHT: usize = 128;
/// Number of landmarks sampled from a point grid.
pub const NUM_LANDMARKS: usize = LANDMARKS_WIDTH * LANDMARKS_HEIGHT;

const STRIDE_X: usize = 4;
const STRIDE_Y: usize = 3;

/// Smallest point grid the landmark sampler accepts.
pub const MIN_GRID_WIDTH: usize = LANDMARKS_WIDTH * STRIDE_X;
/// Smallest point grid the landmark sampler accepts.
pub const MIN_GRID_HEIGHT: usize = LANDMARKS_HEIGHT * STRIDE_Y;

fn check_grid_size(width: usize, height: usize) -> Result<(), IcpError> {
    if width < MIN_GRID_WIDTH || height < MIN_GRID_HEIGHT {
        return Err(IcpError::invalid(format!(
            "point grid {width}x{height} is smaller than {MIN_GRID_WIDTH}x{MIN_GRID_HEIGHT}"
        )));
    }
    Ok(())
}

/// Index into a `width x height` grid of landmark `(lx, ly)`.
///
/// The sampled window is centered in the grid and each sample sits in the
/// middle of its `4 x 3` cell, e.g. `x = 64 + 4·lx + 1`, `y = 48 + 3·ly + 1`
/// for a 640×480 grid.
#[inline]
pub fn landmark_source_index(width: usize, height: usize, lx: usize, ly: usize) -> usize {
    let x = (width - MIN_GRID_WIDTH) / 2 + lx * STRIDE_X + (STRIDE_X - 1) / 2;
    let y = (height - MIN_GRID_HEIGHT) / 2 + ly * STRIDE_Y + (STRIDE_Y - 1) / 2;
    y * width + x
}

/// Samples the landmarks of a grid on the host.
pub fn sample_landmarks(grid: &PointGrid) -> Result<Vec<Point8>, IcpError> {
    check_grid_size(grid.width(), grid.height())?;
    let points = grid.points();
    Ok((0..NUM_LANDMARKS)
        .map(|i| {
            let (lx, ly) = (i % LANDMARKS_WIDTH, i / LANDMARKS_WIDTH);
            points[landmark_source_index(grid.width(), grid.height(), lx, ly)]
        })
        .collect())
}

/// Strided subsampling of a point grid into the `128 x 128` landmark set.
#[derive(Debug, Clone)]
pub struct Landmarks {
    width: usize,
    height: usize,
    grid: Buffer<Point8>,
    output: Buffer<Point8>,
}

impl Landmarks {
    /// Configures the sampler with its own grid buffer.
    pub fn new(queue: &mut Queue, width: usize, height: usize) -> Result<Self, IcpError> {
        check_grid_size(width, height)?;
        let grid = queue.alloc(width * height);
        Self::with_input(queue, grid, width, height)
    }

    /// Configures the sampler over a grid buffer owned by another stage.
    pub fn with_input(
        queue: &mut Queue,
        grid: Buffer<Point8>,
        width: usize,
        height: usize,
    ) -> Result<Self, IcpError> {
        check_grid_size(width, height)?;
        if grid.len() != width * height {
            return Err(IcpError::invalid(format!(
                "landmark input holds {} points, a {width}x{height} grid needs {}",
                grid.len(),
                width * height
            )));
        }
        Ok(Self {
            width,
            height,
            grid,
            output: queue.alloc(NUM_LANDMARKS),
        })
    }

    /// The full point grid buffer.
    pub fn grid(&self) -> Buffer<Point8> {
        self.grid
    }

    /// The landmark buffer.
    pub fn output(&self) -> Buffer<Point8> {
        self.output
    }

    /// Uploads a point grid, blocking until the copy completes.
    pub fn load(&self, queue: &mut Queue, grid: &PointGrid) -> Result<(), IcpError> {
        if grid.width() != self.width || grid.height() != self.height {
            return Err(IcpError::GridSizeMismatch {
                width: self.width,
                height: self.height,
                actual_width: grid.width(),
                actual_height: grid.height(),
            });
        }
        queue.write_blocking(self.grid, grid.points())?;
        Ok(())
    }

    /// Enqueues the sampling kernel.
    pub fn run(&self, queue: &mut Queue) {
        let (width, height, grid, output) = (self.width, self.height, self.grid, self.output);
        queue.enqueue("landmarks", move |arena| {
            arena.with_output(output, |arena, out| {
                let points = arena.get(grid)?;
                launch_items(out, |i, o| {
                    let (lx, ly) = (i % LANDMARKS_WIDTH, i / LANDMARKS_WIDTH);
                    *o = points[landmark_source_index(width, height, lx, ly)];
                });
                Ok(())
            })
        });
    }
}

/// Factors a representative count into a near-square `nrx x nry` layout.
///
/// With `p = log2(count)`, `nrx = 2^(p - p/2)` and `nry = 2^(p/2)`.
pub fn representative_layout(count: usize) -> Result<(usize, usize), IcpError> {
    if count < 4 || !count.is_power_of_two() || count > NUM_LANDMARKS {
        return Err(IcpError::invalid(format!(
            "number of representatives ({count}) must be a power of two in [4, {NUM_LANDMARKS}]"
        )));
    }
    let p = count.trailing_zeros() as usize;
    Ok((1 << (p - p / 2), 1 << (p / 2)))
}

/// Index into the landmark grid of representative `(rx, ry)`.
#[inline]
pub fn representative_source_index(nrx: usize, nry: usize, rx: usize, ry: usize) -> usize {
    let step_x = LANDMARKS_WIDTH / nrx;
    let step_y = LANDMARKS_HEIGHT / nry;
    let x = (rx * step_x + (step_x >> 1)).saturating_sub(1);
    let y = (ry * step_y + (step_y >> 1)).saturating_sub(1);
    y * LANDMARKS_WIDTH + x
}

/// Strided subsampling of the landmarks into the representatives seeding the
/// spatial index.
#[derive(Debug, Clone)]
pub struct Representatives {
    nrx: usize,
    nry: usize,
    landmarks: Buffer<Point8>,
    output: Buffer<Point8>,
}

impl Representatives {
    /// Configures the sampler over the output of a [`Landmarks`] stage.
    pub fn new(queue: &mut Queue, landmarks: Buffer<Point8>, count: usize) -> Result<Self, IcpError> {
        let (nrx, nry) = representative_layout(count)?;
        if landmarks.len() != NUM_LANDMARKS {
            return Err(IcpError::invalid(format!(
                "representatives sample {NUM_LANDMARKS} landmarks, got {}",
                landmarks.len()
            )));
        }
        Ok(Self {
            nrx,
            nry,
            landmarks,
            output: queue.alloc(count),
        })
    }

    /// The representative buffer.
    pub fn output(&self) -> Buffer<Point8> {
        self.output
    }

    /// Number of representatives.
    pub fn count(&self) -> usize {
        self.nrx * self.nry
    }

    /// Grid layout `(nrx, nry)`.
    pub fn layout(&self) -> (usize, usize) {
        (self.nrx, self.nry)
    }

    /// Enqueues the sampling kernel.
    pub fn run(&self, queue: &mut Queue) {
        let (nrx, nry, landmarks, output) = (self.nrx, self.nry, self.landmarks, self.output);
        queue.enqueue("representatives", move |arena| {
            arena.with_output(output, |arena, out| {
                let landmarks = arena.get(landmarks)?;
                launch_items(out, |i, o| {
                    *o = landmarks[representative_source_index(nrx, nry, i % nrx, i / nrx)];
                });
                Ok(())
            })
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pcreg_compute::Device;

    fn index_grid(width: usize, height: usize) -> PointGrid {
        PointGrid::from_fn(width, height, |x, y| {
            Point8::new([x as f32, y as f32, (y * width + x) as f32], [0.0; 3])
        })
    }

    #[test]
    fn landmark_offsets_for_vga() {
        assert_eq!(landmark_source_index(640, 480, 0, 0), 49 * 640 + 65);
        assert_eq!(landmark_source_index(640, 480, 127, 127), (48 + 381 + 1) * 640 + 64 + 508 + 1);
    }

    #[test]
    fn landmarks_are_deterministic() -> Result<(), Box<dyn std::error::Error>> {
        let grid = index_grid(640, 480);
        let mut queue = Queue::new(Device::cpu())?;
        let landmarks = Landmarks::new(&mut queue, 640, 480)?;
        landmarks.load(&mut queue, &grid)?;

        landmarks.run(&mut queue);
        let first = queue.read(landmarks.output())?;
        landmarks.run(&mut queue);
        let second = queue.read(landmarks.output())?;

        assert_eq!(first, second);
        assert_eq!(first, sample_landmarks(&grid)?);
        assert_eq!(first[0].position().truncate().to_array(), [65.0, 49.0]);
        assert_eq!(first[1].position().x, 69.0);
        assert_eq!(first[LANDMARKS_WIDTH].position().y, 52.0);
        Ok(())
    }

    #[test]
    fn representatives_layout_and_determinism() -> Result<(), Box<dyn std::error::Error>> {
        assert_eq!(representative_layout(256)?, (16, 16));
        assert_eq!(representative_layout(512)?, (32, 16));
        assert_eq!(representative_layout(4)?, (2, 2));
        assert!(representative_layout(0).is_err());
        assert!(representative_layout(12).is_err());
        assert!(representative_layout(2 * NUM_LANDMARKS).is_err());

        let grid = index_grid(640, 480);
        let mut queue = Queue::new(Device::cpu())?;
        let landmarks = Landmarks::new(&mut queue, 640, 480)?;
        let reps = Representatives::new(&mut queue, landmarks.output(), 256)?;
        landmarks.load(&mut queue, &grid)?;
        landmarks.run(&mut queue);
        reps.run(&mut queue);
        let first = queue.read(reps.output())?;
        reps.run(&mut queue);
        assert_eq!(first, queue.read(reps.output())?);

        // representative (0, 0) is landmark (3, 3) with a step of 8
        let expected = sample_landmarks(&grid)?[3 * LANDMARKS_WIDTH + 3];
        assert_eq!(first[0], expected);
        Ok(())
    }

    #[test]
    fn small_grid_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let mut queue = Queue::new(Device::cpu())?;
        assert!(matches!(
            Landmarks::new(&mut queue, 320, 240),
            Err(IcpError::InvalidConfig(_))
        ));
        let landmarks = Landmarks::new(&mut queue, 512, 384)?;
        assert!(matches!(
            landmarks.load(&mut queue, &index_grid(640, 480)),
            Err(IcpError::GridSizeMismatch { .. })
        ));
        Ok(())
    }
}
