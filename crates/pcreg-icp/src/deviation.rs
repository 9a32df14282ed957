use pcreg_compute::{Buffer, Queue};
use rayon::prelude::*;

use crate::error::IcpError;
use crate::point::Point8;

/// Centered positions: `dev_fixed_i = fixed_i − mean_fixed` and
/// `dev_moving_i = moving_i − mean_moving`, with a zero fourth lane.
#[derive(Debug, Clone)]
pub struct Deviations {
    fixed: Buffer<Point8>,
    moving: Buffer<Point8>,
    centroids: Buffer<f32>,
    fixed_output: Buffer<[f32; 4]>,
    moving_output: Buffer<[f32; 4]>,
}

impl Deviations {
    /// Configures the centering of both point sets by the output of a
    /// [`crate::Centroids`] stage.
    pub fn new(
        queue: &mut Queue,
        fixed: Buffer<Point8>,
        moving: Buffer<Point8>,
        centroids: Buffer<f32>,
    ) -> Result<Self, IcpError> {
        if fixed.len() != moving.len() || fixed.is_empty() {
            return Err(IcpError::invalid(format!(
                "deviations of {} fixed and {} moving points",
                fixed.len(),
                moving.len()
            )));
        }
        if centroids.len() != 8 {
            return Err(IcpError::invalid("centroid buffer must hold 8 values"));
        }
        Ok(Self {
            fixed,
            moving,
            centroids,
            fixed_output: queue.alloc(fixed.len()),
            moving_output: queue.alloc(moving.len()),
        })
    }

    /// Deviations of the fixed points.
    pub fn fixed(&self) -> Buffer<[f32; 4]> {
        self.fixed_output
    }

    /// Deviations of the moving points.
    pub fn moving(&self) -> Buffer<[f32; 4]> {
        self.moving_output
    }

    /// Enqueues the kernel.
    pub fn run(&self, queue: &mut Queue) {
        let (fixed, moving, centroids) = (self.fixed, self.moving, self.centroids);
        let (fixed_output, moving_output) = (self.fixed_output, self.moving_output);
        queue.enqueue("deviations", move |arena| {
            arena.with_outputs(fixed_output, moving_output, |arena, df, dm| {
                let fixed = arena.get(fixed)?;
                let moving = arena.get(moving)?;
                let c = arena.get(centroids)?;
                let center = |p: &Point8, mean: &[f32]| {
                    [p.geometry[0] - mean[0], p.geometry[1] - mean[1], p.geometry[2] - mean[2], 0.0]
                };
                df.par_iter_mut()
                    .zip(dm.par_iter_mut())
                    .zip(fixed.par_iter().zip(moving.par_iter()))
                    .for_each(|((df, dm), (f, m))| {
                        *df = center(f, &c[0..4]);
                        *dm = center(m, &c[4..8]);
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

    #[test]
    fn subtracts_means() -> Result<(), Box<dyn std::error::Error>> {
        let mut queue = Queue::new(Device::cpu())?;
        let fixed = queue.alloc(2);
        let moving = queue.alloc(2);
        let centroids = queue.alloc(8);
        queue.write(
            fixed,
            vec![
                Point8::new([1.0, 2.0, 3.0], [0.1; 3]),
                Point8::new([3.0, 2.0, 1.0], [0.2; 3]),
            ],
        )?;
        queue.write(
            moving,
            vec![
                Point8::new([10.0, 0.0, 0.0], [0.1; 3]),
                Point8::new([0.0, 10.0, 0.0], [0.2; 3]),
            ],
        )?;
        queue.write(centroids, vec![2.0, 2.0, 2.0, 0.0, 5.0, 5.0, 0.0, 0.0])?;

        let stage = Deviations::new(&mut queue, fixed, moving, centroids)?;
        stage.run(&mut queue);
        assert_eq!(
            queue.read(stage.fixed())?,
            vec![[-1.0, 0.0, 1.0, 0.0], [1.0, 0.0, -1.0, 0.0]]
        );
        assert_eq!(
            queue.read(stage.moving())?,
            vec![[5.0, -5.0, 0.0, 0.0], [-5.0, 5.0, 0.0, 0.0]]
        );
        Ok(())
    }

    #[test]
    fn mismatched_inputs() -> Result<(), Box<dyn std::error::Error>> {
        let mut queue = Queue::new(Device::cpu())?;
        let a = queue.alloc::<Point8>(4);
        let b = queue.alloc::<Point8>(6);
        let c = queue.alloc::<f32>(8);
        assert!(Deviations::new(&mut queue, a, b, c).is_err());
        let short = queue.alloc::<f32>(4);
        assert!(Deviations::new(&mut queue, a, a, short).is_err());
        Ok(())
    }
}
