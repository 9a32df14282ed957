use pcreg_compute::launch::{groups_for, tree_reduce, ELEMENTS_PER_ITEM};
use pcreg_compute::{Buffer, BufferArena, ComputeError, Queue};
use rayon::prelude::*;

use crate::error::IcpError;
use crate::point::Point8;

/// Points handled by one work item.
const POINTS_PER_ITEM: usize = 2;

type Lanes = [f32; 8];

#[inline]
fn add_lanes(a: Lanes, b: Lanes) -> Lanes {
    std::array::from_fn(|i| a[i] + b[i])
}

#[inline]
fn pair_lanes(fixed: &Point8, moving: &Point8, w: f32) -> Lanes {
    let [fx, fy, fz, _] = fixed.geometry;
    let [mx, my, mz, _] = moving.geometry;
    [w * fx, w * fy, w * fz, 0.0, w * mx, w * my, w * mz, 0.0]
}

#[derive(Debug, Clone, Copy)]
enum Mode {
    Uniform,
    Weighted { weights: Buffer<f32>, sum: Buffer<f64> },
}

/// Sums the lanes of one work-group of pairs.
fn sum_group(
    fixed: &[Point8],
    moving: &[Point8],
    weights: Option<&[f32]>,
    work_group_size: usize,
) -> Lanes {
    let mut local = vec![Lanes::default(); work_group_size];
    for (item, acc) in local.iter_mut().enumerate() {
        for k in 0..POINTS_PER_ITEM {
            let i = item * POINTS_PER_ITEM + k;
            if let (Some(f), Some(m)) = (fixed.get(i), moving.get(i)) {
                let w = weights.map_or(1.0, |w| w[i]);
                *acc = add_lanes(*acc, pair_lanes(f, m, w));
            }
        }
    }
    tree_reduce(&mut local, add_lanes);
    local[0]
}

/// Sums partial lanes with a single work-group, `8` partials per item.
fn sum_partials(partials: &[Lanes], work_group_size: usize) -> Lanes {
    let mut local = (0..work_group_size)
        .map(|item| {
            (0..ELEMENTS_PER_ITEM)
                .filter_map(|k| partials.get(item + k * work_group_size).copied())
                .fold(Lanes::default(), add_lanes)
        })
        .collect::<Vec<_>>();
    tree_reduce(&mut local, add_lanes);
    local[0]
}

/// Means of the matched fixed points and of the transformed moving points.
///
/// The output holds `[mfx, mfy, mfz, 0, mmx, mmy, mmz, 0]`. In the weighted
/// variant every pair counts `w_i` and the sums are divided by `Σ w_i`.
#[derive(Debug, Clone)]
pub struct Centroids {
    mode: Mode,
    work_group_size: usize,
    groups: usize,
    fixed: Buffer<Point8>,
    moving: Buffer<Point8>,
    partials: Buffer<Lanes>,
    output: Buffer<f32>,
}

impl Centroids {
    fn configure(
        queue: &mut Queue,
        fixed: Buffer<Point8>,
        moving: Buffer<Point8>,
        mode: Mode,
    ) -> Result<Self, IcpError> {
        let m = fixed.len();
        let wg = queue.work_group_size();
        if moving.len() != m {
            return Err(IcpError::invalid(format!(
                "centroids of {m} fixed and {} moving points",
                moving.len()
            )));
        }
        if m == 0 || m % 2 != 0 || m > POINTS_PER_ITEM * wg * POINTS_PER_ITEM * wg {
            return Err(IcpError::invalid(format!(
                "number of points ({m}) must be even, > 0 and at most {}",
                4 * wg * wg
            )));
        }
        let groups = groups_for(m, POINTS_PER_ITEM * wg);
        Ok(Self {
            mode,
            work_group_size: wg,
            groups,
            fixed,
            moving,
            partials: queue.alloc(groups),
            output: queue.alloc(8),
        })
    }

    /// Configures the unweighted means.
    pub fn new(queue: &mut Queue, fixed: Buffer<Point8>, moving: Buffer<Point8>) -> Result<Self, IcpError> {
        Self::configure(queue, fixed, moving, Mode::Uniform)
    }

    /// Configures the weighted means.
    ///
    /// # Arguments
    ///
    /// * `weights` - One weight per pair.
    /// * `sum` - Single-element buffer holding the sum of the weights.
    pub fn weighted(
        queue: &mut Queue,
        fixed: Buffer<Point8>,
        moving: Buffer<Point8>,
        weights: Buffer<f32>,
        sum: Buffer<f64>,
    ) -> Result<Self, IcpError> {
        if weights.len() != fixed.len() || sum.len() != 1 {
            return Err(IcpError::invalid(format!(
                "{} weights for {} points",
                weights.len(),
                fixed.len()
            )));
        }
        Self::configure(queue, fixed, moving, Mode::Weighted { weights, sum })
    }

    /// Output buffer, 8 values.
    pub fn output(&self) -> Buffer<f32> {
        self.output
    }

    /// Number of work-groups of the first launch.
    pub fn groups(&self) -> usize {
        self.groups
    }

    /// Enqueues both launches.
    pub fn run(&self, queue: &mut Queue) {
        let (mode, wg, m) = (self.mode, self.work_group_size, self.fixed.len());
        let (fixed, moving, partials, output) = (self.fixed, self.moving, self.partials, self.output);
        let per_group = POINTS_PER_ITEM * wg;

        queue.enqueue("centroid_partials", move |arena| {
            arena.with_output(partials, |arena, out| {
                let fixed = arena.get(fixed)?;
                let moving = arena.get(moving)?;
                let weights = match mode {
                    Mode::Uniform => None,
                    Mode::Weighted { weights, .. } => Some(arena.get(weights)?),
                };
                out.fill(Lanes::default());
                out.par_iter_mut()
                    .zip(fixed.par_chunks(per_group))
                    .zip(moving.par_chunks(per_group))
                    .enumerate()
                    .for_each(|(group, ((o, f), mv))| {
                        let w = weights.map(|w| &w[group * per_group..group * per_group + f.len()]);
                        *o = sum_group(f, mv, w, wg);
                    });
                Ok(())
            })
        });
        queue.enqueue("centroid_final", move |arena| {
            let norm = normalizer(arena, mode, m)?;
            arena.with_output(output, |arena, out| {
                let total = sum_partials(arena.get(partials)?, wg);
                for (o, v) in out.iter_mut().zip(total) {
                    *o = v / norm;
                }
                Ok(())
            })
        });
    }
}

fn normalizer(arena: &BufferArena, mode: Mode, m: usize) -> Result<f32, ComputeError> {
    match mode {
        Mode::Uniform => Ok(m as f32),
        Mode::Weighted { sum, .. } => {
            let sum = arena.get(sum)?[0];
            if sum > 0.0 {
                Ok(sum as f32)
            } else {
                log::warn!("sum of weights is {sum}, centroids left unnormalized");
                Ok(1.0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use pcreg_compute::Device;
    use rand::Rng;

    fn random_points(n: usize) -> Vec<Point8> {
        let mut rng = rand::rng();
        (0..n)
            .map(|_| {
                Point8::new(
                    [
                        rng.random_range(-300.0..300.0),
                        rng.random_range(-200.0..200.0),
                        rng.random_range(800.0..1200.0),
                    ],
                    [0.5; 3],
                )
            })
            .collect()
    }

    fn naive(fixed: &[Point8], moving: &[Point8], weights: &[f32]) -> [f64; 8] {
        let mut acc = [0.0f64; 8];
        let mut total = 0.0f64;
        for ((f, m), &w) in fixed.iter().zip(moving).zip(weights) {
            for j in 0..3 {
                acc[j] += w as f64 * f.geometry[j] as f64;
                acc[4 + j] += w as f64 * m.geometry[j] as f64;
            }
            total += w as f64;
        }
        acc.map(|v| v / total)
    }

    #[test]
    fn regular_two_levels() -> Result<(), Box<dyn std::error::Error>> {
        let (fixed_points, moving_points) = (random_points(4096), random_points(4096));
        let mut queue = Queue::new(Device::cpu().with_work_group_size(32)?)?;
        let fixed = queue.alloc(4096);
        let moving = queue.alloc(4096);
        queue.write(fixed, fixed_points.clone())?;
        queue.write(moving, moving_points.clone())?;

        let centroids = Centroids::new(&mut queue, fixed, moving)?;
        assert_eq!(centroids.groups(), 64);
        centroids.run(&mut queue);
        let out = queue.read(centroids.output())?;

        let expected = naive(&fixed_points, &moving_points, &[1.0; 4096]);
        for (o, e) in out.iter().zip(expected) {
            assert_relative_eq!(*o as f64, e, epsilon = 1e-2);
        }
        assert_eq!(out[3], 0.0);
        assert_eq!(out[7], 0.0);
        Ok(())
    }

    #[test]
    fn unit_weights_match_regular() -> Result<(), Box<dyn std::error::Error>> {
        let (fixed_points, moving_points) = (random_points(1000), random_points(1000));
        let mut queue = Queue::new(Device::cpu())?;
        let fixed = queue.alloc(1000);
        let moving = queue.alloc(1000);
        let weights = queue.alloc(1000);
        let sum = queue.alloc(1);
        queue.write(fixed, fixed_points)?;
        queue.write(moving, moving_points)?;
        queue.write(weights, vec![1.0f32; 1000])?;
        queue.write(sum, vec![1000.0f64])?;

        let regular = Centroids::new(&mut queue, fixed, moving)?;
        let weighted = Centroids::weighted(&mut queue, fixed, moving, weights, sum)?;
        regular.run(&mut queue);
        weighted.run(&mut queue);
        assert_eq!(queue.read(regular.output())?, queue.read(weighted.output())?);
        Ok(())
    }

    #[test]
    fn weighted_means() -> Result<(), Box<dyn std::error::Error>> {
        let mut rng = rand::rng();
        let (fixed_points, moving_points) = (random_points(2048), random_points(2048));
        let w = (0..2048).map(|_| rng.random_range(0.1..1.0)).collect::<Vec<f32>>();
        let total = w.iter().map(|&v| v as f64).sum::<f64>();

        let mut queue = Queue::new(Device::cpu().with_work_group_size(64)?)?;
        let fixed = queue.alloc(2048);
        let moving = queue.alloc(2048);
        let weights = queue.alloc(2048);
        let sum = queue.alloc(1);
        queue.write(fixed, fixed_points.clone())?;
        queue.write(moving, moving_points.clone())?;
        queue.write(weights, w.clone())?;
        queue.write(sum, vec![total])?;

        let centroids = Centroids::weighted(&mut queue, fixed, moving, weights, sum)?;
        centroids.run(&mut queue);
        let out = queue.read(centroids.output())?;
        for (o, e) in out.iter().zip(naive(&fixed_points, &moving_points, &w)) {
            assert_relative_eq!(*o as f64, e, epsilon = 1e-2);
        }
        Ok(())
    }

    #[test]
    fn invalid_sizes() -> Result<(), Box<dyn std::error::Error>> {
        let mut queue = Queue::new(Device::cpu().with_work_group_size(8)?)?;
        let a = queue.alloc::<Point8>(256);
        let b = queue.alloc::<Point8>(258);
        let odd = queue.alloc::<Point8>(5);
        assert!(Centroids::new(&mut queue, a, b).is_err());
        assert!(Centroids::new(&mut queue, odd, odd).is_err());
        assert!(Centroids::new(&mut queue, b, b).is_err());
        Centroids::new(&mut queue, a, a)?;
        Ok(())
    }
}
