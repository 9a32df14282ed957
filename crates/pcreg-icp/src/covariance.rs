use glam::DMat3;
use pcreg_compute::reduce::{Reduce, ReduceOp};
use pcreg_compute::{Buffer, Queue};
use rayon::prelude::*;

use crate::config::check_covariance_scale;
use crate::error::IcpError;

/// Number of scalars in a covariance bundle.
pub const BUNDLE_LEN: usize = 11;

/// Default factor applied to the deviations before they are multiplied.
pub const DEFAULT_COVARIANCE_SCALE: f32 = 1e-6;

/// Host copy of the sums produced by [`CrossCovariance`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CovarianceBundle {
    /// Row-major `S[3j + k] = Σ c·dm[j] · c·df[k]`.
    pub cross: [f32; 9],
    /// `Σ ‖c·dm‖²`.
    pub moving_spread: f32,
    /// `Σ ‖c·df‖²`.
    pub fixed_spread: f32,
}

impl CovarianceBundle {
    /// Reads the 11 scalars of a bundle.
    pub fn from_slice(values: &[f32]) -> Result<Self, IcpError> {
        if values.len() != BUNDLE_LEN {
            return Err(IcpError::BundleLength(values.len()));
        }
        let mut cross = [0.0; 9];
        cross.copy_from_slice(&values[..9]);
        Ok(Self {
            cross,
            moving_spread: values[9],
            fixed_spread: values[10],
        })
    }

    /// Cross-covariance as a matrix, moving index as the row.
    pub fn cross_covariance(&self) -> DMat3 {
        // from_cols_array reads column-major, the bundle is row-major
        DMat3::from_cols_array(&self.cross.map(f64::from)).transpose()
    }

    /// `√(Σ‖c·df‖² / Σ‖c·dm‖²)`, the ratio of the spreads of both point sets.
    pub fn spread_ratio(&self) -> f64 {
        (self.fixed_spread as f64 / self.moving_spread as f64).sqrt()
    }
}

/// Accumulates the cross-covariance of the deviations.
///
/// A products kernel writes term `r` of pair `i` at `r · m + i`, then a row
/// sum reduction of the `11 × m` array produces the bundle.
#[derive(Debug, Clone)]
pub struct CrossCovariance {
    c: f32,
    fixed: Buffer<[f32; 4]>,
    moving: Buffer<[f32; 4]>,
    weights: Option<Buffer<f32>>,
    reduce: Reduce<f32>,
}

impl CrossCovariance {
    /// Configures the unweighted accumulation.
    pub fn new(
        queue: &mut Queue,
        fixed: Buffer<[f32; 4]>,
        moving: Buffer<[f32; 4]>,
        c: f32,
    ) -> Result<Self, IcpError> {
        Self::configure(queue, fixed, moving, None, c)
    }

    /// Configures the accumulation with one weight per pair.
    pub fn weighted(
        queue: &mut Queue,
        fixed: Buffer<[f32; 4]>,
        moving: Buffer<[f32; 4]>,
        weights: Buffer<f32>,
        c: f32,
    ) -> Result<Self, IcpError> {
        if weights.len() != fixed.len() {
            return Err(IcpError::invalid(format!(
                "{} weights for {} deviations",
                weights.len(),
                fixed.len()
            )));
        }
        Self::configure(queue, fixed, moving, Some(weights), c)
    }

    fn configure(
        queue: &mut Queue,
        fixed: Buffer<[f32; 4]>,
        moving: Buffer<[f32; 4]>,
        weights: Option<Buffer<f32>>,
        c: f32,
    ) -> Result<Self, IcpError> {
        check_covariance_scale(c)?;
        let m = fixed.len();
        if moving.len() != m {
            return Err(IcpError::invalid(format!(
                "covariance of {m} fixed and {} moving deviations",
                moving.len()
            )));
        }
        let products = queue.alloc::<f32>(BUNDLE_LEN * m);
        let reduce = Reduce::with_input(queue, ReduceOp::Sum, products, m, BUNDLE_LEN)?;
        Ok(Self {
            c,
            fixed,
            moving,
            weights,
            reduce,
        })
    }

    /// The factor applied to the deviations.
    pub fn scale(&self) -> f32 {
        self.c
    }

    /// Changes the factor applied to the deviations. Takes effect at the next run.
    pub fn set_scale(&mut self, c: f32) -> Result<(), IcpError> {
        check_covariance_scale(c)?;
        self.c = c;
        Ok(())
    }

    /// The `11 × m` products array.
    pub fn products(&self) -> Buffer<f32> {
        self.reduce.input()
    }

    /// The bundle, 11 values.
    pub fn output(&self) -> Buffer<f32> {
        self.reduce.output()
    }

    /// Enqueues the products kernel and the reduction.
    pub fn run(&self, queue: &mut Queue) {
        let (c, fixed, moving, weights) = (self.c, self.fixed, self.moving, self.weights);
        let (products, m) = (self.products(), self.fixed.len());

        queue.enqueue("covariance_products", move |arena| {
            arena.with_output(products, |arena, out| {
                let df = arena.get(fixed)?;
                let dm = arena.get(moving)?;
                let w = weights.map(|w| arena.get(w)).transpose()?;
                out.par_chunks_mut(m).enumerate().for_each(|(term, row)| {
                    for (i, o) in row.iter_mut().enumerate() {
                        let (a, b) = (dm[i], df[i]);
                        let value = match term {
                            0..=8 => (c * a[term / 3]) * (c * b[term % 3]),
                            9 => (0..3).map(|j| (c * a[j]) * (c * a[j])).sum(),
                            _ => (0..3).map(|k| (c * b[k]) * (c * b[k])).sum(),
                        };
                        *o = w.map_or(value, |w| w[i] * value);
                    }
                });
                Ok(())
            })
        });
        self.reduce.run(queue);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use pcreg_compute::Device;
    use rand::Rng;

    fn random_deviations(n: usize) -> Vec<[f32; 4]> {
        let mut rng = rand::rng();
        (0..n)
            .map(|_| {
                [
                    rng.random_range(-300.0..300.0),
                    rng.random_range(-300.0..300.0),
                    rng.random_range(-100.0..100.0),
                    0.0,
                ]
            })
            .collect()
    }

    fn naive(df: &[[f32; 4]], dm: &[[f32; 4]], c: f64) -> [f64; 11] {
        let mut s = [0.0f64; 11];
        for (f, m) in df.iter().zip(dm) {
            for j in 0..3 {
                for k in 0..3 {
                    s[3 * j + k] += c * m[j] as f64 * c * f[k] as f64;
                }
                s[9] += (c * m[j] as f64).powi(2);
                s[10] += (c * f[j] as f64).powi(2);
            }
        }
        s
    }

    #[test]
    fn matches_naive_sums() -> Result<(), Box<dyn std::error::Error>> {
        let (df, dm) = (random_deviations(16384), random_deviations(16384));
        let mut queue = Queue::new(Device::cpu())?;
        let fixed = queue.alloc(df.len());
        let moving = queue.alloc(dm.len());
        queue.write(fixed, df.clone())?;
        queue.write(moving, dm.clone())?;

        let stage = CrossCovariance::new(&mut queue, fixed, moving, 1e-3)?;
        stage.run(&mut queue);
        let bundle = CovarianceBundle::from_slice(&queue.read(stage.output())?)?;

        let expected = naive(&df, &dm, 1e-3);
        // cross terms partially cancel, compare against the spread
        let tolerance = expected[9].max(expected[10]) * 1e-5;
        for (s, e) in bundle.cross.iter().zip(&expected[..9]) {
            assert_relative_eq!(*s as f64, *e, epsilon = tolerance);
        }
        assert_relative_eq!(bundle.moving_spread as f64, expected[9], max_relative = 1e-4);
        assert_relative_eq!(bundle.fixed_spread as f64, expected[10], max_relative = 1e-4);
        Ok(())
    }

    #[test]
    fn unit_weights_match_regular() -> Result<(), Box<dyn std::error::Error>> {
        let (df, dm) = (random_deviations(1024), random_deviations(1024));
        let mut queue = Queue::new(Device::cpu())?;
        let fixed = queue.alloc(df.len());
        let moving = queue.alloc(dm.len());
        let weights = queue.alloc(df.len());
        queue.write(fixed, df)?;
        queue.write(moving, dm)?;
        queue.write(weights, vec![1.0f32; 1024])?;

        let regular = CrossCovariance::new(&mut queue, fixed, moving, 1e-6)?;
        let weighted = CrossCovariance::weighted(&mut queue, fixed, moving, weights, 1e-6)?;
        regular.run(&mut queue);
        weighted.run(&mut queue);
        assert_eq!(queue.read(regular.output())?, queue.read(weighted.output())?);
        Ok(())
    }

    #[test]
    fn scale_is_mutable() -> Result<(), Box<dyn std::error::Error>> {
        let mut queue = Queue::new(Device::cpu())?;
        let fixed = queue.alloc(4);
        let moving = queue.alloc(4);
        queue.write(fixed, vec![[1.0, 0.0, 0.0, 0.0]; 4])?;
        queue.write(moving, vec![[0.0, 2.0, 0.0, 0.0]; 4])?;

        let mut stage = CrossCovariance::new(&mut queue, fixed, moving, 1.0)?;
        assert!(stage.set_scale(0.0).is_err());
        assert!(stage.set_scale(f32::INFINITY).is_err());
        stage.set_scale(0.5)?;
        stage.run(&mut queue);
        let bundle = CovarianceBundle::from_slice(&queue.read(stage.output())?)?;
        // S[1·3 + 0] = Σ 0.5·2 · 0.5·1
        assert_eq!(bundle.cross[3], 2.0);
        assert_eq!(bundle.moving_spread, 4.0);
        assert_eq!(bundle.fixed_spread, 1.0);
        assert_relative_eq!(bundle.spread_ratio(), 0.5);
        assert_eq!(bundle.cross_covariance().row(1).x, 2.0);
        Ok(())
    }

    #[test]
    fn bundle_length() {
        assert!(matches!(
            CovarianceBundle::from_slice(&[0.0; 9]),
            Err(IcpError::BundleLength(9))
        ));
    }
}
