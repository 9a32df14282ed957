use glam::{DMat3, DQuat, DVec3, Mat3, Quat, Vec3};
use pcreg_compute::{Buffer, Queue};
use pcreg_linalg::{power, svd, transforms};

use crate::covariance::{CovarianceBundle, BUNDLE_LEN};
use crate::error::IcpError;
use crate::state::Similarity;

/// Parameters of the power method.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerMethod {
    /// Iteration cap.
    pub max_iterations: usize,
    /// Distance between successive iterates below which the iteration stops.
    pub tolerance: f32,
}

impl Default for PowerMethod {
    fn default() -> Self {
        Self {
            max_iterations: power::DEFAULT_MAX_ITERATIONS,
            tolerance: power::DEFAULT_TOLERANCE,
        }
    }
}

/// Strategy turning a covariance bundle into an incremental transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Solver {
    /// SVD of the cross-covariance on the host, in double precision.
    ClosedForm,
    /// Power iteration on Horn's matrix, in a single-task kernel.
    PowerIteration(PowerMethod),
}

/// Scale factor `√(Σ‖c·df‖² / Σ‖c·dm‖²)`, or 1 when the ratio is degenerate.
///
/// The ratio is fixed spread over moving spread, so that `s` scales the moving
/// cloud onto the fixed one.
pub fn scale_factor(bundle: &CovarianceBundle) -> f64 {
    let ratio = bundle.spread_ratio();
    if ratio.is_finite() && ratio > 0.0 {
        ratio
    } else {
        log::warn!(
            "degenerate spreads (moving {}, fixed {}), using a unit scale",
            bundle.moving_spread,
            bundle.fixed_spread
        );
        1.0
    }
}

/// Rotation maximizing `Σ df · R dm`, from the SVD of the cross-covariance.
///
/// With `S = U Σ Vᵀ`, `R = V Uᵀ`; a reflection is turned into the closest
/// proper rotation by flipping the axis of the smallest singular value.
pub fn closed_form_rotation(bundle: &CovarianceBundle) -> DMat3 {
    let decomposition = svd::svd3(&bundle.cross_covariance());
    let (u, v) = (decomposition.u(), decomposition.v());
    let r = *v * u.transpose();
    let det = r.determinant();
    if det < 0.0 {
        *v * DMat3::from_diagonal(DVec3::new(1.0, 1.0, det.signum())) * u.transpose()
    } else {
        r
    }
}

fn split_centroids(centroids: &[f32]) -> (DVec3, DVec3) {
    let fixed = DVec3::new(centroids[0] as f64, centroids[1] as f64, centroids[2] as f64);
    let moving = DVec3::new(centroids[4] as f64, centroids[5] as f64, centroids[6] as f64);
    (fixed, moving)
}

/// Closed-form incremental transform from host copies of the bundle and the
/// centroids `[mf, 0, mm, 0]`.
pub fn solve_closed_form(bundle: &CovarianceBundle, centroids: &[f32]) -> Similarity {
    let rotation = closed_form_rotation(bundle);
    let quaternion = transforms::rotation_matrix_to_quaternion(&rotation);
    let scale = scale_factor(bundle);
    let (mean_fixed, mean_moving) = split_centroids(centroids);
    let rotation = DMat3::from_quat(quaternion);
    Similarity::new(quaternion, mean_fixed - scale * (rotation * mean_moving), scale)
}

/// Power method incremental transform in single precision, packed as
/// `[qx, qy, qz, qw, tx, ty, tz, s]`.
pub fn solve_power_iteration(bundle: &CovarianceBundle, centroids: &[f32], method: PowerMethod) -> [f32; 8] {
    let q: Quat = power::horn_quaternion(&bundle.cross, method.max_iterations, method.tolerance);
    let s = scale_factor(bundle) as f32;
    let mean_fixed = Vec3::new(centroids[0], centroids[1], centroids[2]);
    let mean_moving = Vec3::new(centroids[4], centroids[5], centroids[6]);
    let t = mean_fixed - s * (Mat3::from_quat(q) * mean_moving);
    [q.x, q.y, q.z, q.w, t.x, t.y, t.z, s]
}

/// Unpacks `[qx, qy, qz, qw, tx, ty, tz, s]`.
pub fn unpack_params(params: &[f32; 8]) -> Similarity {
    let [qx, qy, qz, qw, tx, ty, tz, s] = params.map(f64::from);
    Similarity::new(
        DQuat::from_xyzw(qx, qy, qz, qw),
        DVec3::new(tx, ty, tz),
        s,
    )
}

/// Extracts the incremental transform from the outputs of the centroid and
/// covariance stages.
#[derive(Debug, Clone)]
pub struct RotationEstimator {
    solver: Solver,
    centroids: Buffer<f32>,
    bundle: Buffer<f32>,
    params: Buffer<f32>,
}

impl RotationEstimator {
    /// Configures the estimator.
    pub fn new(
        queue: &mut Queue,
        solver: Solver,
        centroids: Buffer<f32>,
        bundle: Buffer<f32>,
    ) -> Result<Self, IcpError> {
        if centroids.len() != 8 {
            return Err(IcpError::invalid("centroid buffer must hold 8 values"));
        }
        if bundle.len() != BUNDLE_LEN {
            return Err(IcpError::BundleLength(bundle.len()));
        }
        if let Solver::PowerIteration(method) = solver {
            if method.max_iterations == 0 {
                return Err(IcpError::invalid("power_iterations must be > 0"));
            }
        }
        Ok(Self {
            solver,
            centroids,
            bundle,
            params: queue.alloc(8),
        })
    }

    /// The strategy in use.
    pub fn solver(&self) -> Solver {
        self.solver
    }

    /// Buffer written by the power iteration kernel.
    pub fn params(&self) -> Buffer<f32> {
        self.params
    }

    /// Drains the queue and returns the incremental transform.
    pub fn estimate(&self, queue: &mut Queue) -> Result<Similarity, IcpError> {
        match self.solver {
            Solver::ClosedForm => {
                let centroids = queue.read(self.centroids)?;
                let bundle = CovarianceBundle::from_slice(&queue.read(self.bundle)?)?;
                Ok(solve_closed_form(&bundle, &centroids))
            }
            Solver::PowerIteration(method) => {
                let (centroids, bundle, params) = (self.centroids, self.bundle, self.params);
                queue.enqueue("power_rotation", move |arena| {
                    arena.with_output(params, |arena, out| {
                        let c = arena.get(centroids)?;
                        let b = arena.get(bundle)?;
                        let bundle = CovarianceBundle {
                            cross: std::array::from_fn(|i| b[i]),
                            moving_spread: b[9],
                            fixed_spread: b[10],
                        };
                        out.copy_from_slice(&solve_power_iteration(&bundle, c, method));
                        Ok(())
                    })
                });
                let mut params = [0.0f32; 8];
                queue.read_into(self.params, &mut params)?;
                Ok(unpack_params(&params))
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

    /// Bundle and centroids of `fixed = s·R·moving + t` for random moving points.
    fn similarity_inputs(q: DQuat, t: DVec3, s: f64, c: f64) -> (CovarianceBundle, [f32; 8]) {
        let mut rng = rand::rng();
        let moving = (0..500)
            .map(|_| {
                DVec3::new(
                    rng.random_range(-300.0..300.0),
                    rng.random_range(-200.0..200.0),
                    rng.random_range(800.0..1200.0),
                )
            })
            .collect::<Vec<_>>();
        let fixed = moving.iter().map(|&p| s * (q * p) + t).collect::<Vec<_>>();
        let n = moving.len() as f64;
        let mm = moving.iter().sum::<DVec3>() / n;
        let mf = fixed.iter().sum::<DVec3>() / n;

        let mut values = [0.0f64; BUNDLE_LEN];
        for (f, m) in fixed.iter().zip(&moving) {
            let (df, dm) = (c * (*f - mf), c * (*m - mm));
            for j in 0..3 {
                for k in 0..3 {
                    values[3 * j + k] += dm[j] * df[k];
                }
            }
            values[9] += dm.length_squared();
            values[10] += df.length_squared();
        }
        let bundle = CovarianceBundle {
            cross: std::array::from_fn(|i| values[i] as f32),
            moving_spread: values[9] as f32,
            fixed_spread: values[10] as f32,
        };
        let centroids = [mf.x, mf.y, mf.z, 0.0, mm.x, mm.y, mm.z, 0.0].map(|v| v as f32);
        (bundle, centroids)
    }

    #[test]
    fn closed_form_recovers_similarity() {
        let q = transforms::axis_angle_to_quaternion(DVec3::ONE, 10.0);
        let t = DVec3::new(5.0, -3.0, 12.0);
        let (bundle, centroids) = similarity_inputs(q, t, 1.25, 1e-3);

        let inc = solve_closed_form(&bundle, &centroids);
        assert_relative_eq!(inc.angle_degrees(), 10.0, epsilon = 1e-3);
        assert!(inc.quaternion.abs_diff_eq(q, 1e-5));
        assert_relative_eq!(inc.scale, 1.25, epsilon = 1e-5);
        assert!(inc.translation.abs_diff_eq(t, 0.05));
    }

    #[test]
    fn strategies_agree() -> Result<(), Box<dyn std::error::Error>> {
        let q = transforms::axis_angle_to_quaternion(DVec3::new(0.3, -1.0, 0.2), 25.0);
        let t = DVec3::new(-20.0, 4.0, 1.0);
        let (bundle, centroids) = similarity_inputs(q, t, 1.0, 1e-3);

        let closed = solve_closed_form(&bundle, &centroids);
        let power = unpack_params(&solve_power_iteration(&bundle, &centroids, PowerMethod::default()));
        assert!(closed.quaternion.abs_diff_eq(power.quaternion, 1e-4));
        assert_relative_eq!(closed.scale, power.scale, epsilon = 1e-5);
        assert!(closed.translation.abs_diff_eq(power.translation, 0.1));

        // same result through the queue
        let mut queue = Queue::new(Device::cpu())?;
        let c = queue.alloc(8);
        let b = queue.alloc(BUNDLE_LEN);
        queue.write(c, centroids.to_vec())?;
        let mut values = bundle.cross.to_vec();
        values.extend([bundle.moving_spread, bundle.fixed_spread]);
        queue.write(b, values)?;
        for solver in [Solver::ClosedForm, Solver::PowerIteration(PowerMethod::default())] {
            let estimator = RotationEstimator::new(&mut queue, solver, c, b)?;
            let inc = estimator.estimate(&mut queue)?;
            assert!(inc.quaternion.abs_diff_eq(closed.quaternion, 1e-4));
        }
        Ok(())
    }

    #[test]
    fn recorded_bundle_reference() {
        let bundle = CovarianceBundle {
            cross: [
                0.00168053,
                0.000131408,
                -0.000775179,
                0.000156595,
                0.00102674,
                -0.000563479,
                -0.000722137,
                -0.000559463,
                0.00246661,
            ],
            moving_spread: 0.00515996,
            fixed_spread: 0.00515893,
        };
        let centroids = [1.0, 2.0, 3.0, 0.0, 1.0, 2.0, 3.0, 0.0];
        let params = solve_power_iteration(&bundle, &centroids, PowerMethod::default());
        assert_relative_eq!(params[0], 0.00111412, epsilon = 1e-5);
        assert_relative_eq!(params[1], 0.00730956, epsilon = 1e-5);
        assert_relative_eq!(params[2], -0.00647493, epsilon = 1e-5);
        assert_relative_eq!(params[3], 0.999952, epsilon = 1e-5);

        let closed = solve_closed_form(&bundle, &centroids);
        let power = unpack_params(&params);
        assert!(closed.quaternion.abs_diff_eq(power.quaternion, 1e-4));
        // t = mf − s·R·mm
        let expected = DVec3::new(1.0, 2.0, 3.0) - power.scale * (power.rotation * DVec3::new(1.0, 2.0, 3.0));
        assert!(power.translation.abs_diff_eq(expected, 1e-4));
    }

    #[test]
    fn degenerate_scale_falls_back_to_one() {
        let zero = CovarianceBundle::default();
        assert_eq!(scale_factor(&zero), 1.0);
        let inc = solve_closed_form(&zero, &[0.0; 8]);
        assert_eq!(inc.scale, 1.0);
        assert_relative_eq!(inc.quaternion.length(), 1.0, epsilon = 1e-12);

        let power = unpack_params(&solve_power_iteration(&zero, &[0.0; 8], PowerMethod::default()));
        assert_eq!(power.scale, 1.0);
        assert_relative_eq!(power.quaternion.length(), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn reflection_is_corrected() {
        // planar points mirrored through z give a reflection as the best orthogonal map
        let bundle = CovarianceBundle {
            cross: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, -1e-3],
            moving_spread: 2.0,
            fixed_spread: 2.0,
        };
        let r = closed_form_rotation(&bundle);
        assert_relative_eq!(r.determinant(), 1.0, epsilon = 1e-9);
        assert!(r.abs_diff_eq(DMat3::IDENTITY, 1e-9));
    }
}
