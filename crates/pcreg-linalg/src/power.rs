use glam::{Mat4, Quat, Vec4};

/// Default iteration cap of [`power_iteration`].
pub const DEFAULT_MAX_ITERATIONS: usize = 1000;

/// Default distance between successive iterates below which the iteration stops.
pub const DEFAULT_TOLERANCE: f32 = 1e-7;

/// Outcome of [`power_iteration`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DominantEigen {
    /// Unit eigenvector of the dominant eigenvalue.
    pub vector: Vec4,
    /// Rayleigh quotient of `vector`, in the unshifted matrix.
    pub value: f32,
    /// Total number of matrix-vector products.
    pub iterations: usize,
    /// True if the matrix was shifted to make the dominant eigenvalue positive.
    pub shifted: bool,
}

/// Builds Horn's symmetric 4×4 matrix from a row-major cross-covariance.
///
/// `s[3j + k]` is `Σ a[j]·b[k]` where `a` are the centered points to rotate and
/// `b` the centered target points. The quaternion ordering of the matrix is
/// `(x, y, z, w)`, so its dominant eigenvector is directly the rotation taking
/// `a` onto `b` in glam's component order.
pub fn horn_matrix(s: &[f32; 9]) -> Mat4 {
    let [sxx, sxy, sxz, syx, syy, syz, szx, szy, szz] = *s;
    Mat4::from_cols_array_2d(&[
        [sxx - syy - szz, sxy + syx, szx + sxz, syz - szy],
        [sxy + syx, -sxx + syy - szz, syz + szy, szx - sxz],
        [szx + sxz, syz + szy, -sxx - syy + szz, sxy - syx],
        [syz - szy, szx - sxz, sxy - syx, sxx + syy + szz],
    ])
}

fn iterate(n: &Mat4, max_iterations: usize, tolerance: f32) -> (Vec4, usize) {
    let mut x = Vec4::ONE.normalize();
    let mut previous = f32::INFINITY;
    for i in 0..max_iterations {
        let next = (*n * x).normalize_or_zero();
        if next == Vec4::ZERO {
            // x lies in the null space, any unit vector is as good
            return (x, i + 1);
        }
        let distance = next.distance(x);
        x = next;
        if distance < tolerance || distance == previous {
            return (x, i + 1);
        }
        previous = distance;
    }
    (x, max_iterations)
}

/// Finds the eigenvector of the largest eigenvalue of a symmetric 4×4 matrix.
///
/// A zero matrix yields `(0, 0, 0, 1)`, the identity quaternion.
///
/// Plain power iteration converges to the eigenvalue of largest magnitude. If
/// that one is negative, the diagonal is shifted by it, which makes every
/// eigenvalue non-negative while keeping the eigenvectors, and the iteration
/// restarts once.
///
/// # Arguments
///
/// * `n` - Symmetric matrix.
/// * `max_iterations` - Iteration cap of each run.
/// * `tolerance` - Stop when successive unit iterates are closer than this.
pub fn power_iteration(n: &Mat4, max_iterations: usize, tolerance: f32) -> DominantEigen {
    if n.to_cols_array().iter().all(|v| *v == 0.0) {
        return DominantEigen {
            vector: Vec4::W,
            value: 0.0,
            iterations: 0,
            shifted: false,
        };
    }
    let rayleigh = |v: Vec4| v.dot(*n * v);

    let (vector, iterations) = iterate(n, max_iterations, tolerance);
    let value = rayleigh(vector);
    if value >= 0.0 {
        return DominantEigen {
            vector,
            value,
            iterations,
            shifted: false,
        };
    }

    let shifted = *n - Mat4::from_diagonal(Vec4::splat(value));
    let (vector, more) = iterate(&shifted, max_iterations, tolerance);
    DominantEigen {
        vector,
        value: rayleigh(vector),
        iterations: iterations + more,
        shifted: true,
    }
}

/// Rotation quaternion maximizing `Σ b·R a` for the given cross-covariance.
///
/// The sign is chosen so that `w >= 0`.
pub fn horn_quaternion(s: &[f32; 9], max_iterations: usize, tolerance: f32) -> Quat {
    let eigen = power_iteration(&horn_matrix(s), max_iterations, tolerance);
    let v = if eigen.vector.w < 0.0 {
        -eigen.vector
    } else {
        eigen.vector
    };
    Quat::from_vec4(v).normalize()
}
