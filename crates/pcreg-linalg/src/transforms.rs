use glam::{DMat3, DQuat, DVec3};

/// Returns the representative of `q` with a non-negative scalar part.
#[inline]
pub fn canonical_quaternion(q: DQuat) -> DQuat {
    if q.w < 0.0 {
        -q
    } else {
        q
    }
}

/// Rotation angle of a unit quaternion, in degrees, within `[0, 180]`.
///
/// Computed as `2·atan2(‖q.xyz‖, |q.w|)`, which stays accurate for the tiny
/// angles the convergence test compares against.
pub fn rotation_angle_degrees(q: DQuat) -> f64 {
    (2.0 * q.xyz().length().atan2(q.w.abs())).to_degrees()
}

/// Unit rotation axis of a quaternion, or zero for the identity.
pub fn rotation_axis(q: DQuat) -> DVec3 {
    canonical_quaternion(q).xyz().normalize_or_zero()
}

/// Builds a quaternion from an axis and an angle in degrees.
///
/// # Arguments
///
/// * `axis` - Rotation axis, normalized internally.
/// * `degrees` - Rotation angle.
pub fn axis_angle_to_quaternion(axis: DVec3, degrees: f64) -> DQuat {
    let axis = axis.normalize_or_zero();
    if axis == DVec3::ZERO {
        return DQuat::IDENTITY;
    }
    DQuat::from_axis_angle(axis, degrees.to_radians())
}

/// Converts a proper rotation matrix to a unit quaternion with `w >= 0`.
pub fn rotation_matrix_to_quaternion(r: &DMat3) -> DQuat {
    canonical_quaternion(DQuat::from_mat3(r).normalize())
}

/// Row-major 4×4 matrix of the similarity `p ↦ s·R·p + t`.
pub fn similarity_matrix(q: DQuat, t: DVec3, s: f64) -> [[f64; 4]; 4] {
    let r = DMat3::from_quat(q) * s;
    let mut m = [[0.0; 4]; 4];
    for (i, row) in m.iter_mut().take(3).enumerate() {
        row[0] = r.x_axis[i];
        row[1] = r.y_axis[i];
        row[2] = r.z_axis[i];
        row[3] = t[i];
    }
    m[3][3] = 1.0;
    m
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn angle_and_axis() {
        let axis = DVec3::ONE.normalize();
        let q = axis_angle_to_quaternion(DVec3::ONE, 10.0);
        assert_relative_eq!(rotation_angle_degrees(q), 10.0, epsilon = 1e-12);
        assert_relative_eq!(rotation_angle_degrees(-q), 10.0, epsilon = 1e-12);
        assert!(rotation_axis(-q).abs_diff_eq(axis, 1e-12));

        assert_eq!(rotation_angle_degrees(DQuat::IDENTITY), 0.0);
        assert_eq!(rotation_axis(DQuat::IDENTITY), DVec3::ZERO);
        assert_eq!(axis_angle_to_quaternion(DVec3::ZERO, 30.0), DQuat::IDENTITY);
    }

    #[test]
    fn matrix_quaternion_roundtrip() {
        let q = axis_angle_to_quaternion(DVec3::new(0.2, -1.0, 0.5), 135.0);
        let back = rotation_matrix_to_quaternion(&DMat3::from_quat(q));
        assert!(back.w >= 0.0);
        assert!(back.abs_diff_eq(canonical_quaternion(q), 1e-12));
    }

    #[test]
    fn similarity_matrix_applies_scale_then_translation() {
        let q = axis_angle_to_quaternion(DVec3::Z, 90.0);
        let m = similarity_matrix(q, DVec3::new(1.0, 2.0, 3.0), 2.0);
        let p = [1.0, 0.0, 0.0, 1.0];
        let out: Vec<f64> = m
            .iter()
            .map(|row| row.iter().zip(p).map(|(a, b)| a * b).sum())
            .collect();
        assert_relative_eq!(out[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(out[1], 4.0, epsilon = 1e-12);
        assert_relative_eq!(out[2], 3.0, epsilon = 1e-12);
        assert_relative_eq!(out[3], 1.0, epsilon = 1e-12);
    }
}
