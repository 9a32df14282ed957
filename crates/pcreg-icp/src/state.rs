use glam::{DMat3, DQuat, DVec3};
use pcreg_linalg::transforms;
use serde::{Deserialize, Serialize};

/// A similarity `p ↦ s·R·p + t`, with `R` derived from the unit quaternion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Similarity {
    /// Unit quaternion with `w >= 0`.
    pub quaternion: DQuat,
    /// Rotation matrix of `quaternion`.
    pub rotation: DMat3,
    /// Translation.
    pub translation: DVec3,
    /// Scale, always positive.
    pub scale: f64,
}

impl Default for Similarity {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Similarity {
    /// The identity transform.
    pub const IDENTITY: Self = Self {
        quaternion: DQuat::IDENTITY,
        rotation: DMat3::IDENTITY,
        translation: DVec3::ZERO,
        scale: 1.0,
    };

    /// Builds a similarity, normalizing the quaternion and deriving the matrix from it.
    pub fn new(quaternion: DQuat, translation: DVec3, scale: f64) -> Self {
        let quaternion = transforms::canonical_quaternion(quaternion.normalize());
        Self {
            quaternion,
            rotation: DMat3::from_quat(quaternion),
            translation,
            scale,
        }
    }

    /// Rotation angle in degrees.
    pub fn angle_degrees(&self) -> f64 {
        transforms::rotation_angle_degrees(self.quaternion)
    }

    /// Unit rotation axis, zero for the identity.
    pub fn axis(&self) -> DVec3 {
        transforms::rotation_axis(self.quaternion)
    }

    /// Norm of the translation.
    pub fn translation_norm(&self) -> f64 {
        self.translation.length()
    }

    /// Applies the transform to a point.
    pub fn apply(&self, p: DVec3) -> DVec3 {
        self.scale * (self.rotation * p) + self.translation
    }

    /// The transform applying `self` first and `next` after.
    ///
    /// `q ← q_next·q`, `t ← s_next·R_next·t + t_next`, `s ← s_next·s`.
    pub fn then(&self, next: &Similarity) -> Similarity {
        Similarity::new(
            next.quaternion * self.quaternion,
            next.scale * (next.rotation * self.translation) + next.translation,
            next.scale * self.scale,
        )
    }

    /// Device parameters of the quaternion form, `[qx, qy, qz, qw, tx, ty, tz, s]`.
    pub fn to_params(&self) -> [f32; 8] {
        let (q, t) = (self.quaternion, self.translation);
        [q.x, q.y, q.z, q.w, t.x, t.y, t.z, self.scale].map(|v| v as f32)
    }

    /// Device parameters of the matrix form, a row-major 4×4 matrix.
    pub fn to_matrix_params(&self) -> [f32; 16] {
        let m = transforms::similarity_matrix(self.quaternion, self.translation, self.scale);
        std::array::from_fn(|i| m[i / 4][i % 4] as f32)
    }
}

/// Incremental and cumulative transforms of a registration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformState {
    /// Transform estimated by the last step.
    pub incremental: Similarity,
    /// Transform taking the moving cloud onto the fixed one.
    pub cumulative: Similarity,
}

impl TransformState {
    /// Resets both transforms to the identity.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Records the transform of a step and accumulates it.
    pub fn compose(&mut self, incremental: Similarity) {
        self.incremental = incremental;
        self.cumulative = self.cumulative.then(&incremental);
    }
}
