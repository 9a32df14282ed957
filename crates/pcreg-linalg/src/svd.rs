//! Singular value decomposition of 3×3 matrices in double precision.
//!
//! The decomposition follows the structure of McAdams et al. (2011): the right
//! singular vectors are the eigenvectors of `AᵀA`, found with Jacobi sweeps;
//! the columns of `B = A·V` are sorted by norm and a Givens QR of `B` yields
//! `U` and the singular values.
//!
//! Unlike the branch-free single precision variant, the Jacobi sweeps use exact
//! rotations and run until the off-diagonal mass is negligible relative to the
//! matrix norm. Cross-covariance matrices of scaled point deviations have
//! entries around `1e-3`, where an absolute convergence threshold would stop
//! after the first sweep.
//!
//! # Example
//!
//! ```
//! use glam::{DMat3, DVec3};
//! use pcreg_linalg::svd::svd3;
//!
//! let a = DMat3::from_diagonal(DVec3::new(1.0, 3.0, 2.0));
//! let svd = svd3(&a);
//! assert!((svd.singular_values() - DVec3::new(3.0, 2.0, 1.0)).length() < 1e-12);
//! ```
//!
//! # References
//!
//! * McAdams, Selle, Tamstorf, Teran, and Sifakis (2011).
//!   "Computing the Singular Value Decomposition of 3x3 matrices with minimal
//!   branching and elementary floating point operations."

use glam::{DMat3, DVec3};

const MAX_SWEEPS: usize = 32;
const JACOBI_TOLERANCE: f64 = 1e-30;
/// Relative size, against `‖B‖`, below which a Givens rotation is skipped.
const GIVENS_EPSILON: f64 = 1e-12;

/// Result of [`svd3`]: `A = U·S·Vᵀ`.
#[derive(Debug, Clone, Copy)]
pub struct Svd3 {
    u: DMat3,
    s: DVec3,
    v: DMat3,
}

impl Svd3 {
    /// The left singular vectors, as columns.
    #[inline]
    pub fn u(&self) -> &DMat3 {
        &self.u
    }

    /// The diagonal matrix of singular values.
    #[inline]
    pub fn s(&self) -> DMat3 {
        DMat3::from_diagonal(self.s)
    }

    /// The singular values in descending order.
    #[inline]
    pub fn singular_values(&self) -> DVec3 {
        self.s
    }

    /// The right singular vectors, as columns.
    #[inline]
    pub fn v(&self) -> &DMat3 {
        &self.v
    }
}

type Mat = [[f64; 3]; 3];

/// One Jacobi rotation annihilating `m[p][q]`, accumulated into `v`.
fn jacobi_rotate(m: &mut Mat, v: &mut Mat, p: usize, q: usize) {
    let apq = m[p][q];
    if apq == 0.0 {
        return;
    }
    let theta = (m[q][q] - m[p][p]) / (2.0 * apq);
    let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
    let c = 1.0 / (t * t + 1.0).sqrt();
    let s = t * c;

    for row in m.iter_mut() {
        let (mkp, mkq) = (row[p], row[q]);
        row[p] = c * mkp - s * mkq;
        row[q] = s * mkp + c * mkq;
    }
    for k in 0..3 {
        let (mpk, mqk) = (m[p][k], m[q][k]);
        m[p][k] = c * mpk - s * mqk;
        m[q][k] = s * mpk + c * mqk;
    }
    for row in v.iter_mut() {
        let (vkp, vkq) = (row[p], row[q]);
        row[p] = c * vkp - s * vkq;
        row[q] = s * vkp + c * vkq;
    }
}

/// Eigenvectors of a symmetric matrix, as the columns of the result.
pub fn symmetric_eigenvectors(a: &DMat3) -> DMat3 {
    let mut m: Mat = [[0.0; 3]; 3];
    for (i, row) in m.iter_mut().enumerate() {
        for (j, value) in row.iter_mut().enumerate() {
            *value = a.col(j)[i];
        }
    }
    let mut v: Mat = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

    for _ in 0..MAX_SWEEPS {
        let off = m[0][1] * m[0][1] + m[0][2] * m[0][2] + m[1][2] * m[1][2];
        let diag = m[0][0] * m[0][0] + m[1][1] * m[1][1] + m[2][2] * m[2][2];
        if off <= JACOBI_TOLERANCE * (diag + off) || off == 0.0 {
            break;
        }
        jacobi_rotate(&mut m, &mut v, 0, 1);
        jacobi_rotate(&mut m, &mut v, 0, 2);
        jacobi_rotate(&mut m, &mut v, 1, 2);
    }

    DMat3::from_cols(
        DVec3::new(v[0][0], v[1][0], v[2][0]),
        DVec3::new(v[0][1], v[1][1], v[2][1]),
        DVec3::new(v[0][2], v[1][2], v[2][2]),
    )
}

/// Swaps columns `i` and `j` of `b` and `v`, negating one to keep `det(v)`.
fn swap_columns(b: &mut DMat3, v: &mut DMat3, i: usize, j: usize) {
    let (bi, bj) = (b.col(i), b.col(j));
    *b.col_mut(i) = bj;
    *b.col_mut(j) = -bi;
    let (vi, vj) = (v.col(i), v.col(j));
    *v.col_mut(i) = vj;
    *v.col_mut(j) = -vi;
}

/// Orders the columns of `b` by decreasing norm, permuting `v` alongside.
fn sort_singular_values(b: &mut DMat3, v: &mut DMat3) {
    for (i, j) in [(0, 1), (0, 2), (1, 2)] {
        if b.col(i).length_squared() < b.col(j).length_squared() {
            swap_columns(b, v, i, j);
        }
    }
}

/// Half-angle Givens parameters `(cos θ/2, sin θ/2)` zeroing `a2` against `a1`.
///
/// Returns the identity rotation when `(a1, a2)` is below `epsilon`.
fn qr_givens(a1: f64, a2: f64, epsilon: f64) -> (f64, f64) {
    let rho = (a1 * a1 + a2 * a2).sqrt();
    if rho <= epsilon {
        return (1.0, 0.0);
    }
    let mut ch = a1.abs() + rho;
    let mut sh = a2;
    if a1 < 0.0 {
        std::mem::swap(&mut ch, &mut sh);
    }
    let w = (ch * ch + sh * sh).sqrt().recip();
    (ch * w, sh * w)
}

/// QR decomposition of `b` with three Givens rotations.
fn qr_decomposition(mut b: DMat3) -> (DMat3, DMat3) {
    let norm = b.to_cols_array().iter().map(|v| v * v).sum::<f64>().sqrt();
    let epsilon = GIVENS_EPSILON * norm;
    let mut q = DMat3::IDENTITY;
    for (p, r) in [(0, 1), (0, 2), (1, 2)] {
        let (ch, sh) = qr_givens(b.col(p)[p], b.col(p)[r], epsilon);
        let c = 1.0 - 2.0 * sh * sh;
        let s = 2.0 * ch * sh;

        // rows p and r of B receive Gᵀ
        for j in 0..3 {
            let col = b.col_mut(j);
            let (bp, br) = (col[p], col[r]);
            col[p] = c * bp + s * br;
            col[r] = -s * bp + c * br;
        }
        // Q accumulates G on the right
        let (qp, qr) = (q.col(p), q.col(r));
        *q.col_mut(p) = c * qp + s * qr;
        *q.col_mut(r) = -s * qp + c * qr;
    }
    (q, b)
}

/// Computes the singular value decomposition of a 3×3 matrix.
///
/// # Arguments
///
/// * `a` - The matrix to decompose.
///
/// # Returns
///
/// `U`, the singular values sorted in descending order, and `V`, such that
/// `A = U·diag(s)·Vᵀ` with `U` and `V` orthogonal.
pub fn svd3(a: &DMat3) -> Svd3 {
    let mut v = symmetric_eigenvectors(&(a.transpose() * *a));
    let mut b = *a * v;
    sort_singular_values(&mut b, &mut v);

    let (mut u, r) = qr_decomposition(b);
    let mut s = DVec3::new(r.x_axis.x, r.y_axis.y, r.z_axis.z);
    for i in 0..3 {
        if s[i] < 0.0 {
            s[i] = -s[i];
            *u.col_mut(i) = -u.col(i);
        }
    }

    Svd3 { u, s, v }
}
