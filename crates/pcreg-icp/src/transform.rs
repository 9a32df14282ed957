use pcreg_compute::launch::launch_items;
use pcreg_compute::{Buffer, Queue};

use crate::error::IcpError;
use crate::point::Point8;
use crate::state::Similarity;

/// Layout of the device transform parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformForm {
    /// `[qx, qy, qz, qw, tx, ty, tz, s]`.
    Quaternion,
    /// Row-major 4×4 matrix.
    Matrix,
}

impl TransformForm {
    /// Number of parameters of the form.
    pub fn param_count(&self) -> usize {
        match self {
            TransformForm::Quaternion => 8,
            TransformForm::Matrix => 16,
        }
    }

    /// Parameters of a similarity in this form.
    pub fn params(&self, similarity: &Similarity) -> Vec<f32> {
        match self {
            TransformForm::Quaternion => similarity.to_params().to_vec(),
            TransformForm::Matrix => similarity.to_matrix_params().to_vec(),
        }
    }
}

/// Applies `p' = s·(p + 2q×(q×p + w·p)) + t` to the position of a point.
#[inline]
pub fn transform_quaternion(p: &Point8, params: &[f32]) -> Point8 {
    let [x, y, z, w] = [params[0], params[1], params[2], params[3]];
    let [px, py, pz, _] = p.geometry;
    // u = q × p + w·p
    let ux = y * pz - z * py + w * px;
    let uy = z * px - x * pz + w * py;
    let uz = x * py - y * px + w * pz;
    // p + 2 q × u
    let rx = px + 2.0 * (y * uz - z * uy);
    let ry = py + 2.0 * (z * ux - x * uz);
    let rz = pz + 2.0 * (x * uy - y * ux);
    let s = params[7];
    let mut out = *p;
    out.geometry[0] = s * rx + params[4];
    out.geometry[1] = s * ry + params[5];
    out.geometry[2] = s * rz + params[6];
    out
}

/// Applies the row-major homogeneous matrix `m` to the position of a point.
#[inline]
pub fn transform_matrix(p: &Point8, m: &[f32]) -> Point8 {
    let [px, py, pz, _] = p.geometry;
    let mut out = *p;
    for (row, o) in out.geometry.iter_mut().take(3).enumerate() {
        let r = &m[4 * row..4 * row + 4];
        *o = r[0] * px + r[1] * py + r[2] * pz + r[3];
    }
    out
}

/// Applies a similarity stored in a device buffer to a point set.
///
/// Colors and the homogeneous lane are copied unchanged.
#[derive(Debug, Clone)]
pub struct Transform {
    form: TransformForm,
    input: Buffer<Point8>,
    params: Buffer<f32>,
    output: Buffer<Point8>,
}

impl Transform {
    /// Configures the transform with its own parameter buffer, set to the identity.
    pub fn new(queue: &mut Queue, form: TransformForm, input: Buffer<Point8>) -> Result<Self, IcpError> {
        let params = queue.alloc(form.param_count());
        queue.write(params, form.params(&Similarity::IDENTITY))?;
        Self::with_params(queue, form, input, params)
    }

    /// Configures the transform reading parameters owned by another stage.
    pub fn with_params(
        queue: &mut Queue,
        form: TransformForm,
        input: Buffer<Point8>,
        params: Buffer<f32>,
    ) -> Result<Self, IcpError> {
        if params.len() != form.param_count() {
            return Err(IcpError::invalid(format!(
                "{form:?} transform needs {} parameters, got {}",
                form.param_count(),
                params.len()
            )));
        }
        Ok(Self {
            form,
            input,
            params,
            output: queue.alloc(input.len()),
        })
    }

    /// The parameter layout.
    pub fn form(&self) -> TransformForm {
        self.form
    }

    /// Points to transform.
    pub fn input(&self) -> Buffer<Point8> {
        self.input
    }

    /// Parameter buffer.
    pub fn params(&self) -> Buffer<f32> {
        self.params
    }

    /// Transformed points.
    pub fn output(&self) -> Buffer<Point8> {
        self.output
    }

    /// Writes new parameters, blocking until the copy completes.
    pub fn set(&self, queue: &mut Queue, similarity: &Similarity) -> Result<(), IcpError> {
        queue.write_blocking(self.params, &self.form.params(similarity))?;
        Ok(())
    }

    /// Enqueues the kernel.
    pub fn run(&self, queue: &mut Queue) {
        let (form, input, params, output) = (self.form, self.input, self.params, self.output);
        queue.enqueue("transform", move |arena| {
            arena.with_output(output, |arena, out| {
                let points = arena.get(input)?;
                let params = arena.get(params)?;
                match form {
                    TransformForm::Quaternion => {
                        launch_items(out, |i, o| *o = transform_quaternion(&points[i], params))
                    }
                    TransformForm::Matrix => {
                        launch_items(out, |i, o| *o = transform_matrix(&points[i], params))
                    }
                }
                Ok(())
            })
        });
    }
}
