use std::fmt;

use glam::{DMat3, DQuat, DVec3};
use pcreg_compute::{Device, Queue};
use serde::Serialize;

use crate::config::{check_threshold, IcpConfig};
use crate::error::IcpError;
use crate::point::{DisplayBuffers, Point8, PointGrid};
use crate::sampling::{Landmarks, Representatives};
use crate::state::{Similarity, TransformState};
use crate::step::RegistrationStep;
use crate::transform::Transform;

/// Result of a registration.
///
/// The transformation is from the moving to the fixed frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistrationResult {
    /// The total number of iterations performed.
    pub num_iterations: usize,
    /// True if the last step fell below both thresholds.
    pub converged: bool,
    /// Estimated rotation matrix.
    pub rotation: DMat3,
    /// Estimated rotation as a unit quaternion with `w >= 0`.
    pub quaternion: DQuat,
    /// Unit rotation axis, zero for the identity.
    pub axis: DVec3,
    /// Rotation angle in degrees.
    pub angle_degrees: f64,
    /// Estimated translation vector.
    pub translation: DVec3,
    /// Estimated scale.
    pub scale: f64,
    /// Rotation angle of the last step, in degrees.
    pub last_angle_degrees: f64,
    /// Translation norm of the last step.
    pub last_translation_norm: f64,
}

impl RegistrationResult {
    fn new(state: &TransformState, num_iterations: usize, converged: bool) -> Self {
        let total = &state.cumulative;
        Self {
            num_iterations,
            converged,
            rotation: total.rotation,
            quaternion: total.quaternion,
            axis: total.axis(),
            angle_degrees: total.angle_degrees(),
            translation: total.translation,
            scale: total.scale,
            last_angle_degrees: state.incremental.angle_degrees(),
            last_translation_norm: state.incremental.translation_norm(),
        }
    }
}

impl fmt::Display for RegistrationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.converged { "converged" } else { "stopped" };
        writeln!(f, "{status} after {} iterations", self.num_iterations)?;
        writeln!(
            f,
            "last step: {:.6} deg, |t| = {:.6}",
            self.last_angle_degrees, self.last_translation_norm
        )?;
        writeln!(
            f,
            "rotation: {:.6} deg about ({:.6}, {:.6}, {:.6})",
            self.angle_degrees, self.axis.x, self.axis.y, self.axis.z
        )?;
        let q = self.quaternion;
        writeln!(f, "quaternion: ({:.6}, {:.6}, {:.6}, {:.6})", q.x, q.y, q.z, q.w)?;
        for row in 0..3 {
            let r = self.rotation.row(row);
            writeln!(f, "  [{:>10.6} {:>10.6} {:>10.6}]", r.x, r.y, r.z)?;
        }
        let t = self.translation;
        writeln!(f, "translation: ({:.6}, {:.6}, {:.6})", t.x, t.y, t.z)?;
        write!(f, "scale: {:.6}", self.scale)
    }
}

/// A registration session between two point grids of a fixed size.
///
/// The session owns the queue and every stage. The fixed cloud is indexed
/// once per [`Registration::run`]; every iteration transforms the moving
/// landmarks by the cumulative transform and refines it.
#[derive(Debug)]
pub struct Registration {
    config: IcpConfig,
    queue: Queue,
    fixed: Landmarks,
    moving: Landmarks,
    representatives: Representatives,
    step: RegistrationStep,
    grid: Transform,
    state: TransformState,
    num_iterations: usize,
    rebuild: bool,
}

impl Registration {
    /// Creates a session for `width x height` grids.
    ///
    /// # Arguments
    ///
    /// * `config` - Registration parameters, validated here.
    /// * `device` - Compute device. Its work-group size bounds the stage sizes.
    /// * `width` - Number of columns of the grids, at least 512.
    /// * `height` - Number of rows of the grids, at least 384.
    pub fn new(config: IcpConfig, device: Device, width: usize, height: usize) -> Result<Self, IcpError> {
        config.validate()?;
        log::debug!("registration session on {device}: {width}x{height} grids");
        let mut queue = Queue::new(device)?;
        let fixed = Landmarks::new(&mut queue, width, height)?;
        let moving = Landmarks::new(&mut queue, width, height)?;
        let representatives = Representatives::new(&mut queue, fixed.output(), config.num_representatives)?;
        let step = RegistrationStep::new(
            &mut queue,
            &config,
            fixed.output(),
            representatives.output(),
            moving.output(),
        )?;
        let grid = Transform::with_params(
            &mut queue,
            step.transform().form(),
            moving.grid(),
            step.transform().params(),
        )?;
        Ok(Self {
            config,
            queue,
            fixed,
            moving,
            representatives,
            step,
            grid,
            state: TransformState::default(),
            num_iterations: 0,
            rebuild: true,
        })
    }

    /// The parameters in use, including the changes made by the setters.
    pub fn config(&self) -> &IcpConfig {
        &self.config
    }

    /// Incremental and cumulative transforms.
    pub fn state(&self) -> &TransformState {
        &self.state
    }

    /// Number of steps since the index was last built.
    pub fn num_iterations(&self) -> usize {
        self.num_iterations
    }

    /// The step pipeline.
    pub fn step_pipeline(&self) -> &RegistrationStep {
        &self.step
    }

    /// Uploads the fixed cloud and samples its landmarks and representatives.
    /// The index is rebuilt at the next step.
    pub fn load_fixed(&mut self, grid: &PointGrid) -> Result<(), IcpError> {
        self.fixed.load(&mut self.queue, grid)?;
        self.sample_fixed();
        self.rebuild = true;
        Ok(())
    }

    fn sample_fixed(&mut self) {
        self.fixed.run(&mut self.queue);
        self.representatives.run(&mut self.queue);
    }

    /// Uploads the moving cloud, samples its landmarks and resets the transform.
    pub fn load_moving(&mut self, grid: &PointGrid) -> Result<(), IcpError> {
        self.moving.load(&mut self.queue, grid)?;
        self.moving.run(&mut self.queue);
        self.reset_transform()
    }

    /// Samples the fixed landmarks and the representatives and resets the
    /// iteration counter. The index itself is built by the next step.
    pub fn build_index(&mut self) -> Result<(), IcpError> {
        self.sample_fixed();
        self.num_iterations = 0;
        self.rebuild = true;
        Ok(())
    }

    /// Runs one step and returns its incremental transform.
    ///
    /// The index is rebuilt first if `rebuild` is set or if the fixed cloud or
    /// the index parameters changed since the last build.
    pub fn step(&mut self, rebuild: bool) -> Result<Similarity, IcpError> {
        let rebuild = rebuild || std::mem::take(&mut self.rebuild);
        self.step.run(&mut self.queue, &mut self.state, rebuild)
    }

    fn converged(&self) -> bool {
        let incremental = &self.state.incremental;
        incremental.angle_degrees() < self.config.angle_threshold
            && incremental.translation_norm() < self.config.translation_threshold
    }

    /// Registers the moving cloud onto the fixed one.
    ///
    /// Stops after `max_iterations` steps, or as soon as a step rotates by
    /// less than `angle_threshold` and translates by less than
    /// `translation_threshold`. The cumulative transform carries over from
    /// previous runs until [`Registration::reset_transform`] or
    /// [`Registration::load_moving`].
    pub fn run(&mut self) -> Result<RegistrationResult, IcpError> {
        self.build_index()?;
        self.step(true)?;
        let converged = loop {
            self.num_iterations += 1;
            if self.num_iterations == self.config.max_iterations {
                break self.converged();
            }
            if self.converged() {
                break true;
            }
            self.step(false)?;
        };
        self.queue.finish()?;

        let result = RegistrationResult::new(&self.state, self.num_iterations, converged);
        log::debug!(
            "registration {} after {} iterations: {:.6} deg, |t| = {:.6}",
            if converged { "converged" } else { "stopped" },
            result.num_iterations,
            result.angle_degrees,
            result.translation.length()
        );
        Ok(result)
    }

    /// Resets the cumulative transform to the identity.
    pub fn reset_transform(&mut self) -> Result<(), IcpError> {
        self.state.reset();
        self.step.transform().set(&mut self.queue, &Similarity::IDENTITY)
    }

    /// Changes the weight of the color term of the index distance. The index
    /// is rebuilt at the next step.
    pub fn set_index_scale_alpha(&mut self, alpha: f32) -> Result<(), IcpError> {
        self.step.index_mut().set_alpha(alpha)?;
        self.config.index_scale_alpha = alpha;
        self.rebuild = true;
        Ok(())
    }

    /// Changes the factor applied to the deviations.
    pub fn set_covariance_scale(&mut self, c: f32) -> Result<(), IcpError> {
        self.step.set_covariance_scale(c)?;
        self.config.covariance_scale_c = c;
        Ok(())
    }

    /// Changes the convergence thresholds.
    pub fn set_thresholds(&mut self, angle_degrees: f64, translation: f64) -> Result<(), IcpError> {
        check_threshold("angle_threshold", angle_degrees)?;
        check_threshold("translation_threshold", translation)?;
        self.config.angle_threshold = angle_degrees;
        self.config.translation_threshold = translation;
        Ok(())
    }

    /// Changes the iteration cap.
    pub fn set_max_iterations(&mut self, max_iterations: usize) -> Result<(), IcpError> {
        if max_iterations == 0 {
            return Err(IcpError::invalid("max_iterations must be > 0"));
        }
        self.config.max_iterations = max_iterations;
        Ok(())
    }

    /// The whole moving grid transformed by the cumulative transform.
    pub fn aligned_cloud(&mut self) -> Result<Vec<Point8>, IcpError> {
        self.grid.run(&mut self.queue);
        Ok(self.queue.read(self.grid.output())?)
    }

    /// [`Registration::aligned_cloud`] split into geometry and colors.
    pub fn display_buffers(&mut self) -> Result<DisplayBuffers, IcpError> {
        Ok(DisplayBuffers::split(&self.aligned_cloud()?))
    }
}
