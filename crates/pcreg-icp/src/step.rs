use pcreg_compute::{Buffer, Queue};

use crate::centroid::Centroids;
use crate::config::{IcpConfig, IndexKind, RotationStrategy, Weighting};
use crate::covariance::CrossCovariance;
use crate::deviation::Deviations;
use crate::error::IcpError;
use crate::index::{KdTreeIndex, RbcIndex, SpatialIndex};
use crate::point::Point8;
use crate::rotation::{PowerMethod, RotationEstimator, Solver};
use crate::state::{Similarity, TransformState};
use crate::transform::{Transform, TransformForm};
use crate::weights::Weights;

/// Stages of one registration step, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStage {
    /// Building the spatial index. Only entered when a rebuild is requested.
    AwaitIndex,
    /// Transforming the moving landmarks and searching their correspondences.
    Searching,
    /// Weighting the correspondences. Only entered with robust weighting.
    Weighting,
    /// Centroids, deviations, covariance and rotation.
    Estimating,
    /// Accumulating the incremental transform and uploading the cumulative one.
    Composing,
}

#[derive(Debug)]
enum Estimation {
    Regular {
        centroids: Centroids,
        deviations: Deviations,
        covariance: CrossCovariance,
    },
    Weighted {
        weights: Weights,
        centroids: Centroids,
        deviations: Deviations,
        covariance: CrossCovariance,
    },
}

impl Estimation {
    fn new(
        queue: &mut Queue,
        config: &IcpConfig,
        fixed: Buffer<Point8>,
        moving: Buffer<Point8>,
        index: &dyn SpatialIndex,
    ) -> Result<Self, IcpError> {
        let c = config.covariance_scale_c;
        Ok(match config.weighting {
            Weighting::None => {
                let centroids = Centroids::new(queue, fixed, moving)?;
                let deviations = Deviations::new(queue, fixed, moving, centroids.output())?;
                let covariance = CrossCovariance::new(queue, deviations.fixed(), deviations.moving(), c)?;
                Estimation::Regular {
                    centroids,
                    deviations,
                    covariance,
                }
            }
            Weighting::RobustInverseDistance => {
                let weights = Weights::new(queue, index.correspondences(), config.weight_constant)?;
                let centroids =
                    Centroids::weighted(queue, fixed, moving, weights.weights(), weights.sum())?;
                let deviations = Deviations::new(queue, fixed, moving, centroids.output())?;
                let covariance = CrossCovariance::weighted(
                    queue,
                    deviations.fixed(),
                    deviations.moving(),
                    weights.weights(),
                    c,
                )?;
                Estimation::Weighted {
                    weights,
                    centroids,
                    deviations,
                    covariance,
                }
            }
        })
    }

    fn is_weighted(&self) -> bool {
        matches!(self, Estimation::Weighted { .. })
    }

    fn run_weights(&self, queue: &mut Queue) {
        if let Estimation::Weighted { weights, .. } = self {
            weights.run(queue);
        }
    }

    fn run_estimates(&self, queue: &mut Queue) {
        match self {
            Estimation::Regular {
                centroids,
                deviations,
                covariance,
            }
            | Estimation::Weighted {
                centroids,
                deviations,
                covariance,
                ..
            } => {
                centroids.run(queue);
                deviations.run(queue);
                covariance.run(queue);
            }
        }
    }

    fn centroids(&self) -> &Centroids {
        match self {
            Estimation::Regular { centroids, .. } | Estimation::Weighted { centroids, .. } => centroids,
        }
    }

    fn covariance(&self) -> &CrossCovariance {
        match self {
            Estimation::Regular { covariance, .. } | Estimation::Weighted { covariance, .. } => covariance,
        }
    }

    fn covariance_mut(&mut self) -> &mut CrossCovariance {
        match self {
            Estimation::Regular { covariance, .. } | Estimation::Weighted { covariance, .. } => covariance,
        }
    }
}

/// One iteration of the registration: transform, search, estimate, compose.
///
/// The stages are wired at construction from the configuration. The moving
/// landmarks are always transformed from the loaded copy by the
/// cumulative transform held in the parameter buffer of [`RegistrationStep::transform`].
#[derive(Debug)]
pub struct RegistrationStep {
    stage: StepStage,
    transform: Transform,
    index: Box<dyn SpatialIndex>,
    estimation: Estimation,
    rotation: RotationEstimator,
}

impl RegistrationStep {
    /// Wires the stages of a step.
    ///
    /// # Arguments
    ///
    /// * `fixed_landmarks` - Landmarks of the fixed cloud, indexed for the search.
    /// * `representatives` - Seeds of the random ball cover.
    /// * `moving_landmarks` - Untransformed landmarks of the moving cloud.
    pub fn new(
        queue: &mut Queue,
        config: &IcpConfig,
        fixed_landmarks: Buffer<Point8>,
        representatives: Buffer<Point8>,
        moving_landmarks: Buffer<Point8>,
    ) -> Result<Self, IcpError> {
        let (form, solver) = match config.rotation_strategy {
            RotationStrategy::ClosedForm => (TransformForm::Matrix, Solver::ClosedForm),
            RotationStrategy::PowerIteration => (
                TransformForm::Quaternion,
                Solver::PowerIteration(PowerMethod {
                    max_iterations: config.power_iterations,
                    ..Default::default()
                }),
            ),
        };
        let transform = Transform::new(queue, form, moving_landmarks)?;
        let queries = transform.output();
        let alpha = config.index_scale_alpha;
        let index: Box<dyn SpatialIndex> = match config.index {
            IndexKind::Rbc => Box::new(RbcIndex::new(
                queue,
                fixed_landmarks,
                representatives,
                queries,
                alpha,
            )?),
            IndexKind::KdTree => Box::new(KdTreeIndex::new(queue, fixed_landmarks, queries, alpha)?),
        };
        let estimation = Estimation::new(queue, config, index.nearest_points(), queries, index.as_ref())?;
        let rotation = RotationEstimator::new(
            queue,
            solver,
            estimation.centroids().output(),
            estimation.covariance().output(),
        )?;
        Ok(Self {
            stage: StepStage::AwaitIndex,
            transform,
            index,
            estimation,
            rotation,
        })
    }

    /// The last stage entered.
    pub fn stage(&self) -> StepStage {
        self.stage
    }

    /// Transform of the moving landmarks.
    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    /// The correspondence search structure.
    pub fn index(&self) -> &dyn SpatialIndex {
        self.index.as_ref()
    }

    /// Mutable access to the correspondence search structure.
    pub fn index_mut(&mut self) -> &mut dyn SpatialIndex {
        self.index.as_mut()
    }

    /// Buffer of the weights, in the robust weighting mode.
    pub fn weights(&self) -> Option<Buffer<f32>> {
        match &self.estimation {
            Estimation::Regular { .. } => None,
            Estimation::Weighted { weights, .. } => Some(weights.weights()),
        }
    }

    /// Buffer of the centroids.
    pub fn centroids(&self) -> Buffer<f32> {
        self.estimation.centroids().output()
    }

    /// Buffer of the covariance bundle.
    pub fn covariance(&self) -> Buffer<f32> {
        self.estimation.covariance().output()
    }

    /// The rotation strategy.
    pub fn solver(&self) -> Solver {
        self.rotation.solver()
    }

    /// Factor applied to the deviations before they are multiplied.
    pub fn covariance_scale(&self) -> f32 {
        self.estimation.covariance().scale()
    }

    /// Changes the factor applied to the deviations.
    pub fn set_covariance_scale(&mut self, c: f32) -> Result<(), IcpError> {
        self.estimation.covariance_mut().set_scale(c)
    }

    fn enter(&mut self, stage: StepStage) {
        log::trace!("step stage {:?} -> {:?}", self.stage, stage);
        self.stage = stage;
    }

    /// Runs one step and returns the incremental transform.
    ///
    /// Blocks on the read-back of the estimate and on the upload of the new
    /// cumulative transform, which `state` holds on return.
    pub fn run(
        &mut self,
        queue: &mut Queue,
        state: &mut TransformState,
        rebuild: bool,
    ) -> Result<Similarity, IcpError> {
        if rebuild {
            self.enter(StepStage::AwaitIndex);
            self.index.build(queue)?;
        }

        self.enter(StepStage::Searching);
        self.transform.run(queue);
        self.index.search(queue);

        if self.estimation.is_weighted() {
            self.enter(StepStage::Weighting);
            self.estimation.run_weights(queue);
        }

        self.enter(StepStage::Estimating);
        self.estimation.run_estimates(queue);
        let incremental = self.rotation.estimate(queue)?;

        self.enter(StepStage::Composing);
        state.compose(incremental);
        self.transform.set(queue, &state.cumulative)?;
        log::debug!(
            "step: {:.6} deg, |t| = {:.6}, s = {:.6}",
            incremental.angle_degrees(),
            incremental.translation_norm(),
            incremental.scale
        );
        Ok(incremental)
    }
}
