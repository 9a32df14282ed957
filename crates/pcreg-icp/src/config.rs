use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::IcpError;

/// How the incremental rotation is extracted from the cross-covariance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationStrategy {
    /// SVD of the cross-covariance, computed on the host.
    #[default]
    ClosedForm,
    /// Power iteration on Horn's 4×4 matrix, computed on the device.
    PowerIteration,
}

/// Whether correspondences are weighted by their distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Weighting {
    /// Every correspondence counts the same.
    #[default]
    None,
    /// `w = k / (k + d)` for the correspondence distance `d`.
    RobustInverseDistance,
}

/// Spatial index used for the correspondence search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    /// One-shot random ball cover over the representatives (approximate).
    #[default]
    Rbc,
    /// Exact kd-tree search.
    KdTree,
}

/// Parameters of a registration session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IcpConfig {
    /// Maximum number of iterations of [`crate::Registration::run`].
    pub max_iterations: usize,
    /// Incremental rotation, in degrees, below which the registration stops.
    pub angle_threshold: f64,
    /// Incremental translation norm, in cloud units, below which the registration stops.
    pub translation_threshold: f64,
    /// Rotation extraction strategy.
    pub rotation_strategy: RotationStrategy,
    /// Correspondence weighting mode.
    pub weighting: Weighting,
    /// Correspondence search structure.
    pub index: IndexKind,
    /// Weight `α` of the color distance in `‖Δp‖² + α‖Δc‖²`.
    pub index_scale_alpha: f32,
    /// Factor `c` applied to deviations before they are multiplied.
    pub covariance_scale_c: f32,
    /// Constant `k` of the robust weights.
    pub weight_constant: f32,
    /// Number of representatives seeding the spatial index.
    pub num_representatives: usize,
    /// Iteration cap of the power method.
    pub power_iterations: usize,
}

impl Default for IcpConfig {
    fn default() -> Self {
        Self {
            max_iterations: 40,
            angle_threshold: 0.001,
            translation_threshold: 0.01,
            rotation_strategy: RotationStrategy::default(),
            weighting: Weighting::default(),
            index: IndexKind::default(),
            index_scale_alpha: 2e2,
            covariance_scale_c: 1e-6,
            weight_constant: 100.0,
            num_representatives: 256,
            power_iterations: pcreg_linalg::power::DEFAULT_MAX_ITERATIONS,
        }
    }
}

impl IcpConfig {
    /// Parses a configuration from JSON. Missing fields take their default value.
    pub fn from_json(json: &str) -> Result<Self, IcpError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, IcpError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| IcpError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Checks the parameters that do not depend on the device.
    pub fn validate(&self) -> Result<(), IcpError> {
        if self.max_iterations == 0 {
            return Err(IcpError::invalid("max_iterations must be > 0"));
        }
        check_threshold("angle_threshold", self.angle_threshold)?;
        check_threshold("translation_threshold", self.translation_threshold)?;
        if !self.index_scale_alpha.is_finite() || self.index_scale_alpha < 0.0 {
            return Err(IcpError::invalid("index_scale_alpha must be finite and >= 0"));
        }
        check_covariance_scale(self.covariance_scale_c)?;
        if !self.weight_constant.is_finite() || self.weight_constant <= 0.0 {
            return Err(IcpError::invalid("weight_constant must be finite and > 0"));
        }
        crate::sampling::representative_layout(self.num_representatives)?;
        if self.power_iterations == 0 {
            return Err(IcpError::invalid("power_iterations must be > 0"));
        }
        Ok(())
    }
}

pub(crate) fn check_threshold(name: &str, value: f64) -> Result<(), IcpError> {
    if !value.is_finite() || value < 0.0 {
        return Err(IcpError::invalid(format!("{name} must be finite and >= 0, got {value}")));
    }
    Ok(())
}

pub(crate) fn check_covariance_scale(c: f32) -> Result<(), IcpError> {
    if !c.is_finite() || c == 0.0 {
        return Err(IcpError::invalid(format!(
            "covariance_scale_c must be finite and non-zero, got {c}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() -> Result<(), IcpError> {
        let config = IcpConfig::default();
        config.validate()?;
        assert_eq!(config.max_iterations, 40);
        assert_eq!(config.num_representatives, 256);
        Ok(())
    }

    #[test]
    fn partial_json() -> Result<(), IcpError> {
        let config = IcpConfig::from_json(
            r#"{ "rotation_strategy": "power_iteration", "weighting": "robust_inverse_distance", "max_iterations": 10 }"#,
        )?;
        assert_eq!(config.rotation_strategy, RotationStrategy::PowerIteration);
        assert_eq!(config.weighting, Weighting::RobustInverseDistance);
        assert_eq!(config.max_iterations, 10);
        assert_eq!(config.index, IndexKind::Rbc);
        assert_eq!(config.covariance_scale_c, 1e-6);
        Ok(())
    }

    #[test]
    fn invalid_values() {
        let zero_scale = IcpConfig {
            covariance_scale_c: 0.0,
            ..Default::default()
        };
        assert!(matches!(zero_scale.validate(), Err(IcpError::InvalidConfig(_))));

        let reps = IcpConfig {
            num_representatives: 250,
            ..Default::default()
        };
        assert!(reps.validate().is_err());

        assert!(IcpConfig::from_json(r#"{ "max_iterations": 0 }"#).is_err());
        assert!(matches!(
            IcpConfig::from_json(r#"{ "index": "octree" }"#),
            Err(IcpError::Config(_))
        ));
    }

    #[test]
    fn config_file() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("icp.json");
        let config = IcpConfig {
            index: IndexKind::KdTree,
            index_scale_alpha: 1e4,
            ..Default::default()
        };
        std::fs::write(&path, serde_json::to_string_pretty(&config)?)?;
        assert_eq!(IcpConfig::from_file(&path)?, config);
        Ok(())
    }
}
