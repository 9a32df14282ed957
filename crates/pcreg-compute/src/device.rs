use std::fmt;

use crate::error::ComputeError;

/// Default number of work items per work-group.
pub const DEFAULT_WORK_GROUP_SIZE: usize = 256;

/// Description of the compute device a [`crate::Queue`] dispatches to.
///
/// Kernels are tiled in work-groups of `max_work_group_size` items the same way
/// they would be on a GPU, so this value bounds the problem sizes every
/// two-level primitive accepts. The groups themselves run on a thread pool with
/// `compute_units` threads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    name: String,
    max_work_group_size: usize,
    compute_units: usize,
}

impl Device {
    /// Creates a device backed by the host cpu, using all available cores.
    pub fn cpu() -> Self {
        let compute_units = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            name: "cpu".to_string(),
            max_work_group_size: DEFAULT_WORK_GROUP_SIZE,
            compute_units,
        }
    }

    /// Sets the work-group size.
    ///
    /// # Arguments
    ///
    /// * `size` - Number of work items per group, a power of two and at least 4.
    pub fn with_work_group_size(mut self, size: usize) -> Result<Self, ComputeError> {
        if size < 4 || !size.is_power_of_two() {
            return Err(ComputeError::InvalidWorkGroupSize(size));
        }
        self.max_work_group_size = size;
        Ok(self)
    }

    /// Sets the number of threads used to run work-groups.
    pub fn with_compute_units(mut self, units: usize) -> Result<Self, ComputeError> {
        if units == 0 {
            return Err(ComputeError::InvalidComputeUnits(units));
        }
        self.compute_units = units;
        Ok(self)
    }

    /// Returns the device name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of work items per work-group.
    #[inline]
    pub fn max_work_group_size(&self) -> usize {
        self.max_work_group_size
    }

    /// Returns the number of threads running work-groups.
    #[inline]
    pub fn compute_units(&self) -> usize {
        self.compute_units
    }
}

impl Default for Device {
    fn default() -> Self {
        Self::cpu()
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} compute units, work-group size {})",
            self.name, self.compute_units, self.max_work_group_size
        )
    }
}
