use rayon::prelude::*;

use crate::error::ComputeError;

/// Number of elements each work item of a reduction or scan processes.
pub const ELEMENTS_PER_ITEM: usize = 8;

/// Number of work-groups needed to cover `len` elements, `per_group` at a time.
///
/// As with the device kernels, a multi-group dimension is rounded up to a
/// multiple of 4 so the partial results can be consumed as 4-vectors.
pub fn groups_for(len: usize, per_group: usize) -> usize {
    let groups = len.div_ceil(per_group);
    if groups == 1 {
        groups
    } else {
        groups.next_multiple_of(4)
    }
}

/// Validates the column count of a two-level row primitive.
///
/// # Arguments
///
/// * `kernel` - Name used in the error message.
/// * `cols` - Number of columns of each row.
/// * `work_group_size` - Work items per group.
///
/// # Returns
///
/// The number of work-groups per row.
pub fn check_row_tiling(
    kernel: &'static str,
    cols: usize,
    rows: usize,
    work_group_size: usize,
) -> Result<usize, ComputeError> {
    let per_group = ELEMENTS_PER_ITEM * work_group_size;
    if rows == 0 {
        return Err(ComputeError::invalid_shape(kernel, "number of rows must be > 0"));
    }
    if cols == 0 {
        return Err(ComputeError::invalid_shape(kernel, "number of columns must be > 0"));
    }
    if cols % 4 != 0 {
        return Err(ComputeError::invalid_shape(
            kernel,
            format!("number of columns ({cols}) must be a multiple of 4"),
        ));
    }
    if cols > per_group * per_group {
        return Err(ComputeError::invalid_shape(
            kernel,
            format!(
                "number of columns ({cols}) exceeds the two-level limit of {}",
                per_group * per_group
            ),
        ));
    }
    Ok(groups_for(cols, per_group))
}

/// In-group tree reduction over local memory.
///
/// `local.len()` must be a power of two; the result is left in `local[0]`.
/// The halving order matches a work-group barrier reduction, which fixes the
/// floating point summation order independently of the thread count.
pub fn tree_reduce<T: Copy>(local: &mut [T], op: impl Fn(T, T) -> T) {
    debug_assert!(local.len().is_power_of_two());
    let mut stride = local.len() / 2;
    while stride > 0 {
        for i in 0..stride {
            local[i] = op(local[i], local[i + stride]);
        }
        stride /= 2;
    }
}

/// Runs `kernel` once per work-group, in parallel.
///
/// `out` is split into consecutive chunks of `chunk` elements, one per group.
pub fn launch_groups<T, F>(out: &mut [T], chunk: usize, kernel: F)
where
    T: Send,
    F: Fn(usize, &mut [T]) + Send + Sync,
{
    out.par_chunks_mut(chunk)
        .enumerate()
        .for_each(|(group, group_out)| kernel(group, group_out));
}

/// Runs `kernel` once per output element, in parallel.
pub fn launch_items<T, F>(out: &mut [T], kernel: F)
where
    T: Send,
    F: Fn(usize, &mut T) + Send + Sync,
{
    out.par_iter_mut()
        .enumerate()
        .for_each(|(i, item)| kernel(i, item));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_count_rounding() {
        assert_eq!(groups_for(100, 2048), 1);
        assert_eq!(groups_for(2048, 2048), 1);
        assert_eq!(groups_for(2049, 2048), 4);
        assert_eq!(groups_for(16384, 2048), 8);
        assert_eq!(groups_for(5 * 2048, 2048), 8);
    }

    #[test]
    fn tiling_errors() {
        assert!(check_row_tiling("reduce", 0, 1, 256).is_err());
        assert!(check_row_tiling("reduce", 6, 1, 256).is_err());
        assert!(check_row_tiling("reduce", 16, 0, 256).is_err());
        // (8 * 4)^2 columns is the largest two-level problem for 4 items per group
        assert_eq!(check_row_tiling("reduce", 1024, 1, 4), Ok(32));
        assert!(check_row_tiling("reduce", 1028, 1, 4).is_err());
    }

    #[test]
    fn tree_reduce_sums() {
        let mut local = [1, 2, 3, 4, 5, 6, 7, 8];
        tree_reduce(&mut local, |a, b| a + b);
        assert_eq!(local[0], 36);
    }
}
