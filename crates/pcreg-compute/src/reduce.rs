use std::ops::Add;

use num_traits::{Bounded, Zero};

use crate::buffer::{Buffer, Element};
use crate::error::ComputeError;
use crate::launch::{check_row_tiling, launch_groups, launch_items, tree_reduce, ELEMENTS_PER_ITEM};
use crate::queue::Queue;

/// Element types supported by [`Reduce`].
pub trait Reducible: Element + PartialOrd + Bounded + Zero + Add<Output = Self> {}

impl<T> Reducible for T where T: Element + PartialOrd + Bounded + Zero + Add<Output = T> {}

/// The reduction operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    /// Minimum of the row.
    Min,
    /// Maximum of the row.
    Max,
    /// Sum of the row.
    Sum,
}

impl ReduceOp {
    /// Neutral element of the operator.
    #[inline]
    pub fn identity<T: Reducible>(self) -> T {
        match self {
            ReduceOp::Min => T::max_value(),
            ReduceOp::Max => T::min_value(),
            ReduceOp::Sum => T::zero(),
        }
    }

    /// Combines two values.
    #[inline]
    pub fn apply<T: Reducible>(self, a: T, b: T) -> T {
        match self {
            ReduceOp::Min => {
                if b < a {
                    b
                } else {
                    a
                }
            }
            ReduceOp::Max => {
                if b > a {
                    b
                } else {
                    a
                }
            }
            ReduceOp::Sum => a + b,
        }
    }
}

/// Reduces the values one work-group sees.
///
/// Work item `i` folds the elements `i, i + wg, ..., i + 7 wg` of `data`
/// (missing elements read as the identity), then the group combines the item
/// results with a tree reduction.
pub fn reduce_group<T: Reducible>(data: &[T], work_group_size: usize, op: ReduceOp) -> T {
    let identity = op.identity::<T>();
    let mut local = (0..work_group_size)
        .map(|item| {
            (0..ELEMENTS_PER_ITEM)
                .filter_map(|k| data.get(item + k * work_group_size).copied())
                .fold(identity, |acc, v| op.apply(acc, v))
        })
        .collect::<Vec<_>>();
    tree_reduce(&mut local, |a, b| op.apply(a, b));
    local[0]
}

/// Row-wise min, max or sum reduction of a `rows x cols` array.
///
/// A row that fits in one work-group is reduced by a single launch. Larger rows
/// go through two launches: one partial result per group, then a single group
/// per row reducing the partials.
#[derive(Debug, Clone)]
pub struct Reduce<T: Reducible> {
    op: ReduceOp,
    cols: usize,
    rows: usize,
    groups: usize,
    work_group_size: usize,
    input: Buffer<T>,
    partials: Option<Buffer<T>>,
    output: Buffer<T>,
}

impl<T: Reducible> Reduce<T> {
    /// Configures a reduction with its own input buffer.
    pub fn new(queue: &mut Queue, op: ReduceOp, cols: usize, rows: usize) -> Result<Self, ComputeError> {
        check_row_tiling("reduce", cols, rows, queue.work_group_size())?;
        let input = queue.alloc::<T>(cols * rows);
        Self::with_input(queue, op, input, cols, rows)
    }

    /// Configures a reduction of a buffer produced by another stage.
    ///
    /// # Arguments
    ///
    /// * `input` - Row-major `rows x cols` buffer.
    pub fn with_input(
        queue: &mut Queue,
        op: ReduceOp,
        input: Buffer<T>,
        cols: usize,
        rows: usize,
    ) -> Result<Self, ComputeError> {
        let work_group_size = queue.work_group_size();
        let groups = check_row_tiling("reduce", cols, rows, work_group_size)?;
        if input.len() != cols * rows {
            return Err(ComputeError::LengthMismatch {
                id: input.id(),
                expected: cols * rows,
                actual: input.len(),
            });
        }
        let partials = (groups > 1).then(|| queue.alloc::<T>(groups * rows));
        let output = queue.alloc::<T>(rows);
        Ok(Self {
            op,
            cols,
            rows,
            groups,
            work_group_size,
            input,
            partials,
            output,
        })
    }

    /// Input buffer handle.
    pub fn input(&self) -> Buffer<T> {
        self.input
    }

    /// Output buffer handle, one value per row.
    pub fn output(&self) -> Buffer<T> {
        self.output
    }

    /// Number of work-groups per row.
    pub fn groups(&self) -> usize {
        self.groups
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Enqueues the reduction.
    pub fn run(&self, queue: &mut Queue) {
        let (op, cols, groups, wg) = (self.op, self.cols, self.groups, self.work_group_size);
        let (input, output) = (self.input, self.output);
        let per_group = ELEMENTS_PER_ITEM * wg;

        match self.partials {
            None => queue.enqueue("reduce", move |arena| {
                arena.with_output(output, |arena, out| {
                    let data = arena.get(input)?;
                    launch_items(out, |row, o| {
                        *o = reduce_group(&data[row * cols..(row + 1) * cols], wg, op);
                    });
                    Ok(())
                })
            }),
            Some(partials) => {
                queue.enqueue("reduce_partials", move |arena| {
                    arena.with_output(partials, |arena, out| {
                        let data = arena.get(input)?;
                        launch_groups(out, 1, |id, o| {
                            let (row, group) = (id / groups, id % groups);
                            let row_data = &data[row * cols..(row + 1) * cols];
                            let start = (group * per_group).min(cols);
                            let end = (start + per_group).min(cols);
                            o[0] = reduce_group(&row_data[start..end], wg, op);
                        });
                        Ok(())
                    })
                });
                queue.enqueue("reduce_final", move |arena| {
                    arena.with_output(output, |arena, out| {
                        let data = arena.get(partials)?;
                        launch_items(out, |row, o| {
                            *o = reduce_group(&data[row * groups..(row + 1) * groups], wg, op);
                        });
                        Ok(())
                    })
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Device;
    use approx::assert_relative_eq;
    use rand::Rng;

    fn naive(data: &[f32], op: ReduceOp) -> f32 {
        match op {
            ReduceOp::Min => data.iter().copied().fold(f32::MAX, f32::min),
            ReduceOp::Max => data.iter().copied().fold(f32::MIN, f32::max),
            ReduceOp::Sum => data.iter().map(|&v| v as f64).sum::<f64>() as f32,
        }
    }

    #[test]
    fn reduce_single_group() -> Result<(), Box<dyn std::error::Error>> {
        let mut queue = Queue::new(Device::cpu())?;
        let reduce = Reduce::<f32>::new(&mut queue, ReduceOp::Sum, 8, 2)?;
        assert_eq!(reduce.groups(), 1);

        let data = (0..16).map(|v| v as f32).collect::<Vec<_>>();
        queue.write(reduce.input(), data)?;
        reduce.run(&mut queue);
        assert_eq!(queue.read(reduce.output())?, vec![28.0, 92.0]);
        Ok(())
    }

    #[test]
    fn reduce_matches_naive_two_level() -> Result<(), Box<dyn std::error::Error>> {
        let mut rng = rand::rng();
        let mut queue = Queue::new(Device::cpu().with_work_group_size(16)?)?;
        let (cols, rows) = (16384, 3);

        let data = (0..cols * rows)
            .map(|_| rng.random_range(0.0..1.0f32))
            .collect::<Vec<_>>();

        for op in [ReduceOp::Min, ReduceOp::Max, ReduceOp::Sum] {
            let reduce = Reduce::<f32>::new(&mut queue, op, cols, rows)?;
            assert_eq!(reduce.groups(), 128);
            queue.write(reduce.input(), data.clone())?;
            reduce.run(&mut queue);
            let out = queue.read(reduce.output())?;

            for (row, &value) in out.iter().enumerate() {
                let expected = naive(&data[row * cols..(row + 1) * cols], op);
                assert_relative_eq!(value, expected, max_relative = 4200.0 * f32::EPSILON);
            }
        }
        Ok(())
    }

    #[test]
    fn reduce_integers() -> Result<(), Box<dyn std::error::Error>> {
        let mut queue = Queue::new(Device::cpu().with_work_group_size(4)?)?;
        let reduce = Reduce::<i32>::new(&mut queue, ReduceOp::Min, 100, 1)?;
        // 100 columns over groups of 32 elements round up to 4 groups
        assert_eq!(reduce.groups(), 4);

        let data = (0..100).map(|v| 50 - v).collect::<Vec<i32>>();
        queue.write(reduce.input(), data)?;
        reduce.run(&mut queue);
        assert_eq!(queue.read(reduce.output())?, vec![-49]);
        Ok(())
    }

    #[test]
    fn reduce_aliases_producer_output() -> Result<(), Box<dyn std::error::Error>> {
        let mut queue = Queue::new(Device::cpu())?;
        let produced = queue.alloc::<f64>(12);
        queue.enqueue("fill", move |arena| {
            arena.get_mut(produced)?.fill(0.5);
            Ok(())
        });
        let reduce = Reduce::with_input(&mut queue, ReduceOp::Sum, produced, 4, 3)?;
        reduce.run(&mut queue);
        assert_eq!(queue.read(reduce.output())?, vec![2.0; 3]);

        let wrong = queue.alloc::<f64>(10);
        assert!(Reduce::with_input(&mut queue, ReduceOp::Sum, wrong, 4, 3).is_err());
        Ok(())
    }

    #[test]
    fn invalid_columns() -> Result<(), Box<dyn std::error::Error>> {
        let mut queue = Queue::new(Device::cpu())?;
        assert!(matches!(
            Reduce::<f32>::new(&mut queue, ReduceOp::Sum, 10, 1),
            Err(ComputeError::InvalidShape { kernel: "reduce", .. })
        ));
        assert!(Reduce::<f32>::new(&mut queue, ReduceOp::Sum, 0, 1).is_err());
        Ok(())
    }
}
