use pcreg_compute::launch::{groups_for, tree_reduce};
use pcreg_compute::reduce::{reduce_group, ReduceOp};
use pcreg_compute::{Buffer, Queue};
use rayon::prelude::*;

use crate::error::IcpError;
use crate::index::Correspondence;

/// Default constant `k` of the robust weights.
pub const DEFAULT_WEIGHT_CONSTANT: f32 = 100.0;

/// Elements handled by one work item.
const ELEMENTS_PER_ITEM: usize = 2;

/// Robust weight of a correspondence at distance `dist`.
#[inline]
pub fn robust_weight(dist: f32, k: f32) -> f32 {
    k / (k + dist)
}

/// Weights one work-group of correspondences and returns their sum.
fn weigh_group(matches: &[Correspondence], out: &mut [f32], k: f32, work_group_size: usize) -> f64 {
    let mut local = vec![0.0f64; work_group_size];
    for (acc, (pair, weights)) in local
        .iter_mut()
        .zip(matches.chunks(ELEMENTS_PER_ITEM).zip(out.chunks_mut(ELEMENTS_PER_ITEM)))
    {
        for (m, w) in pair.iter().zip(weights.iter_mut()) {
            *w = robust_weight(m.dist, k);
            *acc += *w as f64;
        }
    }
    tree_reduce(&mut local, |a, b| a + b);
    local[0]
}

/// Computes `w_i = k / (k + d_i)` for every correspondence, and `Σ w_i` in
/// double precision.
///
/// A work-group weighs `2 · wg` correspondences. When they all fit in one group
/// a single fused launch writes both outputs; otherwise the groups write partial
/// sums that a second launch reduces.
#[derive(Debug, Clone)]
pub struct Weights {
    k: f32,
    work_group_size: usize,
    groups: usize,
    correspondences: Buffer<Correspondence>,
    weights: Buffer<f32>,
    partials: Option<Buffer<f64>>,
    sum: Buffer<f64>,
}

impl Weights {
    /// Configures the weighting of the output of a search.
    pub fn new(queue: &mut Queue, correspondences: Buffer<Correspondence>, k: f32) -> Result<Self, IcpError> {
        let m = correspondences.len();
        let wg = queue.work_group_size();
        if m == 0 || m % 2 != 0 {
            return Err(IcpError::invalid(format!(
                "number of correspondences ({m}) must be even and > 0"
            )));
        }
        if m > 16 * wg * wg {
            return Err(IcpError::invalid(format!(
                "{m} correspondences exceed the weighting limit of {} for work-groups of {wg}",
                16 * wg * wg
            )));
        }
        if !k.is_finite() || k <= 0.0 {
            return Err(IcpError::invalid(format!("weight_constant must be finite and > 0, got {k}")));
        }
        let groups = groups_for(m, ELEMENTS_PER_ITEM * wg);
        Ok(Self {
            k,
            work_group_size: wg,
            groups,
            correspondences,
            weights: queue.alloc(m),
            partials: (groups > 1).then(|| queue.alloc(groups)),
            sum: queue.alloc(1),
        })
    }

    /// Per-correspondence weights.
    pub fn weights(&self) -> Buffer<f32> {
        self.weights
    }

    /// Single-element buffer holding `Σ w_i`.
    pub fn sum(&self) -> Buffer<f64> {
        self.sum
    }

    /// Number of work-groups of the first launch.
    pub fn groups(&self) -> usize {
        self.groups
    }

    /// Enqueues the weighting.
    pub fn run(&self, queue: &mut Queue) {
        let (k, wg) = (self.k, self.work_group_size);
        let (correspondences, weights, sum) = (self.correspondences, self.weights, self.sum);
        let per_group = ELEMENTS_PER_ITEM * wg;

        let Some(partials) = self.partials else {
            queue.enqueue("weights", move |arena| {
                arena.with_outputs(weights, sum, |arena, weights, sum| {
                    let matches = arena.get(correspondences)?;
                    sum[0] = weigh_group(matches, weights, k, wg);
                    Ok(())
                })
            });
            return;
        };

        queue.enqueue("weights_partials", move |arena| {
            arena.with_outputs(weights, partials, |arena, weights, partials| {
                let matches = arena.get(correspondences)?;
                // padding groups contribute zero
                partials.fill(0.0);
                weights
                    .par_chunks_mut(per_group)
                    .zip(matches.par_chunks(per_group))
                    .zip(partials.par_iter_mut())
                    .for_each(|((w, m), partial)| *partial = weigh_group(m, w, k, wg));
                Ok(())
            })
        });
        queue.enqueue("weights_sum", move |arena| {
            arena.with_output(sum, |arena, sum| {
                sum[0] = reduce_group(arena.get(partials)?, wg, ReduceOp::Sum);
                Ok(())
            })
        });
    }
}
