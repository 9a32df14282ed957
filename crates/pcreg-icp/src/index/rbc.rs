use pcreg_compute::launch::launch_items;
use pcreg_compute::scan::{Scan, ScanKind};
use pcreg_compute::{Buffer, Queue};
use rayon::prelude::*;

use super::{check_alpha, check_queries, distance, Correspondence, SpatialIndex};
use crate::error::IcpError;
use crate::point::Point8;

/// One-shot random ball cover.
///
/// Every fixed landmark is assigned to its nearest representative. A query
/// finds its nearest representative, then the exact nearest landmark among
/// the ones assigned to it, so the result is approximate near the cell
/// boundaries.
#[derive(Debug)]
pub struct RbcIndex {
    alpha: f32,
    landmarks: Buffer<Point8>,
    representatives: Buffer<Point8>,
    queries: Buffer<Point8>,
    assignments: Buffer<u32>,
    offsets: Scan<u32>,
    lists: Buffer<u32>,
    nearest: Buffer<Point8>,
    correspondences: Buffer<Correspondence>,
}

/// Nearest representative under the index metric. Ties go to the lowest index.
fn nearest_representative(representatives: &[Point8], point: &Point8, alpha: f32) -> usize {
    let mut best = (f32::INFINITY, 0);
    for (r, rep) in representatives.iter().enumerate() {
        let d = distance(rep, point, alpha);
        if d < best.0 {
            best = (d, r);
        }
    }
    best.1
}

impl RbcIndex {
    /// Configures the index.
    ///
    /// # Arguments
    ///
    /// * `landmarks` - Fixed landmarks to index.
    /// * `representatives` - Seeds of the cover, a multiple of 4 in count.
    /// * `queries` - Points searched by [`SpatialIndex::search`].
    /// * `alpha` - Weight of the color term of the distance.
    pub fn new(
        queue: &mut Queue,
        landmarks: Buffer<Point8>,
        representatives: Buffer<Point8>,
        queries: Buffer<Point8>,
        alpha: f32,
    ) -> Result<Self, IcpError> {
        check_alpha(alpha)?;
        check_queries(landmarks, queries)?;
        if representatives.is_empty() {
            return Err(IcpError::invalid("random ball cover needs representatives"));
        }
        let counts = queue.alloc::<u32>(representatives.len());
        let offsets = Scan::with_input(queue, ScanKind::Exclusive, counts, representatives.len(), 1)?;
        Ok(Self {
            alpha,
            landmarks,
            representatives,
            queries,
            assignments: queue.alloc(landmarks.len()),
            offsets,
            lists: queue.alloc(landmarks.len()),
            nearest: queue.alloc(queries.len()),
            correspondences: queue.alloc(queries.len()),
        })
    }

    /// Number of landmarks assigned to each representative.
    pub fn counts(&self) -> Buffer<u32> {
        self.offsets.input()
    }

    /// Start of each representative's list in [`RbcIndex::lists`].
    pub fn offsets(&self) -> Buffer<u32> {
        self.offsets.output()
    }

    /// Landmark ids grouped by representative, in increasing id order within a group.
    pub fn lists(&self) -> Buffer<u32> {
        self.lists
    }
}

impl SpatialIndex for RbcIndex {
    fn build(&mut self, queue: &mut Queue) -> Result<(), IcpError> {
        let alpha = self.alpha;
        let (landmarks, representatives) = (self.landmarks, self.representatives);
        let (assignments, counts, lists) = (self.assignments, self.counts(), self.lists);
        let offsets = self.offsets();
        log::debug!(
            "building random ball cover: {} landmarks, {} representatives",
            landmarks.len(),
            representatives.len()
        );

        queue.enqueue("rbc_assign", move |arena| {
            arena.with_output(assignments, |arena, out| {
                let points = arena.get(landmarks)?;
                let reps = arena.get(representatives)?;
                launch_items(out, |i, o| {
                    *o = nearest_representative(reps, &points[i], alpha) as u32;
                });
                Ok(())
            })
        });
        queue.enqueue("rbc_count", move |arena| {
            arena.with_output(counts, |arena, out| {
                let assigned = arena.get(assignments)?;
                launch_items(out, |r, o| {
                    *o = assigned.iter().filter(|&&a| a as usize == r).count() as u32;
                });
                Ok(())
            })
        });
        self.offsets.run(queue);
        queue.enqueue("rbc_scatter", move |arena| {
            arena.with_output(lists, |arena, out| {
                let assigned = arena.get(assignments)?;
                let counts = arena.get(counts)?;
                let offsets = arena.get(offsets)?;
                // carve the output into one disjoint segment per representative
                let mut segments = Vec::with_capacity(counts.len());
                let mut rest: &mut [u32] = out;
                for (&count, &offset) in counts.iter().zip(offsets) {
                    debug_assert_eq!(offset as usize, assigned.len() - rest.len());
                    let (segment, tail) = std::mem::take(&mut rest).split_at_mut(count as usize);
                    segments.push(segment);
                    rest = tail;
                }
                segments.into_par_iter().enumerate().for_each(|(r, segment)| {
                    let ids = assigned
                        .iter()
                        .enumerate()
                        .filter(|(_, a)| **a as usize == r)
                        .map(|(i, _)| i as u32);
                    for (slot, id) in segment.iter_mut().zip(ids) {
                        *slot = id;
                    }
                });
                Ok(())
            })
        });
        Ok(())
    }

    fn search(&self, queue: &mut Queue) {
        let alpha = self.alpha;
        let (landmarks, representatives, queries) = (self.landmarks, self.representatives, self.queries);
        let (counts, offsets, lists) = (self.counts(), self.offsets(), self.lists);
        let (nearest, correspondences) = (self.nearest, self.correspondences);

        queue.enqueue("rbc_search", move |arena| {
            arena.with_outputs(nearest, correspondences, |arena, nearest, matches| {
                let points = arena.get(landmarks)?;
                let reps = arena.get(representatives)?;
                let queries = arena.get(queries)?;
                let counts = arena.get(counts)?;
                let offsets = arena.get(offsets)?;
                let lists = arena.get(lists)?;
                nearest
                    .par_iter_mut()
                    .zip(matches.par_iter_mut())
                    .zip(queries.par_iter())
                    .for_each(|((nearest, m), query)| {
                        let r = nearest_representative(reps, query, alpha);
                        let start = offsets[r] as usize;
                        let list = &lists[start..start + counts[r] as usize];
                        let mut best = Correspondence {
                            dist: f32::INFINITY,
                            id: 0,
                        };
                        for &id in list {
                            let dist = distance(&points[id as usize], query, alpha);
                            if dist < best.dist {
                                best = Correspondence { dist, id };
                            }
                        }
                        *m = best;
                        *nearest = points[best.id as usize];
                    });
                Ok(())
            })
        });
    }

    fn nearest_points(&self) -> Buffer<Point8> {
        self.nearest
    }

    fn correspondences(&self) -> Buffer<Correspondence> {
        self.correspondences
    }

    fn alpha(&self) -> f32 {
        self.alpha
    }

    fn set_alpha(&mut self, alpha: f32) -> Result<(), IcpError> {
        check_alpha(alpha)?;
        self.alpha = alpha;
        Ok(())
    }
}
