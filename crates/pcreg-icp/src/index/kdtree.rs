use std::sync::{Arc, RwLock};

use kiddo::immutable::float::kdtree::ImmutableKdTree;
use pcreg_compute::{Buffer, ComputeError, Queue};
use rayon::prelude::*;

use super::{check_alpha, check_queries, Correspondence, SpatialIndex};
use crate::error::IcpError;
use crate::point::Point8;

type Tree = ImmutableKdTree<f32, u32, 6, 32>;

/// Embeds a point so that the squared euclidean distance is `‖Δp‖² + α‖Δc‖²`.
#[inline]
fn embed(p: &Point8, sqrt_alpha: f32) -> [f32; 6] {
    let [x, y, z, _] = p.geometry;
    let [r, g, b, _] = p.photometry;
    [x, y, z, sqrt_alpha * r, sqrt_alpha * g, sqrt_alpha * b]
}

/// Exact nearest neighbour search with a kd-tree built on the host.
///
/// The tree is rebuilt inside a queued command, so it always sees the fixed
/// landmarks written before [`SpatialIndex::build`] was called.
#[derive(Debug)]
pub struct KdTreeIndex {
    alpha: f32,
    landmarks: Buffer<Point8>,
    queries: Buffer<Point8>,
    tree: Arc<RwLock<Option<Tree>>>,
    nearest: Buffer<Point8>,
    correspondences: Buffer<Correspondence>,
}

impl KdTreeIndex {
    /// Configures the index over the fixed landmarks.
    pub fn new(
        queue: &mut Queue,
        landmarks: Buffer<Point8>,
        queries: Buffer<Point8>,
        alpha: f32,
    ) -> Result<Self, IcpError> {
        check_alpha(alpha)?;
        check_queries(landmarks, queries)?;
        Ok(Self {
            alpha,
            landmarks,
            queries,
            tree: Arc::new(RwLock::new(None)),
            nearest: queue.alloc(queries.len()),
            correspondences: queue.alloc(queries.len()),
        })
    }
}

fn poisoned() -> ComputeError {
    ComputeError::ThreadPool("kd-tree lock poisoned".to_string())
}

impl SpatialIndex for KdTreeIndex {
    fn build(&mut self, queue: &mut Queue) -> Result<(), IcpError> {
        let (landmarks, tree) = (self.landmarks, Arc::clone(&self.tree));
        let sqrt_alpha = self.alpha.sqrt();
        log::debug!("building kd-tree over {} landmarks", landmarks.len());

        queue.enqueue("kdtree_build", move |arena| {
            let entries = arena
                .get(landmarks)?
                .par_iter()
                .map(|p| embed(p, sqrt_alpha))
                .collect::<Vec<_>>();
            let built = Tree::new_from_slice(&entries);
            *tree.write().map_err(|_| poisoned())? = Some(built);
            Ok(())
        });
        Ok(())
    }

    fn search(&self, queue: &mut Queue) {
        let (landmarks, queries, tree) = (self.landmarks, self.queries, Arc::clone(&self.tree));
        let (nearest, correspondences) = (self.nearest, self.correspondences);
        let sqrt_alpha = self.alpha.sqrt();

        queue.enqueue("kdtree_search", move |arena| {
            let guard = tree.read().map_err(|_| poisoned())?;
            let Some(tree) = guard.as_ref() else {
                // searching before building matches nothing
                arena.get_mut(correspondences)?.fill(Correspondence {
                    dist: f32::INFINITY,
                    id: 0,
                });
                return Ok(());
            };
            arena.with_outputs(nearest, correspondences, |arena, nearest, matches| {
                let points = arena.get(landmarks)?;
                let queries = arena.get(queries)?;
                nearest
                    .par_iter_mut()
                    .zip(matches.par_iter_mut())
                    .zip(queries.par_iter())
                    .for_each(|((nearest, m), query)| {
                        let nn = tree.nearest_one::<kiddo::SquaredEuclidean>(&embed(query, sqrt_alpha));
                        *m = Correspondence {
                            dist: nn.distance,
                            id: nn.item,
                        };
                        *nearest = points[nn.item as usize];
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
