//! Parallel hierarchical culling.
//!
//! Used by view code for visibility, never by the tick. The tree is walked
//! sequentially down to a split depth; the intersecting subtrees found there
//! are then culled on a fixed-size worker pool, each worker reusing its own
//! scratch stack, and the per-subtree outputs are concatenated in tree order.

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};

use super::{Aabb, NodeId, SpatialIndex};
use crate::error::{GameError, Result};
use crate::math::{fixed_serde, Fixed, Vec2Fixed, Vec3Fixed};
use crate::terrain::CellPos;

/// A half-space: points with `normal · p + distance >= 0` are inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plane {
    /// Plane normal, pointing into the kept half-space.
    pub normal: Vec3Fixed,
    /// Signed offset.
    #[serde(with = "fixed_serde")]
    pub distance: Fixed,
}

impl Plane {
    fn signed(&self, p: Vec3Fixed) -> Fixed {
        self.normal.dot(p) + self.distance
    }

    /// Box corner furthest along the normal.
    fn positive_vertex(&self, b: &Aabb) -> Vec3Fixed {
        let pick = |n: Fixed, lo: Fixed, hi: Fixed| if n >= Fixed::ZERO { hi } else { lo };
        Vec3Fixed::new(
            pick(self.normal.x, b.min.x, b.max.x),
            pick(self.normal.y, b.min.y, b.max.y),
            pick(self.normal.z, b.min.z, b.max.z),
        )
    }

    fn negative_vertex(&self, b: &Aabb) -> Vec3Fixed {
        let pick = |n: Fixed, lo: Fixed, hi: Fixed| if n >= Fixed::ZERO { lo } else { hi };
        Vec3Fixed::new(
            pick(self.normal.x, b.min.x, b.max.x),
            pick(self.normal.y, b.min.y, b.max.y),
            pick(self.normal.z, b.min.z, b.max.z),
        )
    }
}

/// A convex view volume.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frustum {
    planes: Vec<Plane>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Containment {
    Outside,
    Intersecting,
    Inside,
}

impl Frustum {
    /// Frustum from explicit planes.
    #[must_use]
    pub fn new(planes: Vec<Plane>) -> Self {
        Self { planes }
    }

    /// Vertical prism over a ground rectangle, the shape of a top-down
    /// camera's view.
    #[must_use]
    pub fn ground_rect(min: Vec2Fixed, max: Vec2Fixed) -> Self {
        let plane = |x: i32, y: i32, distance: Fixed| Plane {
            normal: Vec3Fixed::new(Fixed::from_num(x), Fixed::from_num(y), Fixed::ZERO),
            distance,
        };
        Self::new(vec![
            plane(1, 0, -min.x),
            plane(-1, 0, max.x),
            plane(0, 1, -min.y),
            plane(0, -1, max.y),
        ])
    }

    /// The planes.
    #[must_use]
    pub fn planes(&self) -> &[Plane] {
        &self.planes
    }

    fn classify(&self, b: &Aabb) -> Containment {
        let mut result = Containment::Inside;
        for plane in &self.planes {
            if plane.signed(plane.positive_vertex(b)) < Fixed::ZERO {
                return Containment::Outside;
            }
            if plane.signed(plane.negative_vertex(b)) < Fixed::ZERO {
                result = Containment::Intersecting;
            }
        }
        result
    }
}

/// What the culler reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CullOutput {
    /// Largest fully visible nodes plus intersecting leaves.
    #[default]
    Nodes,
    /// Every visible leaf cell.
    Cells,
}

/// Culling parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CullParams {
    /// Output granularity.
    pub output: CullOutput,
    /// Depth at which the walk fans out to the worker pool.
    pub split_depth: u16,
}

impl Default for CullParams {
    fn default() -> Self {
        Self {
            output: CullOutput::Nodes,
            split_depth: 3,
        }
    }
}

/// A single cull result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CullHit {
    /// A visible node.
    Node(NodeId),
    /// A visible cell.
    Cell(CellPos),
}

enum Piece {
    Hits(Vec<CullHit>),
    Subtree(NodeId),
}

/// Frustum culler with its own worker pool.
pub struct Culler {
    pool: ThreadPool,
}

impl std::fmt::Debug for Culler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Culler")
            .field("threads", &self.pool.current_num_threads())
            .finish()
    }
}

impl Culler {
    /// Create a culler with `threads` workers (`0` = one per core).
    ///
    /// # Errors
    ///
    /// Returns [`GameError::InvalidState`] if the pool cannot be created.
    pub fn new(threads: usize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("cull-{i}"))
            .build()
            .map_err(|e| GameError::InvalidState(format!("cull pool: {e}")))?;
        Ok(Self { pool })
    }

    /// Number of worker threads.
    #[must_use]
    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Cull the index against a frustum. The result order depends only on
    /// the tree, never on thread scheduling.
    #[must_use]
    pub fn cull(&self, index: &SpatialIndex, frustum: &Frustum, params: CullParams) -> Vec<CullHit> {
        let pieces = split_pieces(index, frustum, params);
        let parts: Vec<Vec<CullHit>> = self.pool.install(|| {
            pieces
                .into_par_iter()
                .map_init(Vec::new, |stack, piece| match piece {
                    Piece::Hits(hits) => hits,
                    Piece::Subtree(root) => {
                        let mut out = Vec::new();
                        cull_subtree(index, frustum, params.output, root, stack, &mut out);
                        out
                    }
                })
                .collect()
        });
        parts.into_iter().flatten().collect()
    }
}

/// Walk down to the split depth, producing ordered pieces of output.
fn split_pieces(index: &SpatialIndex, frustum: &Frustum, params: CullParams) -> Vec<Piece> {
    let mut pieces = Vec::new();
    let mut current = Vec::new();
    let mut stack = vec![index.root()];
    while let Some(id) = stack.pop() {
        let node = index.node(id);
        match frustum.classify(&node.bounds()) {
            Containment::Outside => {}
            Containment::Inside => emit_whole(index, id, params.output, &mut current),
            Containment::Intersecting if node.is_leaf() => emit_whole(index, id, params.output, &mut current),
            Containment::Intersecting if node.depth() >= params.split_depth => {
                if !current.is_empty() {
                    pieces.push(Piece::Hits(std::mem::take(&mut current)));
                }
                pieces.push(Piece::Subtree(id));
            }
            Containment::Intersecting => stack.extend(node.children().iter().rev()),
        }
    }
    if !current.is_empty() {
        pieces.push(Piece::Hits(current));
    }
    pieces
}

fn cull_subtree(
    index: &SpatialIndex,
    frustum: &Frustum,
    output: CullOutput,
    root: NodeId,
    stack: &mut Vec<NodeId>,
    out: &mut Vec<CullHit>,
) {
    stack.clear();
    stack.push(root);
    while let Some(id) = stack.pop() {
        let node = index.node(id);
        match frustum.classify(&node.bounds()) {
            Containment::Outside => {}
            Containment::Intersecting if !node.is_leaf() => stack.extend(node.children().iter().rev()),
            _ => emit_whole(index, id, output, out),
        }
    }
}

fn emit_whole(index: &SpatialIndex, id: NodeId, output: CullOutput, out: &mut Vec<CullHit>) {
    match output {
        CullOutput::Nodes => out.push(CullHit::Node(id)),
        CullOutput::Cells => out.extend(index.node(id).cells().map(CullHit::Cell)),
    }
}
