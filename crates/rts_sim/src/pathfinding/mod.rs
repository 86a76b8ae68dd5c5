//! Pathfinding over the spatial index.
//!
//! All path costs are [`ExactDistance`] values, so two machines searching
//! the same terrain always agree on the chosen path.
//!
//! - [`distance`] - the `a + b·√2` metric
//! - [`astar`] - leaf-level A* with island pre-check and approach mode
//! - [`hierarchical`] - coarse block search that narrows the leaf search

pub mod astar;
pub mod distance;
pub mod hierarchical;

use serde::{Deserialize, Serialize};

use crate::spatial::NodeId;
use crate::terrain::CellPos;

pub use astar::{PathFinder, SearchStats};
pub use distance::ExactDistance;

/// One waypoint of a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathStep {
    /// Cell to walk to.
    pub cell: CellPos,
    /// Leaf node covering the cell.
    pub node: NodeId,
}

/// A found path. The source cell is not part of it, so an empty path means
/// the mover is already where it needs to be.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Path {
    steps: Vec<PathStep>,
    cost: ExactDistance,
}

impl Path {
    /// A path with no waypoints.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    pub(crate) fn new(steps: Vec<PathStep>, cost: ExactDistance) -> Self {
        Self { steps, cost }
    }

    /// Waypoints in walking order.
    #[must_use]
    pub fn steps(&self) -> &[PathStep] {
        &self.steps
    }

    /// Consume the path, returning its waypoints.
    #[must_use]
    pub fn into_steps(self) -> Vec<PathStep> {
        self.steps
    }

    /// Waypoint cells in walking order.
    pub fn cells(&self) -> impl Iterator<Item = CellPos> + '_ {
        self.steps.iter().map(|s| s.cell)
    }

    /// True when no movement is needed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Number of waypoints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Total exact cost.
    #[must_use]
    pub fn cost(&self) -> ExactDistance {
        self.cost
    }

    /// Final waypoint.
    #[must_use]
    pub fn last_cell(&self) -> Option<CellPos> {
        self.steps.last().map(|s| s.cell)
    }
}
