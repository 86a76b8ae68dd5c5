//! Per-object routes.

use serde::{Deserialize, Serialize};

use crate::events::Issuer;
use crate::objects::ObjectId;
use crate::pathfinding::{Path, PathStep};
use crate::pose::OrientationTarget;
use crate::terrain::CellPos;

/// A path being walked by one object, plus the facing to end in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    object: ObjectId,
    source: CellPos,
    target: CellPos,
    steps: Vec<PathStep>,
    cursor: usize,
    orientation: Option<OrientationTarget>,
    issuer: Issuer,
}

impl Route {
    /// Create a route from a found path.
    #[must_use]
    pub fn new(
        object: ObjectId,
        source: CellPos,
        target: CellPos,
        path: Path,
        orientation: Option<OrientationTarget>,
        issuer: Issuer,
    ) -> Self {
        Self {
            object,
            source,
            target,
            steps: path.into_steps(),
            cursor: 0,
            orientation,
            issuer,
        }
    }

    /// Owning object.
    #[must_use]
    pub const fn object(&self) -> ObjectId {
        self.object
    }

    /// Cell the route was planned from.
    #[must_use]
    pub const fn source(&self) -> CellPos {
        self.source
    }

    /// Requested destination. With an approach distance the path may end
    /// short of it.
    #[must_use]
    pub const fn target(&self) -> CellPos {
        self.target
    }

    /// All waypoints.
    #[must_use]
    pub fn steps(&self) -> &[PathStep] {
        &self.steps
    }

    /// Index of the next waypoint.
    #[must_use]
    pub const fn cursor(&self) -> usize {
        self.cursor
    }

    /// The waypoint being walked to, if any remain.
    #[must_use]
    pub fn next_step(&self) -> Option<PathStep> {
        self.steps.get(self.cursor).copied()
    }

    /// Waypoints not yet reached.
    #[must_use]
    pub fn remaining(&self) -> &[PathStep] {
        &self.steps[self.cursor.min(self.steps.len())..]
    }

    /// Mark the current waypoint reached.
    ///
    /// # Panics
    ///
    /// Panics if the path is already exhausted.
    pub fn advance(&mut self) {
        assert!(self.cursor < self.steps.len(), "route of {:?} advanced past its end", self.object);
        self.cursor += 1;
    }

    /// Restore a cursor saved before a speculative step.
    pub(crate) fn rewind(&mut self, cursor: usize) {
        debug_assert!(cursor <= self.cursor);
        self.cursor = cursor;
    }

    /// True once every waypoint is reached. The route may still be turning.
    #[must_use]
    pub fn is_path_exhausted(&self) -> bool {
        self.cursor >= self.steps.len()
    }

    /// Final facing, if requested.
    #[must_use]
    pub const fn orientation(&self) -> Option<OrientationTarget> {
        self.orientation
    }

    /// Who created the route.
    #[must_use]
    pub const fn issuer(&self) -> Issuer {
        self.issuer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pathfinding::ExactDistance;
    use crate::spatial::NodeId;

    fn path(cells: &[(u32, u32)]) -> Path {
        let steps = cells
            .iter()
            .enumerate()
            .map(|(i, &(x, y))| PathStep {
                cell: CellPos::new(x, y),
                node: NodeId(i as u32),
            })
            .collect();
        Path::new(steps, ExactDistance::ZERO)
    }

    #[test]
    fn test_cursor_walks_steps() {
        let mut route = Route::new(
            ObjectId(1),
            CellPos::new(0, 0),
            CellPos::new(2, 0),
            path(&[(1, 0), (2, 0)]),
            None,
            Issuer::Command,
        );
        assert_eq!(route.next_step().unwrap().cell, CellPos::new(1, 0));
        route.advance();
        assert_eq!(route.remaining().len(), 1);
        route.advance();
        assert!(route.is_path_exhausted());
        assert!(route.next_step().is_none());
        route.rewind(1);
        assert_eq!(route.next_step().unwrap().cell, CellPos::new(2, 0));
    }

    #[test]
    #[should_panic(expected = "past its end")]
    fn test_advance_past_end_panics() {
        let mut route = Route::new(
            ObjectId(1),
            CellPos::new(0, 0),
            CellPos::new(0, 0),
            Path::empty(),
            Some(OrientationTarget::Point(CellPos::new(3, 3).center())),
            Issuer::Fight,
        );
        route.advance();
    }
}
