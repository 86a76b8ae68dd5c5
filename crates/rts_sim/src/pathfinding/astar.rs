//! Leaf-level A* search.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use tracing::trace;

use super::{ExactDistance, Path, PathStep};
use crate::math::Fixed;
use crate::spatial::{NodeId, SpatialIndex};
use crate::terrain::{CellPos, Direction};

/// Counters from the most recent search.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchStats {
    /// Leaf nodes taken off the open set and expanded.
    pub expanded: usize,
    /// Block nodes expanded by the coarse stage of a hierarchical search.
    pub coarse_expanded: usize,
    /// Whether a hierarchical search had to fall back to the full search.
    pub fell_back: bool,
}

/// An entry in the open set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OpenEntry {
    f: ExactDistance,
    h: ExactDistance,
    g: ExactDistance,
    node: NodeId,
    slot: usize,
}

impl Ord for OpenEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: reverse so the lowest (f, h, node) pops first.
        other
            .f
            .cmp(&self.f)
            .then_with(|| other.h.cmp(&self.h))
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl PartialOrd for OpenEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Search-local state of one visited node.
#[derive(Debug, Clone, Copy)]
struct Record {
    cell: CellPos,
    node: NodeId,
    g: ExactDistance,
    parent: Option<usize>,
    closed: bool,
}

/// What ends a search.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Goal {
    Cell(CellPos),
    /// `slack` is the octile length of the farthest in-range offset.
    Within {
        target: CellPos,
        max_distance: Fixed,
        slack: ExactDistance,
    },
}

impl Goal {
    fn within(index: &SpatialIndex, target: CellPos, max_distance: Fixed) -> Self {
        Goal::Within {
            target,
            max_distance,
            slack: approach_slack(max_distance, index.width(), index.height()),
        }
    }

    fn reached(self, cell: CellPos) -> bool {
        match self {
            Goal::Cell(target) => cell == target,
            Goal::Within {
                target,
                max_distance,
                ..
            } => within(cell, target, max_distance),
        }
    }

    fn target(self) -> CellPos {
        match self {
            Goal::Cell(target) | Goal::Within { target, .. } => target,
        }
    }

    /// Lower bound on the cost from `cell` to any cell that reaches the goal.
    fn estimate(self, cell: CellPos) -> ExactDistance {
        match self {
            Goal::Cell(target) => ExactDistance::octile(cell, target),
            Goal::Within { target, slack, .. } => ExactDistance::octile(cell, target).saturating_sub(slack),
        }
    }
}

/// Integer part of `max_distance²`; negative distances count as zero.
fn squared_limit(max_distance: Fixed) -> u128 {
    let bits = u128::try_from(max_distance.to_bits()).unwrap_or(0);
    (bits * bits) >> (2 * Fixed::FRAC_NBITS)
}

/// Whole cells spanned by `max_distance` along one axis.
fn reach(max_distance: Fixed) -> u32 {
    max_distance.max(Fixed::ZERO).saturating_ceil().to_num()
}

/// Whether a cell center lies within `max_distance` of the target's.
pub(crate) fn within(cell: CellPos, target: CellPos, max_distance: Fixed) -> bool {
    u128::from(cell.distance_squared(target)) <= squared_limit(max_distance)
}

/// Largest octile distance between a target and a cell within
/// `max_distance` of it on a `width × height` grid.
fn approach_slack(max_distance: Fixed, width: u32, height: u32) -> ExactDistance {
    let limit = squared_limit(max_distance);
    let reach = reach(max_distance);
    let mut best = ExactDistance::ZERO;
    let mut dy = height.saturating_sub(1).min(reach);
    for dx in 0..=width.saturating_sub(1).min(reach) {
        let offset = |dy: u32| u128::from(dx) * u128::from(dx) + u128::from(dy) * u128::from(dy);
        while dy > 0 && offset(dy) > limit {
            dy -= 1;
        }
        if offset(dy) > limit {
            break;
        }
        best = best.max(ExactDistance::octile(CellPos::new(0, 0), CellPos::new(dx, dy)));
    }
    best
}

/// Reusable A* pathfinder.
///
/// The scratch buffers keep their capacity between searches but are emptied
/// after each one, so memory follows the largest search, not the terrain.
#[derive(Debug, Default)]
pub struct PathFinder {
    open: BinaryHeap<OpenEntry>,
    slots: HashMap<NodeId, usize>,
    records: Vec<Record>,
    pub(super) stats: SearchStats,
}

impl PathFinder {
    /// Create a pathfinder with empty scratch buffers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters from the most recent search.
    #[must_use]
    pub fn last_stats(&self) -> SearchStats {
        self.stats
    }

    /// Find a path from `source` to `target`.
    ///
    /// With `max_distance` the search stops at the first expanded cell whose
    /// center is within that distance of the target's, so the target itself
    /// need not be reachable.
    ///
    /// Returns `None` when no path exists, and `Some` of an empty path when
    /// the source already satisfies the request. Unreachable requests are
    /// rejected by the island check without expanding any node.
    pub fn find_path(
        &mut self,
        index: &SpatialIndex,
        source: CellPos,
        target: CellPos,
        max_distance: Option<Fixed>,
    ) -> Option<Path> {
        self.stats = SearchStats::default();
        let goal = self.precheck(index, source, target, max_distance)?;
        match goal {
            Ok(goal) => self.search(index, source, goal, None),
            Err(empty) => Some(empty),
        }
    }

    /// Shared early-outs. `Err` carries an immediate (empty) answer.
    pub(crate) fn precheck(
        &self,
        index: &SpatialIndex,
        source: CellPos,
        target: CellPos,
        max_distance: Option<Fixed>,
    ) -> Option<Result<Goal, Path>> {
        if !index.in_bounds(source) || !index.in_bounds(target) {
            return None;
        }
        if source == target {
            return Some(Err(Path::empty()));
        }
        match max_distance {
            None => {
                if !index.same_island(source, target) {
                    trace!(?source, ?target, "Rejected by island check");
                    return None;
                }
                Some(Ok(Goal::Cell(target)))
            }
            Some(max_distance) => {
                if within(source, target, max_distance) {
                    return Some(Err(Path::empty()));
                }
                if !island_near(index, source, target, max_distance) {
                    trace!(?source, ?target, "No cell of the source island in range");
                    return None;
                }
                Some(Ok(Goal::within(index, target, max_distance)))
            }
        }
    }

    /// Run A*, optionally restricted to cells accepted by `allowed`.
    pub(crate) fn search(
        &mut self,
        index: &SpatialIndex,
        source: CellPos,
        goal: Goal,
        allowed: Option<&dyn Fn(CellPos) -> bool>,
    ) -> Option<Path> {
        let target = goal.target();
        let start_node = index.leaf_for_cell(source);
        let h = goal.estimate(source);
        self.records.push(Record {
            cell: source,
            node: start_node,
            g: ExactDistance::ZERO,
            parent: None,
            closed: false,
        });
        self.slots.insert(start_node, 0);
        self.open.push(OpenEntry {
            f: h,
            h,
            g: ExactDistance::ZERO,
            node: start_node,
            slot: 0,
        });

        let mut found = None;
        while let Some(entry) = self.open.pop() {
            let record = self.records[entry.slot];
            if record.closed || record.g != entry.g {
                continue;
            }
            self.records[entry.slot].closed = true;
            self.stats.expanded += 1;

            if goal.reached(record.cell) {
                found = Some(entry.slot);
                break;
            }

            let leaf = index.node(record.node);
            for dir in Direction::ALL {
                if !leaf.is_connected(dir) {
                    continue;
                }
                let Some(next_cell) = record.cell.step(dir) else {
                    continue;
                };
                if allowed.is_some_and(|accept| !accept(next_cell)) {
                    continue;
                }
                let next_node = index.leaf_for_cell(next_cell);
                let g = record.g + ExactDistance::step(dir.is_diagonal());
                let slot = match self.slots.get(&next_node) {
                    Some(&slot) => {
                        let existing = &mut self.records[slot];
                        if existing.closed || existing.g <= g {
                            continue;
                        }
                        existing.g = g;
                        existing.parent = Some(entry.slot);
                        slot
                    }
                    None => {
                        let slot = self.records.len();
                        self.records.push(Record {
                            cell: next_cell,
                            node: next_node,
                            g,
                            parent: Some(entry.slot),
                            closed: false,
                        });
                        self.slots.insert(next_node, slot);
                        slot
                    }
                };
                let h = goal.estimate(next_cell);
                self.open.push(OpenEntry {
                    f: g + h,
                    h,
                    g,
                    node: next_node,
                    slot,
                });
            }
        }

        let path = found.map(|slot| self.reconstruct(slot));
        trace!(
            ?source,
            ?target,
            expanded = self.stats.expanded,
            found = path.is_some(),
            "A* search finished"
        );
        self.clear();
        path
    }

    fn reconstruct(&self, end: usize) -> Path {
        let cost = self.records[end].g;
        let mut steps = Vec::new();
        let mut current = Some(end);
        while let Some(slot) = current {
            let record = &self.records[slot];
            if record.parent.is_some() {
                steps.push(PathStep {
                    cell: record.cell,
                    node: record.node,
                });
            }
            current = record.parent;
        }
        steps.reverse();
        Path::new(steps, cost)
    }

    fn clear(&mut self) {
        self.open.clear();
        self.slots.clear();
        self.records.clear();
    }
}

/// Whether any cell within `max_distance` of the target shares the source's
/// island.
fn island_near(index: &SpatialIndex, source: CellPos, target: CellPos, max_distance: Fixed) -> bool {
    let Some(island) = index.cell_island(source) else {
        return false;
    };
    let reach = reach(max_distance);
    let x0 = target.x.saturating_sub(reach);
    let y0 = target.y.saturating_sub(reach);
    let x1 = target.x.saturating_add(reach).min(index.width() - 1);
    let y1 = target.y.saturating_add(reach).min(index.height() - 1);
    (y0..=y1).any(|y| {
        (x0..=x1).any(|x| {
            let cell = CellPos::new(x, y);
            within(cell, target, max_distance) && index.cell_island(cell) == Some(island)
        })
    })
}
