//! Two-level search for long paths.
//!
//! The grid is partitioned into square blocks. A coarse A* over blocks finds
//! a corridor, the leaf search is then confined to the corridor plus one
//! block of slack around it. If the confined search fails (coarse block
//! links are optimistic) the unrestricted search runs instead, so a path is
//! found whenever one exists.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use tracing::trace;

use super::astar::Goal;
use super::{ExactDistance, Path, PathFinder};
use crate::math::Fixed;
use crate::spatial::SpatialIndex;
use crate::terrain::{CellPos, Direction};

/// Block coordinates.
type Block = (u32, u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CoarseEntry {
    f: ExactDistance,
    block: Block,
}

impl Ord for CoarseEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other.f.cmp(&self.f).then_with(|| other.block.cmp(&self.block))
    }
}

impl PartialOrd for CoarseEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct BlockGrid<'a> {
    index: &'a SpatialIndex,
    size: u32,
    columns: u32,
    rows: u32,
}

impl BlockGrid<'_> {
    fn block_of(&self, cell: CellPos) -> Block {
        (cell.x / self.size, cell.y / self.size)
    }

    fn cells(&self, block: Block) -> impl Iterator<Item = CellPos> + '_ {
        let x0 = block.0 * self.size;
        let y0 = block.1 * self.size;
        let x1 = (x0 + self.size).min(self.index.width());
        let y1 = (y0 + self.size).min(self.index.height());
        (y0..y1).flat_map(move |y| (x0..x1).map(move |x| CellPos::new(x, y)))
    }

    fn neighbor(&self, block: Block, dir: Direction) -> Option<Block> {
        let (dx, dy) = dir.offset();
        let x = block.0.checked_add_signed(dx)?;
        let y = block.1.checked_add_signed(dy)?;
        (x < self.columns && y < self.rows).then_some((x, y))
    }

    /// Whether some leaf in `from` steps directly into `to`.
    fn linked(&self, from: Block, to: Block) -> bool {
        self.cells(from).any(|cell| {
            Direction::ALL.into_iter().any(|dir| {
                self.index.cell_connected(cell, dir)
                    && cell.step(dir).is_some_and(|next| self.block_of(next) == to)
            })
        })
    }
}

impl PathFinder {
    /// Find a path using a coarse block search to narrow the leaf search.
    ///
    /// Same contract as [`PathFinder::find_path`]; only the amount of work
    /// differs. `block_size` is the block edge length in cells.
    ///
    /// # Panics
    ///
    /// Panics if `block_size` is zero.
    pub fn find_path_hierarchical(
        &mut self,
        index: &SpatialIndex,
        source: CellPos,
        target: CellPos,
        max_distance: Option<Fixed>,
        block_size: u32,
    ) -> Option<Path> {
        assert!(block_size > 0, "block size must be positive");
        self.stats = Default::default();
        let goal = match self.precheck(index, source, target, max_distance)? {
            Ok(goal) => goal,
            Err(empty) => return Some(empty),
        };

        let grid = BlockGrid {
            index,
            size: block_size,
            columns: index.width().div_ceil(block_size),
            rows: index.height().div_ceil(block_size),
        };
        let (corridor, coarse_expanded) = coarse_corridor(&grid, source, target);
        self.stats.coarse_expanded = coarse_expanded;

        if let Some(corridor) = corridor {
            let allowed: &dyn Fn(CellPos) -> bool = &|cell| corridor.contains(&grid.block_of(cell));
            let restricted = self.search(index, source, goal, Some(allowed));
            if restricted.is_some() {
                return restricted;
            }
        }

        trace!(?source, ?target, "Corridor search failed, running full search");
        let coarse = self.stats.coarse_expanded;
        self.stats = Default::default();
        self.stats.coarse_expanded = coarse;
        self.stats.fell_back = true;
        self.search(index, source, goal, None)
    }
}

/// Coarse A* from the source block to the target block. Returns the corridor
/// (path blocks plus their neighbors) and the number of expanded blocks.
fn coarse_corridor(grid: &BlockGrid<'_>, source: CellPos, target: CellPos) -> (Option<HashSet<Block>>, usize) {
    let start = grid.block_of(source);
    let end = grid.block_of(target);
    let heuristic = |b: Block| ExactDistance::octile(CellPos::new(b.0, b.1), CellPos::new(end.0, end.1));

    let mut open = BinaryHeap::new();
    let mut came_from: HashMap<Block, Block> = HashMap::new();
    let mut g_score: HashMap<Block, ExactDistance> = HashMap::new();
    let mut closed: HashSet<Block> = HashSet::new();
    g_score.insert(start, ExactDistance::ZERO);
    open.push(CoarseEntry {
        f: heuristic(start),
        block: start,
    });

    let mut expanded = 0;
    while let Some(current) = open.pop() {
        if !closed.insert(current.block) {
            continue;
        }
        expanded += 1;
        if current.block == end {
            let mut corridor = HashSet::new();
            let mut block = Some(end);
            while let Some(b) = block {
                corridor.insert(b);
                for dir in Direction::ALL {
                    if let Some(n) = grid.neighbor(b, dir) {
                        corridor.insert(n);
                    }
                }
                block = came_from.get(&b).copied();
            }
            return (Some(corridor), expanded);
        }

        let current_g = g_score[&current.block];
        for dir in Direction::ALL {
            let Some(next) = grid.neighbor(current.block, dir) else {
                continue;
            };
            if closed.contains(&next) || !grid.linked(current.block, next) {
                continue;
            }
            let tentative = current_g + ExactDistance::step(dir.is_diagonal());
            if g_score.get(&next).map_or(true, |g| tentative < *g) {
                came_from.insert(next, current.block);
                g_score.insert(next, tentative);
                open.push(CoarseEntry {
                    f: tentative + heuristic(next),
                    block: next,
                });
            }
        }
    }
    (None, expanded)
}
