//! Hierarchical spatial index over the terrain.
//!
//! A quadtree built once per level. It answers cell-to-node lookups in
//! `O(log n)`, carries per-node bounds and height ranges for culling, stores
//! 8-direction connectivity flags, and labels every leaf with a reachability
//! island so the pathfinder can reject impossible requests in `O(1)`.
//!
//! - [`layout`] - geometry-only tree shape and the on-disk neighbor cache
//! - [`cull`] - parallel frustum culling over the tree

pub mod cull;
pub mod layout;

use std::collections::VecDeque;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::math::{Fixed, Vec3Fixed};
use crate::terrain::{CellPos, Direction, DirectionSet, Terrain};

pub use cull::{CullHit, CullOutput, CullParams, Culler, Frustum, Plane};
pub use layout::{LayoutNode, NodeId, NodeSize, TreeLayout};

/// Connected-component label of a set of leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IslandId(pub u32);

/// Axis-aligned 3D bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aabb {
    /// Minimum corner.
    pub min: Vec3Fixed,
    /// Maximum corner.
    pub max: Vec3Fixed,
}

/// A node of the built index: layout plus terrain-derived data.
#[derive(Debug, Clone)]
pub struct Node {
    layout: LayoutNode,
    min_height: Fixed,
    max_height: Fixed,
    connectivity: DirectionSet,
    island: Option<IslandId>,
}

impl Node {
    /// First covered cell.
    #[must_use]
    pub fn start(&self) -> CellPos {
        self.layout.start
    }

    /// Covered extent.
    #[must_use]
    pub fn size(&self) -> NodeSize {
        self.layout.size
    }

    /// Parent node.
    #[must_use]
    pub fn parent(&self) -> Option<NodeId> {
        self.layout.parent
    }

    /// Child nodes (empty for leaves).
    #[must_use]
    pub fn children(&self) -> &[NodeId] {
        &self.layout.children
    }

    /// Same-size neighbor in a direction.
    #[must_use]
    pub fn neighbor(&self, dir: Direction) -> Option<NodeId> {
        self.layout.neighbors[dir.index()]
    }

    /// Depth below the root.
    #[must_use]
    pub fn depth(&self) -> u16 {
        self.layout.depth
    }

    /// True for single-cell nodes.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.layout.is_leaf()
    }

    /// True when the cell lies inside this node.
    #[must_use]
    pub fn contains(&self, cell: CellPos) -> bool {
        self.layout.contains(cell)
    }

    /// Directions in which a unit can leave this node into its neighbor.
    #[must_use]
    pub fn connectivity(&self) -> DirectionSet {
        self.connectivity
    }

    /// Whether the node is connected to its neighbor in `dir`.
    #[must_use]
    pub fn is_connected(&self, dir: Direction) -> bool {
        self.connectivity.contains(dir)
    }

    /// Island shared by every covered leaf, `None` if the node spans more
    /// than one island.
    #[must_use]
    pub fn island(&self) -> Option<IslandId> {
        self.island
    }

    /// Lowest and highest terrain height inside the node.
    #[must_use]
    pub fn height_range(&self) -> (Fixed, Fixed) {
        (self.min_height, self.max_height)
    }

    /// World-space bounding box.
    #[must_use]
    pub fn bounds(&self) -> Aabb {
        let (ex, ey) = self.layout.end();
        Aabb {
            min: Vec3Fixed::new(
                Fixed::from_num(self.layout.start.x),
                Fixed::from_num(self.layout.start.y),
                self.min_height,
            ),
            max: Vec3Fixed::new(Fixed::from_num(ex), Fixed::from_num(ey), self.max_height),
        }
    }

    /// Iterate over the covered cells in row-major order.
    pub fn cells(&self) -> impl Iterator<Item = CellPos> + '_ {
        let start = self.layout.start;
        let size = self.layout.size;
        (0..size.h).flat_map(move |dy| (0..size.w).map(move |dx| CellPos::new(start.x + dx, start.y + dy)))
    }
}

/// The terrain spatial index.
#[derive(Debug, Clone)]
pub struct SpatialIndex {
    width: u32,
    height: u32,
    nodes: Vec<Node>,
    leaf_by_cell: Vec<NodeId>,
    island_count: u32,
}

impl SpatialIndex {
    /// Build the index for a terrain.
    #[must_use]
    pub fn build(terrain: &Terrain) -> Self {
        let layout = TreeLayout::build(terrain.width(), terrain.height());
        Self::from_layout(terrain, layout)
    }

    /// Build the index, reusing a cached layout from `cache_dir` when one
    /// exists for the terrain dimensions.
    ///
    /// # Errors
    ///
    /// Returns an error if a new layout cannot be written to the cache.
    pub fn build_cached(terrain: &Terrain, cache_dir: &Path) -> Result<Self> {
        let layout = TreeLayout::load_or_build(terrain.width(), terrain.height(), cache_dir)?;
        Ok(Self::from_layout(terrain, layout))
    }

    /// Combine a layout with terrain heights.
    ///
    /// # Panics
    ///
    /// Panics if the layout was built for different dimensions.
    #[must_use]
    pub fn from_layout(terrain: &Terrain, layout: TreeLayout) -> Self {
        assert_eq!(
            (layout.width(), layout.height()),
            (terrain.width(), terrain.height()),
            "layout does not match terrain dimensions"
        );

        let mut leaf_by_cell = vec![NodeId(0); terrain.cell_count()];
        let mut nodes: Vec<Node> = layout
            .nodes()
            .iter()
            .enumerate()
            .map(|(i, l)| {
                if l.is_leaf() {
                    leaf_by_cell[terrain.cell_index(l.start)] = NodeId(i as u32);
                }
                Node {
                    layout: l.clone(),
                    min_height: Fixed::MAX,
                    max_height: Fixed::MIN,
                    connectivity: DirectionSet::EMPTY,
                    island: None,
                }
            })
            .collect();

        // Leaves first: heights and connectivity straight from the terrain.
        for node in nodes.iter_mut().filter(|n| n.is_leaf()) {
            let cell = node.start();
            let heights = terrain
                .cell_heights(cell)
                .expect("layout leaf lies inside the terrain");
            node.min_height = heights.min();
            node.max_height = heights.max();
            for dir in Direction::ALL {
                if terrain.is_connected(cell, dir) {
                    node.connectivity.insert(dir);
                }
            }
        }

        let island_count = label_islands(terrain, &mut nodes, &leaf_by_cell);

        // Children always have larger ids than their parent, so a reverse
        // sweep sees every child before the parent.
        for i in (0..nodes.len()).rev() {
            if nodes[i].is_leaf() {
                continue;
            }
            let mut min_height = Fixed::MAX;
            let mut max_height = Fixed::MIN;
            let mut connectivity = DirectionSet::EMPTY;
            let mut island = None;
            let mut mixed = false;
            let parent = &nodes[i].layout;
            for &child_id in &parent.children {
                let child = &nodes[child_id.index()];
                min_height = min_height.min(child.min_height);
                max_height = max_height.max(child.max_height);
                for dir in child.connectivity.iter() {
                    if touches_side(parent, &child.layout, dir) {
                        connectivity.insert(dir);
                    }
                }
                match (island, child.island) {
                    (_, None) => mixed = true,
                    (None, Some(c)) => island = Some(c),
                    (Some(p), Some(c)) if p != c => mixed = true,
                    _ => {}
                }
            }
            let node = &mut nodes[i];
            node.min_height = min_height;
            node.max_height = max_height;
            node.connectivity = connectivity;
            node.island = if mixed { None } else { island };
        }

        debug!(
            width = terrain.width(),
            height = terrain.height(),
            nodes = nodes.len(),
            islands = island_count,
            "Built spatial index"
        );

        Self {
            width: terrain.width(),
            height: terrain.height(),
            nodes,
            leaf_by_cell,
            island_count,
        }
    }

    /// Grid width in cells.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Grid height in cells.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Root node id.
    #[must_use]
    pub const fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of reachability islands.
    #[must_use]
    pub const fn island_count(&self) -> u32 {
        self.island_count
    }

    /// Check if a cell is inside the indexed grid.
    #[must_use]
    pub fn in_bounds(&self, cell: CellPos) -> bool {
        cell.x < self.width && cell.y < self.height
    }

    /// Node data by id.
    ///
    /// # Panics
    ///
    /// Panics on an id that does not belong to this index.
    #[must_use]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    /// Leaf node covering a cell.
    ///
    /// # Panics
    ///
    /// Panics if the cell is outside the grid.
    #[must_use]
    pub fn leaf_for_cell(&self, cell: CellPos) -> NodeId {
        assert!(self.in_bounds(cell), "cell {cell:?} outside spatial index");
        self.leaf_by_cell[(cell.y as usize) * (self.width as usize) + cell.x as usize]
    }

    /// Node of a given size containing a cell, found by descending from the
    /// root. With `size == None` the leaf is returned. `None` when the cell
    /// is outside the grid or the tree has no node of that size over it.
    #[must_use]
    pub fn node_for_cell(&self, cell: CellPos, size: Option<NodeSize>) -> Option<NodeId> {
        if !self.in_bounds(cell) {
            return None;
        }
        let target = size.unwrap_or(NodeSize::CELL);
        let mut current = self.root();
        loop {
            let node = self.node(current);
            if node.size() == target {
                return Some(current);
            }
            if node.size().w < target.w || node.size().h < target.h {
                return None;
            }
            current = *node.children().iter().find(|c| self.node(**c).contains(cell))?;
        }
    }

    /// Island of a node (`None` for inner nodes spanning several islands).
    #[must_use]
    pub fn island_id(&self, id: NodeId) -> Option<IslandId> {
        self.node(id).island()
    }

    /// Island of the leaf covering a cell.
    #[must_use]
    pub fn cell_island(&self, cell: CellPos) -> Option<IslandId> {
        self.in_bounds(cell)
            .then(|| self.node(self.leaf_for_cell(cell)).island())
            .flatten()
    }

    /// Whether a path between two cells can exist at all.
    #[must_use]
    pub fn same_island(&self, a: CellPos, b: CellPos) -> bool {
        match (self.cell_island(a), self.cell_island(b)) {
            (Some(ia), Some(ib)) => ia == ib,
            _ => false,
        }
    }

    /// Leaf-level connectivity from a cell in a direction.
    #[must_use]
    pub fn cell_connected(&self, cell: CellPos, dir: Direction) -> bool {
        self.in_bounds(cell) && self.node(self.leaf_for_cell(cell)).is_connected(dir)
    }

    /// Leaves covered by a node, in row-major cell order.
    pub fn leaves_of(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.node(id).cells().map(|cell| self.leaf_for_cell(cell))
    }
}

/// True if `child` lies on `parent`'s boundary facing `dir` (both boundaries
/// for diagonals).
fn touches_side(parent: &LayoutNode, child: &LayoutNode, dir: Direction) -> bool {
    let (dx, dy) = dir.offset();
    let (pex, pey) = parent.end();
    let (cex, cey) = child.end();
    let x_ok = match dx {
        1 => cex == pex,
        -1 => child.start.x == parent.start.x,
        _ => true,
    };
    let y_ok = match dy {
        1 => cey == pey,
        -1 => child.start.y == parent.start.y,
        _ => true,
    };
    x_ok && y_ok
}

/// Flood-fill leaves into islands. Returns the island count.
fn label_islands(terrain: &Terrain, nodes: &mut [Node], leaf_by_cell: &[NodeId]) -> u32 {
    let mut next = 0u32;
    let mut queue = VecDeque::new();
    for start_index in 0..leaf_by_cell.len() {
        let start_leaf = leaf_by_cell[start_index];
        if nodes[start_leaf.index()].island.is_some() {
            continue;
        }
        let island = IslandId(next);
        next += 1;
        nodes[start_leaf.index()].island = Some(island);
        queue.push_back(terrain.cell_at_index(start_index));
        while let Some(cell) = queue.pop_front() {
            let connectivity = nodes[leaf_by_cell[terrain.cell_index(cell)].index()].connectivity;
            for dir in connectivity.iter() {
                let Some(next_cell) = terrain.neighbor(cell, dir) else {
                    continue;
                };
                let leaf = leaf_by_cell[terrain.cell_index(next_cell)];
                if nodes[leaf.index()].island.is_none() {
                    nodes[leaf.index()].island = Some(island);
                    queue.push_back(next_cell);
                }
            }
        }
    }
    next
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed(n: i32) -> Fixed {
        Fixed::from_num(n)
    }

    /// 6x4 terrain split by a raised wall at x == 2.
    fn walled() -> Terrain {
        let mut terrain = Terrain::flat(6, 4, Fixed::ZERO).unwrap();
        for y in 0..4 {
            terrain.raise_cell(CellPos::new(2, y), fixed(4)).unwrap();
        }
        terrain
    }

    #[test]
    fn test_flat_terrain_single_island() {
        let index = SpatialIndex::build(&Terrain::flat(5, 7, Fixed::ZERO).unwrap());
        assert_eq!(index.island_count(), 1);
        assert!(index.island_id(index.root()).is_some());
        assert!(index.same_island(CellPos::new(0, 0), CellPos::new(4, 6)));
    }

    #[test]
    fn test_wall_creates_three_islands() {
        let index = SpatialIndex::build(&walled());
        // West floor, the wall top, east floor.
        assert_eq!(index.island_count(), 3);
        assert!(!index.same_island(CellPos::new(0, 0), CellPos::new(5, 3)));
        assert!(index.same_island(CellPos::new(2, 0), CellPos::new(2, 3)));
        assert_eq!(index.island_id(index.root()), None);
    }

    #[test]
    fn test_node_for_cell_descends_to_leaf() {
        let index = SpatialIndex::build(&Terrain::flat(8, 8, Fixed::ZERO).unwrap());
        let cell = CellPos::new(5, 6);
        let leaf = index.node_for_cell(cell, None).unwrap();
        assert_eq!(leaf, index.leaf_for_cell(cell));
        assert_eq!(index.node(leaf).start(), cell);

        let block = index.node_for_cell(cell, Some(NodeSize::new(4, 4))).unwrap();
        assert_eq!(index.node(block).start(), CellPos::new(4, 4));
        assert!(index.node_for_cell(cell, Some(NodeSize::new(3, 3))).is_none());
        assert!(index.node_for_cell(CellPos::new(8, 0), None).is_none());
    }

    #[test]
    fn test_inner_connectivity_propagates() {
        let index = SpatialIndex::build(&walled());
        // West half covers x in 0..3, wall included.
        let root = index.node(index.root());
        let west = index.node(root.children()[0]);
        assert_eq!(west.size(), NodeSize::new(3, 4));
        // Its east column is the wall, which is cut off from the east half.
        assert!(!west.is_connected(Direction::East));
        assert!(!west.is_connected(Direction::West));

        let flat = SpatialIndex::build(&Terrain::flat(4, 4, Fixed::ZERO).unwrap());
        let sw = flat.node_for_cell(CellPos::new(0, 0), Some(NodeSize::new(2, 2))).unwrap();
        let node = flat.node(sw);
        assert!(node.is_connected(Direction::East));
        assert!(node.is_connected(Direction::NorthEast));
        assert!(!node.is_connected(Direction::SouthWest));
    }

    #[test]
    fn test_height_range_and_bounds() {
        let index = SpatialIndex::build(&walled());
        let (min, max) = index.node(index.root()).height_range();
        assert_eq!(min, Fixed::ZERO);
        assert_eq!(max, fixed(4));
        let bounds = index.node(index.root()).bounds();
        assert_eq!(bounds.max.x, fixed(6));
        assert_eq!(bounds.max.y, fixed(4));
    }

    #[test]
    fn test_layout_cache_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let terrain = walled();
        let first = SpatialIndex::build_cached(&terrain, dir.path()).unwrap();
        assert!(TreeLayout::cache_path(dir.path(), 6, 4).exists());
        let second = SpatialIndex::build_cached(&terrain, dir.path()).unwrap();
        assert_eq!(first.node_count(), second.node_count());
        assert_eq!(first.island_count(), second.island_count());
    }
}
