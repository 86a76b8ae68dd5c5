//! Geometry-only quadtree layout.
//!
//! The layout depends on nothing but the terrain dimensions: node ranges,
//! parent/child links and same-size neighbor links. That makes it safe to
//! cache on disk keyed by `width x height` and reuse across every level with
//! those dimensions.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{GameError, Result};
use crate::terrain::{CellPos, Direction};

/// Bumped whenever the on-disk layout format changes.
pub const LAYOUT_CACHE_VERSION: u32 = 1;

/// Identifier of a spatial index node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Position in the node arrays.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Extent of a node in cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeSize {
    /// Width in cells.
    pub w: u32,
    /// Height in cells.
    pub h: u32,
}

impl NodeSize {
    /// Create a node size.
    #[must_use]
    pub const fn new(w: u32, h: u32) -> Self {
        Self { w, h }
    }

    /// Size of a single cell.
    pub const CELL: Self = Self { w: 1, h: 1 };

    /// Number of covered cells.
    #[must_use]
    pub const fn area(self) -> u64 {
        self.w as u64 * self.h as u64
    }
}

/// Geometry of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutNode {
    /// First (south-west) covered cell.
    pub start: CellPos,
    /// Covered extent.
    pub size: NodeSize,
    /// Parent node, `None` for the root.
    pub parent: Option<NodeId>,
    /// Up to four children; empty for leaves.
    pub children: Vec<NodeId>,
    /// Same-size neighbors, indexed by [`Direction::index`].
    pub neighbors: [Option<NodeId>; 8],
    /// Distance from the root.
    pub depth: u16,
}

impl LayoutNode {
    /// True when the node covers exactly one cell.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// True when the node's range contains the cell.
    #[must_use]
    pub fn contains(&self, cell: CellPos) -> bool {
        cell.x >= self.start.x
            && cell.y >= self.start.y
            && cell.x - self.start.x < self.size.w
            && cell.y - self.start.y < self.size.h
    }

    /// Exclusive end cell coordinates.
    #[must_use]
    pub fn end(&self) -> (u32, u32) {
        (self.start.x + self.size.w, self.start.y + self.size.h)
    }
}

/// Quadtree layout over a `width x height` cell grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeLayout {
    width: u32,
    height: u32,
    nodes: Vec<LayoutNode>,
}

#[derive(Serialize, Deserialize)]
struct LayoutCacheFile {
    version: u32,
    layout: TreeLayout,
}

impl TreeLayout {
    /// Build the layout for a grid.
    ///
    /// Regions are split until they cover one cell: a non-square region is
    /// bisected along its longer axis, a square one is split 2x2. Node ids
    /// are assigned in depth-first pre-order, so every parent id is smaller
    /// than its children's ids.
    ///
    /// # Panics
    ///
    /// Panics if either dimension is zero.
    #[must_use]
    pub fn build(width: u32, height: u32) -> Self {
        assert!(width > 0 && height > 0, "layout dimensions must be positive");

        let mut nodes = Vec::new();
        let mut stack = vec![(CellPos::new(0, 0), NodeSize::new(width, height), None, 0u16)];
        while let Some((start, size, parent, depth)) = stack.pop() {
            let id = NodeId(nodes.len() as u32);
            nodes.push(LayoutNode {
                start,
                size,
                parent,
                children: Vec::new(),
                neighbors: [None; 8],
                depth,
            });
            if let Some(parent) = parent {
                nodes[parent.index()].children.push(id);
            }
            // Reverse so the first child is popped (and numbered) first.
            for (child_start, child_size) in split_region(start, size).into_iter().rev() {
                stack.push((child_start, child_size, Some(id), depth + 1));
            }
        }

        let location: HashMap<(CellPos, NodeSize), NodeId> = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| ((n.start, n.size), NodeId(i as u32)))
            .collect();

        for node in &mut nodes {
            for dir in Direction::ALL {
                let (dx, dy) = dir.offset();
                let target = node
                    .start
                    .offset(dx * node.size.w as i32, dy * node.size.h as i32);
                node.neighbors[dir.index()] =
                    target.and_then(|start| location.get(&(start, node.size)).copied());
            }
        }

        debug!(width, height, nodes = nodes.len(), "Built spatial layout");
        Self {
            width,
            height,
            nodes,
        }
    }

    /// Load the layout for a grid from `dir`, building and writing it if the
    /// cache file is missing or unusable.
    ///
    /// # Errors
    ///
    /// Returns an error only if a freshly built layout cannot be written.
    pub fn load_or_build(width: u32, height: u32, dir: &Path) -> Result<Self> {
        let path = Self::cache_path(dir, width, height);
        if path.exists() {
            match Self::read_cache(&path) {
                Ok(layout) if layout.width == width && layout.height == height => {
                    debug!(path = %path.display(), "Loaded cached spatial layout");
                    return Ok(layout);
                }
                Ok(_) => warn!(path = %path.display(), "Layout cache has wrong dimensions, rebuilding"),
                Err(e) => warn!(path = %path.display(), error = %e, "Layout cache unreadable, rebuilding"),
            }
        }
        let layout = Self::build(width, height);
        layout.write_cache(&path)?;
        Ok(layout)
    }

    /// Cache file location for a grid size.
    #[must_use]
    pub fn cache_path(dir: &Path, width: u32, height: u32) -> PathBuf {
        dir.join(format!("spatial_layout_{width}x{height}.bin"))
    }

    fn read_cache(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|source| GameError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let file: LayoutCacheFile = bincode::deserialize(&bytes)
            .map_err(|e| GameError::Serialization(format!("layout cache: {e}")))?;
        if file.version != LAYOUT_CACHE_VERSION {
            return Err(GameError::Serialization(format!(
                "layout cache version {} (expected {LAYOUT_CACHE_VERSION})",
                file.version
            )));
        }
        Ok(file.layout)
    }

    fn write_cache(&self, path: &Path) -> Result<()> {
        let file = LayoutCacheFile {
            version: LAYOUT_CACHE_VERSION,
            layout: self.clone(),
        };
        let bytes = bincode::serialize(&file)
            .map_err(|e| GameError::Serialization(format!("layout cache: {e}")))?;
        std::fs::write(path, bytes).map_err(|source| GameError::Io {
            path: path.display().to_string(),
            source,
        })
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

    /// All nodes, indexed by [`NodeId::index`].
    #[must_use]
    pub fn nodes(&self) -> &[LayoutNode] {
        &self.nodes
    }
}

/// Split a region into its children.
fn split_region(start: CellPos, size: NodeSize) -> Vec<(CellPos, NodeSize)> {
    let NodeSize { w, h } = size;
    if w == 1 && h == 1 {
        return Vec::new();
    }
    if w > h {
        let a = w.div_ceil(2);
        return vec![
            (start, NodeSize::new(a, h)),
            (CellPos::new(start.x + a, start.y), NodeSize::new(w - a, h)),
        ];
    }
    if h > w {
        let a = h.div_ceil(2);
        return vec![
            (start, NodeSize::new(w, a)),
            (CellPos::new(start.x, start.y + a), NodeSize::new(w, h - a)),
        ];
    }
    let a = w.div_ceil(2);
    let b = w - a;
    vec![
        (start, NodeSize::new(a, a)),
        (CellPos::new(start.x + a, start.y), NodeSize::new(b, a)),
        (CellPos::new(start.x, start.y + a), NodeSize::new(a, b)),
        (CellPos::new(start.x + a, start.y + a), NodeSize::new(b, b)),
    ]
}
