//! Heightfield terrain.
//!
//! The terrain is a rectangular grid of unit cells. Every cell stores its
//! own four corner heights, so two neighboring cells may disagree on a shared
//! edge: that disagreement is a cliff and blocks movement across the edge.
//! `y` grows towards north.

use serde::{Deserialize, Serialize};

use crate::error::{GameError, Result};
use crate::math::{fixed_serde, Fixed, Vec2Fixed};

/// Integer cell coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct CellPos {
    /// Column.
    pub x: u32,
    /// Row.
    pub y: u32,
}

impl CellPos {
    /// Create a new cell position.
    #[must_use]
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    /// Offset by a signed delta; `None` when the result would be negative.
    #[must_use]
    pub fn offset(self, dx: i32, dy: i32) -> Option<Self> {
        Some(Self {
            x: self.x.checked_add_signed(dx)?,
            y: self.y.checked_add_signed(dy)?,
        })
    }

    /// Neighbor in a direction (no bounds check against the terrain).
    #[must_use]
    pub fn step(self, dir: Direction) -> Option<Self> {
        let (dx, dy) = dir.offset();
        self.offset(dx, dy)
    }

    /// World position of the cell center.
    #[must_use]
    pub fn center(self) -> Vec2Fixed {
        let half = Fixed::ONE / Fixed::from_num(2);
        Vec2Fixed::new(
            Fixed::from_num(self.x) + half,
            Fixed::from_num(self.y) + half,
        )
    }

    /// Squared distance between cell centers, in cells.
    #[must_use]
    pub fn distance_squared(self, other: Self) -> u64 {
        let dx = u64::from(self.x.abs_diff(other.x));
        let dy = u64::from(self.y.abs_diff(other.y));
        dx * dx + dy * dy
    }
}

/// One of the eight grid directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Direction {
    /// +x
    East,
    /// +x +y
    NorthEast,
    /// +y
    North,
    /// -x +y
    NorthWest,
    /// -x
    West,
    /// -x -y
    SouthWest,
    /// -y
    South,
    /// +x -y
    SouthEast,
}

impl Direction {
    /// All directions in index order.
    pub const ALL: [Direction; 8] = [
        Direction::East,
        Direction::NorthEast,
        Direction::North,
        Direction::NorthWest,
        Direction::West,
        Direction::SouthWest,
        Direction::South,
        Direction::SouthEast,
    ];

    /// Index in `0..8`, used for direction-indexed arrays.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Unit cell offset.
    #[must_use]
    pub const fn offset(self) -> (i32, i32) {
        match self {
            Direction::East => (1, 0),
            Direction::NorthEast => (1, 1),
            Direction::North => (0, 1),
            Direction::NorthWest => (-1, 1),
            Direction::West => (-1, 0),
            Direction::SouthWest => (-1, -1),
            Direction::South => (0, -1),
            Direction::SouthEast => (1, -1),
        }
    }

    /// Direction for a unit offset.
    #[must_use]
    pub fn from_offset(dx: i32, dy: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.offset() == (dx, dy))
    }

    /// True for the four diagonal directions.
    #[must_use]
    pub const fn is_diagonal(self) -> bool {
        let (dx, dy) = self.offset();
        dx != 0 && dy != 0
    }

    /// The opposite direction.
    #[must_use]
    pub const fn opposite(self) -> Self {
        Self::ALL[(self as usize + 4) % 8]
    }

    /// The two orthogonal components of a diagonal (horizontal first).
    #[must_use]
    pub fn components(self) -> Option<(Direction, Direction)> {
        let (dx, dy) = self.offset();
        if dx == 0 || dy == 0 {
            return None;
        }
        Some((Self::from_offset(dx, 0)?, Self::from_offset(0, dy)?))
    }
}

/// A set of directions packed into a byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DirectionSet(u8);

impl DirectionSet {
    /// The empty set.
    pub const EMPTY: Self = Self(0);

    /// Add a direction.
    pub fn insert(&mut self, dir: Direction) {
        self.0 |= 1 << dir.index();
    }

    /// Membership test.
    #[must_use]
    pub const fn contains(self, dir: Direction) -> bool {
        self.0 & (1 << dir.index()) != 0
    }

    /// True when no direction is set.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterate over contained directions in index order.
    pub fn iter(self) -> impl Iterator<Item = Direction> {
        Direction::ALL.into_iter().filter(move |d| self.contains(*d))
    }
}

/// Corner heights of a single cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CellHeights {
    /// South-west corner (min x, min y).
    #[serde(with = "fixed_serde")]
    pub sw: Fixed,
    /// South-east corner (max x, min y).
    #[serde(with = "fixed_serde")]
    pub se: Fixed,
    /// North-west corner (min x, max y).
    #[serde(with = "fixed_serde")]
    pub nw: Fixed,
    /// North-east corner (max x, max y).
    #[serde(with = "fixed_serde")]
    pub ne: Fixed,
}

impl CellHeights {
    /// All four corners at the same height.
    #[must_use]
    pub const fn flat(height: Fixed) -> Self {
        Self {
            sw: height,
            se: height,
            nw: height,
            ne: height,
        }
    }

    /// Corner by sign of its offset from the cell center (`-1` or `1`).
    #[must_use]
    pub const fn corner(&self, sx: i32, sy: i32) -> Fixed {
        match (sx > 0, sy > 0) {
            (false, false) => self.sw,
            (true, false) => self.se,
            (false, true) => self.nw,
            (true, true) => self.ne,
        }
    }

    /// Lowest corner.
    #[must_use]
    pub fn min(&self) -> Fixed {
        self.sw.min(self.se).min(self.nw.min(self.ne))
    }

    /// Highest corner.
    #[must_use]
    pub fn max(&self) -> Fixed {
        self.sw.max(self.se).max(self.nw.max(self.ne))
    }
}

/// Rectangular heightfield terrain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Terrain {
    width: u32,
    height: u32,
    cells: Vec<CellHeights>,
}

impl Terrain {
    /// A flat terrain at the given height.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::InvalidTerrain`] if either dimension is zero.
    pub fn flat(width: u32, height: u32, level: Fixed) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(GameError::InvalidTerrain(format!(
                "dimensions must be positive, got {width}x{height}"
            )));
        }
        Ok(Self {
            width,
            height,
            cells: vec![CellHeights::flat(level); (width as usize) * (height as usize)],
        })
    }

    /// A continuous terrain from shared vertex heights.
    ///
    /// `vertices` holds `(width + 1) * (height + 1)` values in row-major
    /// order; neighboring cells read the same vertices, so no cliffs exist.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::InvalidTerrain`] on zero dimensions or a
    /// mismatched vertex count.
    pub fn from_vertex_heights(width: u32, height: u32, vertices: &[Fixed]) -> Result<Self> {
        let mut terrain = Self::flat(width, height, Fixed::ZERO)?;
        let stride = width as usize + 1;
        let expected = stride * (height as usize + 1);
        if vertices.len() != expected {
            return Err(GameError::InvalidTerrain(format!(
                "expected {expected} vertex heights, got {}",
                vertices.len()
            )));
        }
        for y in 0..height as usize {
            for x in 0..width as usize {
                let idx = y * width as usize + x;
                terrain.cells[idx] = CellHeights {
                    sw: vertices[y * stride + x],
                    se: vertices[y * stride + x + 1],
                    nw: vertices[(y + 1) * stride + x],
                    ne: vertices[(y + 1) * stride + x + 1],
                };
            }
        }
        Ok(terrain)
    }

    /// Width in cells.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Height (row count) in cells.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Number of cells.
    #[must_use]
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Check if a cell is inside the terrain.
    #[must_use]
    pub fn in_bounds(&self, cell: CellPos) -> bool {
        cell.x < self.width && cell.y < self.height
    }

    /// Row-major index of an in-bounds cell.
    #[inline]
    #[must_use]
    pub fn cell_index(&self, cell: CellPos) -> usize {
        (cell.y as usize) * (self.width as usize) + (cell.x as usize)
    }

    /// Cell for a row-major index.
    #[must_use]
    pub fn cell_at_index(&self, index: usize) -> CellPos {
        let w = self.width as usize;
        CellPos::new((index % w) as u32, (index / w) as u32)
    }

    /// Validate a cell against the bounds.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::CellOutOfBounds`] for cells outside the grid.
    pub fn check_cell(&self, cell: CellPos) -> Result<()> {
        if self.in_bounds(cell) {
            Ok(())
        } else {
            Err(GameError::CellOutOfBounds {
                x: i64::from(cell.x),
                y: i64::from(cell.y),
                width: self.width,
                height: self.height,
            })
        }
    }

    /// Corner heights of a cell. `None` when out of bounds.
    #[must_use]
    pub fn cell_heights(&self, cell: CellPos) -> Option<CellHeights> {
        self.in_bounds(cell).then(|| self.cells[self.cell_index(cell)])
    }

    /// Overwrite the corner heights of a cell.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::CellOutOfBounds`] for cells outside the grid.
    pub fn set_cell_heights(&mut self, cell: CellPos, heights: CellHeights) -> Result<()> {
        self.check_cell(cell)?;
        let idx = self.cell_index(cell);
        self.cells[idx] = heights;
        Ok(())
    }

    /// Set all four corners of a cell to one height, detaching it from any
    /// neighbor at a different height.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::CellOutOfBounds`] for cells outside the grid.
    pub fn raise_cell(&mut self, cell: CellPos, level: Fixed) -> Result<()> {
        self.set_cell_heights(cell, CellHeights::flat(level))
    }

    /// In-bounds neighbor of a cell.
    #[must_use]
    pub fn neighbor(&self, cell: CellPos, dir: Direction) -> Option<CellPos> {
        cell.step(dir).filter(|n| self.in_bounds(*n))
    }

    /// Whether a unit can cross from `cell` into its neighbor in `dir`.
    ///
    /// Orthogonal neighbors connect iff both corners of the shared edge are
    /// bit-identical. Diagonal neighbors additionally need the shared corner
    /// to match and all four orthogonal links around that corner to hold, so
    /// no move ever cuts past a cliff.
    #[must_use]
    pub fn is_connected(&self, cell: CellPos, dir: Direction) -> bool {
        let Some(other) = self.neighbor(cell, dir) else {
            return false;
        };
        match dir.components() {
            None => self.edge_matches(cell, other, dir),
            Some((horizontal, vertical)) => {
                let (dx, dy) = dir.offset();
                let a = self.cells[self.cell_index(cell)];
                let b = self.cells[self.cell_index(other)];
                if a.corner(dx, dy) != b.corner(-dx, -dy) {
                    return false;
                }
                let (Some(side_h), Some(side_v)) =
                    (self.neighbor(cell, horizontal), self.neighbor(cell, vertical))
                else {
                    return false;
                };
                self.edge_matches(cell, side_h, horizontal)
                    && self.edge_matches(cell, side_v, vertical)
                    && self.edge_matches(side_h, other, vertical)
                    && self.edge_matches(side_v, other, horizontal)
            }
        }
    }

    fn edge_matches(&self, a: CellPos, b: CellPos, dir: Direction) -> bool {
        let ha = self.cells[self.cell_index(a)];
        let hb = self.cells[self.cell_index(b)];
        let (dx, dy) = dir.offset();
        [-1, 1].into_iter().all(|s| {
            if dx != 0 {
                ha.corner(dx, s) == hb.corner(-dx, s)
            } else {
                ha.corner(s, dy) == hb.corner(s, -dy)
            }
        })
    }

    /// Cell containing a world position. `None` outside the terrain.
    #[must_use]
    pub fn cell_at(&self, pos: Vec2Fixed) -> Option<CellPos> {
        if pos.x < Fixed::ZERO || pos.y < Fixed::ZERO {
            return None;
        }
        let cell = CellPos::new(pos.x.to_num::<u32>(), pos.y.to_num::<u32>());
        self.in_bounds(cell).then_some(cell)
    }

    /// Cell containing a position, clamped into the grid.
    #[must_use]
    pub fn clamped_cell_at(&self, pos: Vec2Fixed) -> CellPos {
        let clamp = |v: Fixed, max: u32| -> u32 {
            if v < Fixed::ZERO {
                0
            } else {
                v.to_num::<u32>().min(max - 1)
            }
        };
        CellPos::new(clamp(pos.x, self.width), clamp(pos.y, self.height))
    }

    /// Bilinearly interpolated surface height at a world position.
    #[must_use]
    pub fn height_at(&self, pos: Vec2Fixed) -> Fixed {
        let (heights, u, v) = self.local_coords(pos);
        let south = heights.sw + (heights.se - heights.sw) * u;
        let north = heights.nw + (heights.ne - heights.nw) * u;
        south + (north - south) * v
    }

    /// Surface gradient `(dh/dx, dh/dy)` at a world position.
    #[must_use]
    pub fn gradient_at(&self, pos: Vec2Fixed) -> Vec2Fixed {
        let (h, u, v) = self.local_coords(pos);
        let one = Fixed::ONE;
        let dx = (h.se - h.sw) * (one - v) + (h.ne - h.nw) * v;
        let dy = (h.nw - h.sw) * (one - u) + (h.ne - h.se) * u;
        Vec2Fixed::new(dx, dy)
    }

    fn local_coords(&self, pos: Vec2Fixed) -> (CellHeights, Fixed, Fixed) {
        let cell = self.clamped_cell_at(pos);
        let heights = self.cells[self.cell_index(cell)];
        let clamp01 = |v: Fixed| v.max(Fixed::ZERO).min(Fixed::ONE);
        let u = clamp01(pos.x - Fixed::from_num(cell.x));
        let v = clamp01(pos.y - Fixed::from_num(cell.y));
        (heights, u, v)
    }
}
