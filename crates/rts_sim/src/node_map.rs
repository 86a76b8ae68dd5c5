//! Object to spatial-node mapping.
//!
//! A [`BiMultiMap`] links leaf nodes and objects in both directions. On top
//! of it [`ObjectNodeMap`] turns an object's footprint into the set of
//! leaves it overlaps, using a [`FootprintPolicy`], and answers collision
//! and per-node occupancy queries.

use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;

use crate::math::{Fixed, Vec2Fixed};
use crate::objects::ObjectId;
use crate::pose::Pose;
use crate::prototype::{FootprintShape, Mobility};
use crate::spatial::{NodeId, SpatialIndex};
use crate::terrain::{CellPos, Direction};

/// Distance sample points are pulled inside a footprint or a cell so that
/// shapes which merely touch do not overlap.
const INSET: Fixed = Fixed::from_bits(1 << 16);

/// One direction of a [`BiMultiMap`]: key to a sorted bucket of values.
#[derive(Debug, Clone)]
struct Buckets<K, V> {
    slots: HashMap<K, usize>,
    buckets: Vec<Vec<V>>,
    free: Vec<usize>,
}

impl<K, V> Default for Buckets<K, V> {
    fn default() -> Self {
        Self {
            slots: HashMap::new(),
            buckets: Vec::new(),
            free: Vec::new(),
        }
    }
}

impl<K: Copy + Eq + Hash, V: Copy + Ord> Buckets<K, V> {
    fn get(&self, key: K) -> &[V] {
        self.slots
            .get(&key)
            .map_or(&[][..], |&slot| self.buckets[slot].as_slice())
    }

    fn insert(&mut self, key: K, value: V) -> bool {
        let slot = match self.slots.get(&key) {
            Some(&slot) => slot,
            None => {
                let slot = self.free.pop().unwrap_or_else(|| {
                    self.buckets.push(Vec::new());
                    self.buckets.len() - 1
                });
                self.slots.insert(key, slot);
                slot
            }
        };
        let bucket = &mut self.buckets[slot];
        match bucket.binary_search(&value) {
            Ok(_) => false,
            Err(pos) => {
                bucket.insert(pos, value);
                true
            }
        }
    }

    fn remove(&mut self, key: K, value: V) -> bool {
        let Some(&slot) = self.slots.get(&key) else {
            return false;
        };
        let bucket = &mut self.buckets[slot];
        let Ok(pos) = bucket.binary_search(&value) else {
            return false;
        };
        bucket.remove(pos);
        if bucket.is_empty() {
            // The emptied bucket keeps its capacity for the next key.
            self.slots.remove(&key);
            self.free.push(slot);
        }
        true
    }

    fn take(&mut self, key: K) -> Vec<V> {
        let Some(slot) = self.slots.remove(&key) else {
            return Vec::new();
        };
        let values = self.buckets[slot].clone();
        self.buckets[slot].clear();
        self.free.push(slot);
        values
    }
}

/// Bidirectional multimap with recycled storage buckets.
///
/// Each key owns a sorted bucket. Removing the last value of a key returns
/// its bucket to a free list instead of dropping it.
#[derive(Debug, Clone)]
pub struct BiMultiMap<A, B> {
    forward: Buckets<A, B>,
    backward: Buckets<B, A>,
}

impl<A, B> Default for BiMultiMap<A, B> {
    fn default() -> Self {
        Self {
            forward: Buckets::default(),
            backward: Buckets::default(),
        }
    }
}

impl<A: Copy + Ord + Hash, B: Copy + Ord + Hash> BiMultiMap<A, B> {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Link `a` and `b`. Returns false if they were already linked.
    pub fn insert(&mut self, a: A, b: B) -> bool {
        let added = self.forward.insert(a, b);
        if added {
            self.backward.insert(b, a);
        }
        added
    }

    /// Unlink `a` and `b`. Returns false if they were not linked.
    pub fn remove(&mut self, a: A, b: B) -> bool {
        let removed = self.forward.remove(a, b);
        if removed {
            self.backward.remove(b, a);
        }
        removed
    }

    /// Values linked to `a`, sorted.
    #[must_use]
    pub fn get_by_left(&self, a: A) -> &[B] {
        self.forward.get(a)
    }

    /// Keys linked to `b`, sorted.
    #[must_use]
    pub fn get_by_right(&self, b: B) -> &[A] {
        self.backward.get(b)
    }

    /// Drop every link of `b`, returning the keys it was linked to.
    pub fn remove_right(&mut self, b: B) -> Vec<A> {
        let keys = self.backward.take(b);
        for &a in &keys {
            self.forward.remove(a, b);
        }
        keys
    }

    /// Number of left keys with at least one link.
    #[must_use]
    pub fn left_len(&self) -> usize {
        self.forward.slots.len()
    }

    /// Number of right keys with at least one link.
    #[must_use]
    pub fn right_len(&self) -> usize {
        self.backward.slots.len()
    }

    /// Recycled buckets waiting for reuse, `(left, right)`.
    #[must_use]
    pub fn free_buckets(&self) -> (usize, usize) {
        (self.forward.free.len(), self.backward.free.len())
    }
}

/// Ground-plane footprint of an object at a pose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footprint {
    center: Vec2Fixed,
    axis: Vec2Fixed,
    shape: FootprintShape,
}

impl Footprint {
    /// Footprint of a shape at a pose.
    #[must_use]
    pub fn new(pose: &Pose, shape: FootprintShape) -> Self {
        Self {
            center: pose.position(),
            axis: pose.heading(),
            shape,
        }
    }

    /// Center point.
    #[must_use]
    pub const fn center(&self) -> Vec2Fixed {
        self.center
    }

    fn perp(&self) -> Vec2Fixed {
        Vec2Fixed::new(-self.axis.y, self.axis.x)
    }

    /// Half extents along the heading and across it.
    fn half_extents(&self) -> (Fixed, Fixed) {
        match self.shape {
            FootprintShape::Rect {
                half_length,
                half_width,
            } => (half_length, half_width),
            FootprintShape::Circle { radius } => (radius, radius),
        }
    }

    fn to_world(&self, u: Fixed, v: Fixed) -> Vec2Fixed {
        self.center + self.axis.scale(u) + self.perp().scale(v)
    }

    /// Whether a point lies strictly inside the footprint.
    #[must_use]
    pub fn contains(&self, p: Vec2Fixed) -> bool {
        let d = p - self.center;
        match self.shape {
            FootprintShape::Rect {
                half_length,
                half_width,
            } => d.dot(self.axis).abs() < half_length && d.dot(self.perp()).abs() < half_width,
            FootprintShape::Circle { radius } => d.dot(d) < radius * radius,
        }
    }

    /// World-space axis-aligned bounds.
    #[must_use]
    pub fn bounds(&self) -> (Vec2Fixed, Vec2Fixed) {
        let (hu, hv) = self.half_extents();
        let (ax, ay) = (self.axis.x.abs(), self.axis.y.abs());
        let extent = match self.shape {
            FootprintShape::Circle { radius } => Vec2Fixed::new(radius, radius),
            FootprintShape::Rect { .. } => Vec2Fixed::new(ax * hu + ay * hv, ay * hu + ax * hv),
        };
        (self.center - extent, self.center + extent)
    }

    /// Whether the footprint overlaps a cell, judged by the cell's inset
    /// corners and its center.
    fn touches_cell(&self, cell: CellPos) -> bool {
        let x0 = Fixed::from_num(cell.x);
        let y0 = Fixed::from_num(cell.y);
        let x1 = x0 + Fixed::ONE;
        let y1 = y0 + Fixed::ONE;
        [
            Vec2Fixed::new(x0 + INSET, y0 + INSET),
            Vec2Fixed::new(x1 - INSET, y0 + INSET),
            Vec2Fixed::new(x0 + INSET, y1 - INSET),
            Vec2Fixed::new(x1 - INSET, y1 - INSET),
            cell.center(),
        ]
        .into_iter()
        .any(|p| self.contains(p))
    }
}

/// Strategy that turns a footprint into covered cells.
pub trait FootprintPolicy {
    /// Cells of a `width x height` grid covered by the footprint.
    fn covered_cells(&self, footprint: &Footprint, width: u32, height: u32) -> BTreeSet<CellPos>;
}

/// Oriented footprint of ground objects.
///
/// Samples the footprint on a 1-cell lattice (edges included), then grows
/// the selection through neighbors whose corners or center fall inside, which
/// catches cells a thin diagonal sliver crosses between samples.
#[derive(Debug, Clone, Copy, Default)]
pub struct GroundFootprint;

/// Axis-aligned bounding box of the footprint, for aerial objects.
#[derive(Debug, Clone, Copy, Default)]
pub struct AxisAlignedFootprint;

fn cell_of(p: Vec2Fixed, width: u32, height: u32) -> Option<CellPos> {
    if p.x < Fixed::ZERO || p.y < Fixed::ZERO {
        return None;
    }
    let cell = CellPos::new(p.x.to_num::<u32>(), p.y.to_num::<u32>());
    (cell.x < width && cell.y < height).then_some(cell)
}

/// Sample offsets across `[-h, h]`, pulled in by [`INSET`], one unit apart.
fn axis_samples(h: Fixed) -> Vec<Fixed> {
    if h <= INSET {
        return vec![Fixed::ZERO];
    }
    let end = h - INSET;
    let mut v = -end;
    let mut out = Vec::new();
    while v < end {
        out.push(v);
        v += Fixed::ONE;
    }
    out.push(end);
    out
}

impl FootprintPolicy for GroundFootprint {
    fn covered_cells(&self, footprint: &Footprint, width: u32, height: u32) -> BTreeSet<CellPos> {
        let mut cells = BTreeSet::new();
        if let Some(cell) = cell_of(footprint.center, width, height) {
            cells.insert(cell);
        }
        let (hu, hv) = footprint.half_extents();
        let circle = matches!(footprint.shape, FootprintShape::Circle { .. });
        for &u in &axis_samples(hu) {
            for &v in &axis_samples(hv) {
                if circle && u * u + v * v >= hu * hu {
                    continue;
                }
                if let Some(cell) = cell_of(footprint.to_world(u, v), width, height) {
                    cells.insert(cell);
                }
            }
        }

        let mut pending: Vec<CellPos> = cells.iter().copied().collect();
        while let Some(cell) = pending.pop() {
            for dir in Direction::ALL {
                let Some(next) = cell.step(dir).filter(|n| n.x < width && n.y < height) else {
                    continue;
                };
                if !cells.contains(&next) && footprint.touches_cell(next) {
                    cells.insert(next);
                    pending.push(next);
                }
            }
        }
        cells
    }
}

impl FootprintPolicy for AxisAlignedFootprint {
    fn covered_cells(&self, footprint: &Footprint, width: u32, height: u32) -> BTreeSet<CellPos> {
        let (min, max) = footprint.bounds();
        let range = |lo: Fixed, hi: Fixed, limit: u32| -> Option<(u32, u32)> {
            let lo = (lo + INSET).max(Fixed::ZERO);
            let hi = hi - INSET;
            if hi < Fixed::ZERO || lo >= Fixed::from_num(limit) {
                return None;
            }
            Some((lo.to_num::<u32>(), hi.to_num::<u32>().min(limit - 1)))
        };
        let (Some((x0, x1)), Some((y0, y1))) = (range(min.x, max.x, width), range(min.y, max.y, height)) else {
            return BTreeSet::new();
        };
        (y0..=y1)
            .flat_map(|y| (x0..=x1).map(move |x| CellPos::new(x, y)))
            .collect()
    }
}

/// Footprint policy for a mobility class.
#[must_use]
pub fn policy_for(mobility: Mobility) -> &'static dyn FootprintPolicy {
    match mobility {
        Mobility::Air => &AxisAlignedFootprint,
        Mobility::Ground | Mobility::Immobile => &GroundFootprint,
    }
}

/// Leaf nodes covered by a footprint, sorted.
#[must_use]
pub fn covered_nodes(index: &SpatialIndex, footprint: &Footprint, policy: &dyn FootprintPolicy) -> Vec<NodeId> {
    let mut nodes: Vec<NodeId> = policy
        .covered_cells(footprint, index.width(), index.height())
        .into_iter()
        .map(|cell| index.leaf_for_cell(cell))
        .collect();
    nodes.sort_unstable();
    nodes
}

/// Which leaves every object covers, and which objects cover every leaf.
#[derive(Debug, Clone, Default)]
pub struct ObjectNodeMap {
    links: BiMultiMap<NodeId, ObjectId>,
}

impl ObjectNodeMap {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a new object.
    ///
    /// # Panics
    ///
    /// Panics if the object is already mapped.
    pub fn add_object(
        &mut self,
        index: &SpatialIndex,
        id: ObjectId,
        footprint: &Footprint,
        policy: &dyn FootprintPolicy,
    ) {
        assert!(!self.contains(id), "object {id:?} is already mapped");
        for node in covered_nodes(index, footprint, policy) {
            self.links.insert(node, id);
        }
    }

    /// Re-map an object after it moved. Does nothing when the covered node
    /// set is unchanged; returns whether the mapping changed.
    pub fn set_object(
        &mut self,
        index: &SpatialIndex,
        id: ObjectId,
        footprint: &Footprint,
        policy: &dyn FootprintPolicy,
    ) -> bool {
        let nodes = covered_nodes(index, footprint, policy);
        if self.links.get_by_right(id) == nodes.as_slice() {
            return false;
        }
        self.links.remove_right(id);
        for node in nodes {
            self.links.insert(node, id);
        }
        true
    }

    /// Drop every mapping of an object. Returns false if it had none.
    pub fn remove_object(&mut self, id: ObjectId) -> bool {
        !self.links.remove_right(id).is_empty()
    }

    /// Whether the object is mapped to any node.
    #[must_use]
    pub fn contains(&self, id: ObjectId) -> bool {
        !self.links.get_by_right(id).is_empty()
    }

    /// Nodes covered by an object, sorted.
    #[must_use]
    pub fn nodes_of(&self, id: ObjectId) -> &[NodeId] {
        self.links.get_by_right(id)
    }

    /// Objects covering a node, sorted by id.
    #[must_use]
    pub fn objects_in_node(&self, node: NodeId) -> &[ObjectId] {
        self.links.get_by_left(node)
    }

    /// Whether another object accepted by `obstacle` shares a node with `id`.
    #[must_use]
    pub fn is_colliding(&self, id: ObjectId, obstacle: impl Fn(ObjectId) -> bool) -> bool {
        self.nodes_of(id).iter().any(|&node| {
            self.objects_in_node(node)
                .iter()
                .any(|&other| other != id && obstacle(other))
        })
    }

    /// Every other object sharing a node with `id`, sorted and deduplicated.
    #[must_use]
    pub fn overlapping(&self, id: ObjectId) -> Vec<ObjectId> {
        let others: BTreeSet<ObjectId> = self
            .nodes_of(id)
            .iter()
            .flat_map(|&node| self.objects_in_node(node).iter().copied())
            .filter(|&other| other != id)
            .collect();
        others.into_iter().collect()
    }

    /// Number of mapped objects.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.links.right_len()
    }

    /// The underlying link table.
    #[must_use]
    pub fn links(&self) -> &BiMultiMap<NodeId, ObjectId> {
        &self.links
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::FRAC_PI_2;
    use crate::terrain::Terrain;

    fn fixed(v: f64) -> Fixed {
        Fixed::from_num(v)
    }

    fn footprint_at(terrain: &Terrain, x: f64, y: f64, yaw: Fixed, shape: FootprintShape) -> Footprint {
        let pose = Pose::on_terrain(terrain, Vec2Fixed::new(fixed(x), fixed(y)), yaw);
        Footprint::new(&pose, shape)
    }

    fn rect(l: f64, w: f64) -> FootprintShape {
        FootprintShape::Rect {
            half_length: fixed(l),
            half_width: fixed(w),
        }
    }

    #[test]
    fn test_bimultimap_recycles_buckets() {
        let mut map: BiMultiMap<u32, u32> = BiMultiMap::new();
        assert!(map.insert(1, 10));
        assert!(map.insert(1, 11));
        assert!(!map.insert(1, 10));
        assert_eq!(map.get_by_left(1), &[10, 11]);
        assert!(map.remove(1, 10));
        assert!(map.remove(1, 11));
        assert_eq!(map.left_len(), 0);
        assert_eq!(map.free_buckets(), (1, 2));
        map.insert(2, 12);
        assert_eq!(map.free_buckets(), (0, 1));
        assert_eq!(map.get_by_right(12), &[2]);
    }

    #[test]
    fn test_small_footprint_single_cell() {
        let terrain = Terrain::flat(6, 6, Fixed::ZERO).unwrap();
        let fp = footprint_at(&terrain, 2.5, 2.5, Fixed::ZERO, rect(0.45, 0.3));
        let cells = GroundFootprint.covered_cells(&fp, 6, 6);
        assert_eq!(cells.into_iter().collect::<Vec<_>>(), vec![CellPos::new(2, 2)]);
    }

    #[test]
    fn test_exact_cell_size_does_not_leak() {
        let terrain = Terrain::flat(6, 6, Fixed::ZERO).unwrap();
        let fp = footprint_at(&terrain, 2.5, 2.5, Fixed::ZERO, rect(0.5, 0.5));
        assert_eq!(GroundFootprint.covered_cells(&fp, 6, 6).len(), 1);
        assert_eq!(AxisAlignedFootprint.covered_cells(&fp, 6, 6).len(), 1);
    }

    #[test]
    fn test_long_rect_covers_its_length() {
        let terrain = Terrain::flat(10, 10, Fixed::ZERO).unwrap();
        let fp = footprint_at(&terrain, 5.5, 5.5, FRAC_PI_2, rect(2.0, 0.2));
        let cells = GroundFootprint.covered_cells(&fp, 10, 10);
        let expected: BTreeSet<CellPos> = (3..=7).map(|y| CellPos::new(5, y)).collect();
        assert_eq!(cells, expected);
    }

    #[test]
    fn test_diagonal_rect_completion() {
        let terrain = Terrain::flat(10, 10, Fixed::ZERO).unwrap();
        let yaw = crate::math::PI / Fixed::from_num(4);
        let fp = footprint_at(&terrain, 5.0, 5.0, yaw, rect(1.5, 0.2));
        let cells = GroundFootprint.covered_cells(&fp, 10, 10);
        // Every cell whose center is inside must be covered.
        for y in 0..10 {
            for x in 0..10 {
                let cell = CellPos::new(x, y);
                if fp.contains(cell.center()) {
                    assert!(cells.contains(&cell), "{cell:?}");
                }
            }
        }
        assert!(cells.contains(&CellPos::new(4, 4)));
        assert!(cells.contains(&CellPos::new(5, 5)));
    }

    #[test]
    fn test_circle_clipped_at_edges() {
        let terrain = Terrain::flat(4, 4, Fixed::ZERO).unwrap();
        let fp = footprint_at(&terrain, 0.5, 0.5, Fixed::ZERO, FootprintShape::Circle { radius: fixed(0.9) });
        let cells = GroundFootprint.covered_cells(&fp, 4, 4);
        assert!(cells.contains(&CellPos::new(0, 0)));
        assert!(cells.contains(&CellPos::new(1, 0)));
        assert!(cells.contains(&CellPos::new(0, 1)));
        assert!(cells.iter().all(|c| c.x < 2 && c.y < 2));
    }

    #[test]
    fn test_axis_aligned_covers_rotated_bounds() {
        let terrain = Terrain::flat(10, 10, Fixed::ZERO).unwrap();
        let yaw = crate::math::PI / Fixed::from_num(4);
        let fp = footprint_at(&terrain, 5.0, 5.0, yaw, rect(1.0, 1.0));
        let cells = AxisAlignedFootprint.covered_cells(&fp, 10, 10);
        // Bounds are 5 ± √2.
        assert_eq!(cells.len(), 16);
        assert!(cells.contains(&CellPos::new(3, 3)));
        assert!(cells.contains(&CellPos::new(6, 6)));
    }

    #[test]
    fn test_collision_and_removal() {
        let terrain = Terrain::flat(8, 8, Fixed::ZERO).unwrap();
        let index = SpatialIndex::build(&terrain);
        let shape = rect(0.4, 0.4);
        let mut map = ObjectNodeMap::new();
        let a = ObjectId(1);
        let b = ObjectId(2);
        map.add_object(&index, a, &footprint_at(&terrain, 1.5, 1.5, Fixed::ZERO, shape), &GroundFootprint);
        map.add_object(&index, b, &footprint_at(&terrain, 3.5, 1.5, Fixed::ZERO, shape), &GroundFootprint);
        assert!(!map.is_colliding(a, |_| true));

        let moved = footprint_at(&terrain, 3.3, 1.5, Fixed::ZERO, shape);
        assert!(map.set_object(&index, a, &moved, &GroundFootprint));
        assert!(!map.set_object(&index, a, &moved, &GroundFootprint));
        assert!(map.is_colliding(a, |_| true));
        assert!(!map.is_colliding(a, |other| other != b));
        assert_eq!(map.overlapping(a), vec![b]);

        assert!(map.remove_object(b));
        assert!(!map.is_colliding(a, |_| true));
        let leaf = index.leaf_for_cell(CellPos::new(3, 1));
        assert_eq!(map.objects_in_node(leaf), &[a]);
        assert!(!map.remove_object(b));
        assert_eq!(map.object_count(), 1);
    }
}
