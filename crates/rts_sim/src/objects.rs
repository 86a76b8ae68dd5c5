//! Authoritative game object table.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::fight::FightIndex;
use crate::pose::Pose;
use crate::prototype::TypeIndex;

/// Unique identifier for a game object.
///
/// Ids are handed out in increasing order and never reused within a
/// session: routes, fight targets and node mappings may still name an id
/// after its object is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub u32);

/// Owning player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct PlayerId(pub u8);

/// A game object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameObject {
    /// Identifier.
    pub id: ObjectId,
    /// Owner.
    pub player: PlayerId,
    /// Prototype.
    pub type_index: TypeIndex,
    /// Placement.
    pub pose: Pose,
    /// Slot in the fight pool, for objects that can fight or be damaged.
    pub fight: Option<FightIndex>,
}

/// Storage of all live objects.
#[derive(Debug, Clone)]
pub struct ObjectTable {
    objects: HashMap<ObjectId, GameObject>,
    next_id: u32,
}

impl Default for ObjectTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectTable {
    /// Create an empty table. The first id handed out is 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            objects: HashMap::new(),
            next_id: 1,
        }
    }

    /// Create an empty table that continues numbering at `next_id`.
    #[must_use]
    pub fn with_next_id(next_id: u32) -> Self {
        Self {
            objects: HashMap::new(),
            next_id,
        }
    }

    /// Reserve a fresh id.
    ///
    /// # Panics
    ///
    /// Panics when the id space is exhausted; wrapping would reuse ids.
    pub fn allocate_id(&mut self) -> ObjectId {
        let id = ObjectId(self.next_id);
        self.next_id = self
            .next_id
            .checked_add(1)
            .unwrap_or_else(|| panic!("object id space exhausted"));
        id
    }

    /// The id the next allocation will return.
    #[must_use]
    pub const fn next_id(&self) -> u32 {
        self.next_id
    }

    /// Insert an object under its own id.
    ///
    /// # Panics
    ///
    /// Panics if the id is already present or was never allocated.
    pub fn insert(&mut self, object: GameObject) {
        assert!(object.id.0 < self.next_id, "object {:?} was not allocated", object.id);
        let previous = self.objects.insert(object.id, object);
        assert!(previous.is_none(), "object id inserted twice");
    }

    /// Remove an object.
    pub fn remove(&mut self, id: ObjectId) -> Option<GameObject> {
        self.objects.remove(&id)
    }

    /// Get an object.
    #[must_use]
    pub fn get(&self, id: ObjectId) -> Option<&GameObject> {
        self.objects.get(&id)
    }

    /// Get a mutable object.
    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut GameObject> {
        self.objects.get_mut(&id)
    }

    /// Get an object that must exist.
    ///
    /// # Panics
    ///
    /// Panics if the object is missing.
    #[must_use]
    pub fn expect_object(&self, id: ObjectId) -> &GameObject {
        self.objects
            .get(&id)
            .unwrap_or_else(|| panic!("object {id:?} is not in the table"))
    }

    /// Check if an object exists.
    #[must_use]
    pub fn contains(&self, id: ObjectId) -> bool {
        self.objects.contains_key(&id)
    }

    /// Number of objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Check if the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Sorted ids for deterministic iteration.
    #[must_use]
    pub fn sorted_ids(&self) -> Vec<ObjectId> {
        let mut ids: Vec<_> = self.objects.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{Fixed, Vec2Fixed};
    use crate::terrain::Terrain;

    fn object(table: &mut ObjectTable) -> GameObject {
        let terrain = Terrain::flat(2, 2, Fixed::ZERO).unwrap();
        GameObject {
            id: table.allocate_id(),
            player: PlayerId(0),
            type_index: TypeIndex(0),
            pose: Pose::on_terrain(&terrain, Vec2Fixed::ZERO, Fixed::ZERO),
            fight: None,
        }
    }

    #[test]
    fn test_ids_never_reused() {
        let mut table = ObjectTable::new();
        let a = object(&mut table);
        let a_id = a.id;
        table.insert(a);
        table.remove(a_id).unwrap();
        let b = object(&mut table);
        assert!(b.id > a_id);
    }

    #[test]
    fn test_sorted_ids() {
        let mut table = ObjectTable::new();
        for _ in 0..5 {
            let o = object(&mut table);
            table.insert(o);
        }
        table.remove(ObjectId(3));
        assert_eq!(table.sorted_ids(), vec![ObjectId(1), ObjectId(2), ObjectId(4), ObjectId(5)]);
    }

    #[test]
    #[should_panic(expected = "exhausted")]
    fn test_exhaustion_panics() {
        let mut table = ObjectTable::with_next_id(u32::MAX);
        table.allocate_id();
    }
}
