//! Game object prototypes.
//!
//! Every object has a type index into a [`PrototypeTable`] built at startup
//! and passed to the simulation. Prototype files are hand-written RON, so
//! fixed-point values are given as decimals.
//!
//! # Example RON
//!
//! ```ron
//! PrototypeTable(
//!     prototypes: [
//!         GameObjectPrototype(
//!             name: "rifleman",
//!             mobility: Ground,
//!             speed: 2.0,
//!             turn_speed: 6.0,
//!             footprint: Circle(radius: 0.3),
//!             action_cost: 1,
//!             health: 100,
//!             fight: Some(FightStats(
//!                 damage: 10,
//!                 range: 4.0,
//!                 reattack_ms: 500,
//!                 en_route: false,
//!             )),
//!         ),
//!     ],
//! )
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{GameError, Result};
use crate::math::{fixed_decimal_serde, Fixed};

/// Index of a prototype in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeIndex(pub u16);

/// How an object moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Mobility {
    /// Never moves (buildings, resources).
    #[default]
    Immobile,
    /// Walks on the terrain; collides by its oriented footprint.
    Ground,
    /// Hovers; collides by the axis-aligned box around its footprint.
    Air,
}

/// Ground footprint of an object, centered on its position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FootprintShape {
    /// Rectangle aligned with the object's heading.
    Rect {
        /// Half length along the heading.
        #[serde(with = "fixed_decimal_serde")]
        half_length: Fixed,
        /// Half width across the heading.
        #[serde(with = "fixed_decimal_serde")]
        half_width: Fixed,
    },
    /// Circle.
    Circle {
        /// Radius in cells.
        #[serde(with = "fixed_decimal_serde")]
        radius: Fixed,
    },
}

impl Default for FootprintShape {
    fn default() -> Self {
        Self::Circle {
            radius: Fixed::from_num(0.4),
        }
    }
}

/// Weapon statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FightStats {
    /// Hit points removed per hit.
    pub damage: u32,
    /// Attack range between centers, in cells.
    #[serde(with = "fixed_decimal_serde")]
    pub range: Fixed,
    /// Time between two hits, in milliseconds.
    pub reattack_ms: u32,
    /// Can fire while following a route.
    #[serde(default)]
    pub en_route: bool,
}

/// Gathering statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkStats {
    /// Working range between centers, in cells.
    #[serde(with = "fixed_decimal_serde")]
    pub range: Fixed,
}

/// Static description of one object type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameObjectPrototype {
    /// Unique name, used by scenarios to refer to the type.
    pub name: String,
    /// Movement class.
    #[serde(default)]
    pub mobility: Mobility,
    /// Travel speed in cells per second.
    #[serde(default, with = "fixed_decimal_serde")]
    pub speed: Fixed,
    /// Turn rate in radians per second.
    #[serde(default, with = "fixed_decimal_serde")]
    pub turn_speed: Fixed,
    /// Collision footprint.
    #[serde(default)]
    pub footprint: FootprintShape,
    /// Height of the body above the ground, for bounding boxes.
    #[serde(default = "default_body_height", with = "fixed_decimal_serde")]
    pub body_height: Fixed,
    /// Action points a command involving this object costs.
    #[serde(default)]
    pub action_cost: u32,
    /// Starting health; zero means the object cannot be damaged.
    #[serde(default)]
    pub health: u32,
    /// Weapon, if the type can attack.
    #[serde(default)]
    pub fight: Option<FightStats>,
    /// Gathering ability, if the type can work.
    #[serde(default)]
    pub work: Option<WorkStats>,
    /// Whether workers can gather from this object.
    #[serde(default)]
    pub resource: bool,
}

fn default_body_height() -> Fixed {
    Fixed::ONE
}

impl GameObjectPrototype {
    /// A prototype with every optional field at its default: immobile,
    /// harmless and indestructible.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mobility: Mobility::Immobile,
            speed: Fixed::ZERO,
            turn_speed: Fixed::ZERO,
            footprint: FootprintShape::default(),
            body_height: default_body_height(),
            action_cost: 0,
            health: 0,
            fight: None,
            work: None,
            resource: false,
        }
    }

    /// Whether the type can follow routes.
    #[must_use]
    pub fn is_mobile(&self) -> bool {
        self.mobility != Mobility::Immobile && self.speed > Fixed::ZERO
    }

    /// Whether objects of this type carry fight state.
    #[must_use]
    pub fn has_fight_state(&self) -> bool {
        self.fight.is_some() || self.health > 0
    }
}

/// All prototypes, indexed by [`TypeIndex`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrototypeTable {
    prototypes: Vec<GameObjectPrototype>,
}

impl PrototypeTable {
    /// Build a table from prototypes.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::InvalidState`] on duplicate names, too many
    /// prototypes, or weapons with a zero reattack time.
    pub fn new(prototypes: Vec<GameObjectPrototype>) -> Result<Self> {
        if prototypes.len() > usize::from(u16::MAX) {
            return Err(GameError::InvalidState(format!(
                "{} prototypes exceed the type index range",
                prototypes.len()
            )));
        }
        for (i, proto) in prototypes.iter().enumerate() {
            if prototypes[..i].iter().any(|p| p.name == proto.name) {
                return Err(GameError::InvalidState(format!(
                    "duplicate prototype name '{}'",
                    proto.name
                )));
            }
            if proto.fight.is_some_and(|f| f.reattack_ms == 0) {
                return Err(GameError::InvalidState(format!(
                    "prototype '{}' has a zero reattack time",
                    proto.name
                )));
            }
        }
        Ok(Self { prototypes })
    }

    /// Parse a table from RON text. `label` names the source in errors.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::DataParseError`] on malformed RON and the errors
    /// of [`PrototypeTable::new`] on invalid content.
    pub fn from_ron_str(label: &str, text: &str) -> Result<Self> {
        let raw: Self = ron::from_str(text).map_err(|e| GameError::ron(label, &e))?;
        Self::new(raw.prototypes)
    }

    /// Load a table from a RON file.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::Io`] if the file cannot be read, otherwise as
    /// [`PrototypeTable::from_ron_str`].
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| GameError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_ron_str(&path.display().to_string(), &text)
    }

    /// Prototype by index.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::UnknownPrototype`] for indices outside the table.
    pub fn get(&self, index: TypeIndex) -> Result<&GameObjectPrototype> {
        self.prototypes
            .get(usize::from(index.0))
            .ok_or(GameError::UnknownPrototype(index.0))
    }

    /// Prototype by index for ids already validated at spawn time.
    ///
    /// # Panics
    ///
    /// Panics if the index is not in the table.
    #[must_use]
    pub fn of(&self, index: TypeIndex) -> &GameObjectPrototype {
        &self.prototypes[usize::from(index.0)]
    }

    /// Look a type up by name.
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<TypeIndex> {
        self.prototypes
            .iter()
            .position(|p| p.name == name)
            .map(|i| TypeIndex(i as u16))
    }

    /// Number of prototypes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.prototypes.len()
    }

    /// True when the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.prototypes.is_empty()
    }

    /// Iterate over `(index, prototype)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (TypeIndex, &GameObjectPrototype)> {
        self.prototypes
            .iter()
            .enumerate()
            .map(|(i, p)| (TypeIndex(i as u16), p))
    }
}
