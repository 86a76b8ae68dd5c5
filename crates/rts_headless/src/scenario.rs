//! Scenario loading and setup.
//!
//! A scenario describes a map, the object types in play, the starting
//! units and a schedule of orders. Scenarios are RON files:
//!
//! ```ron
//! Scenario(
//!     name: "Duel",
//!     map: Flat(width: 16, height: 8),
//!     prototypes: Inline([
//!         (name: "soldier", mobility: Ground, speed: 2.0, health: 100,
//!          fight: Some((damage: 10, range: 2.0, reattack_ms: 250))),
//!     ]),
//!     units: [
//!         (label: "red", player: 0, prototype: "soldier", cell: (1, 3)),
//!         (label: "blue", player: 1, prototype: "soldier", cell: (14, 3)),
//!     ],
//!     orders: [
//!         (tick: 0, player: 0, units: ["red"], action: Attack("blue")),
//!     ],
//! )
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use rts_sim::math::{fixed_decimal_serde, Fixed};
use rts_sim::prelude::*;
use std::result::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for scenario operations.
#[derive(Error, Debug)]
pub enum ScenarioError {
    /// File not found.
    #[error("Scenario file not found: {0}")]
    FileNotFound(String),
    /// Failed to read file.
    #[error("Failed to read scenario file: {0}")]
    ReadError(#[from] std::io::Error),
    /// Failed to parse RON.
    #[error("Failed to parse scenario: {0}")]
    ParseError(#[from] ron::error::SpannedError),
    /// The simulation rejected part of the setup.
    #[error("Simulation error: {0}")]
    Sim(#[from] GameError),
    /// A unit names a prototype the table does not have.
    #[error("Unit '{unit}' uses unknown prototype '{prototype}'")]
    UnknownPrototype {
        /// Unit label.
        unit: String,
        /// Missing prototype name.
        prototype: String,
    },
    /// An order refers to a label no unit carries.
    #[error("Order at tick {tick} refers to unknown unit '{label}'")]
    UnknownUnit {
        /// Scheduled tick of the order.
        tick: u64,
        /// Missing label.
        label: String,
    },
    /// Two units share a label.
    #[error("Duplicate unit label '{0}'")]
    DuplicateLabel(String),
}

/// Terrain layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MapSpec {
    /// Level ground.
    Flat {
        /// Width in cells.
        width: u32,
        /// Height in cells.
        height: u32,
    },
    /// Level ground split by a raised north-south wall, optionally with a
    /// one-cell gap.
    Wall {
        /// Width in cells.
        width: u32,
        /// Height in cells.
        height: u32,
        /// Column the wall occupies.
        column: u32,
        /// Row left open, if any.
        #[serde(default)]
        gap: Option<u32>,
    },
    /// Explicit vertex heights, row-major, `(width + 1) * (height + 1)`
    /// values.
    Heights {
        /// Width in cells.
        width: u32,
        /// Height in cells.
        height: u32,
        /// Vertex heights.
        vertices: Vec<f64>,
    },
}

/// Height of walls raised by [`MapSpec::Wall`].
const WALL_LEVEL: i32 = 4;

impl MapSpec {
    /// Build the terrain this layout describes.
    pub fn build(&self) -> Result<Terrain, GameError> {
        match *self {
            MapSpec::Flat { width, height } => Terrain::flat(width, height, Fixed::ZERO),
            MapSpec::Wall {
                width,
                height,
                column,
                gap,
            } => {
                let mut terrain = Terrain::flat(width, height, Fixed::ZERO)?;
                for y in (0..height).filter(|&y| Some(y) != gap) {
                    terrain.raise_cell(CellPos::new(column, y), Fixed::from_num(WALL_LEVEL))?;
                }
                Ok(terrain)
            }
            MapSpec::Heights {
                width,
                height,
                ref vertices,
            } => {
                let vertices = vertices
                    .iter()
                    .map(|&h| {
                        Fixed::checked_from_num(h)
                            .ok_or_else(|| GameError::InvalidTerrain(format!("vertex height {h} is out of range")))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Terrain::from_vertex_heights(width, height, &vertices)
            }
        }
    }
}

/// Where the object types come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PrototypeSource {
    /// Listed in the scenario itself.
    Inline(Vec<GameObjectPrototype>),
    /// A prototype table file, relative to the scenario file.
    File(PathBuf),
}

/// A unit placed at the start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitSpawn {
    /// Name orders use to refer to the unit.
    pub label: String,
    /// Owner.
    pub player: u8,
    /// Prototype name.
    pub prototype: String,
    /// Starting cell; the unit sits at its center.
    pub cell: (u32, u32),
    /// Starting heading in radians.
    #[serde(default, with = "fixed_decimal_serde")]
    pub yaw: Fixed,
}

/// What an order tells its units to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderAction {
    /// Move to a cell.
    MoveTo(u32, u32),
    /// Attack the labelled unit.
    Attack(String),
    /// Gather from the labelled unit.
    Gather(String),
}

/// An order issued at a fixed tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledOrder {
    /// Tick the order is issued before.
    pub tick: u64,
    /// Issuing player.
    pub player: u8,
    /// Labels of the ordered units.
    pub units: Vec<String>,
    /// The order itself.
    pub action: OrderAction,
}

impl ScheduledOrder {
    /// Labels this order refers to, sources and target.
    fn labels(&self) -> impl Iterator<Item = &str> {
        let target = match &self.action {
            OrderAction::MoveTo(..) => None,
            OrderAction::Attack(label) | OrderAction::Gather(label) => Some(label.as_str()),
        };
        self.units.iter().map(String::as_str).chain(target)
    }
}

fn default_ticks() -> u64 {
    1000
}

/// A complete scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario name.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Terrain layout.
    pub map: MapSpec,
    /// Object types.
    pub prototypes: PrototypeSource,
    /// Simulation settings.
    #[serde(default)]
    pub config: SimConfig,
    /// Ticks to run unless overridden.
    #[serde(default = "default_ticks")]
    pub ticks: u64,
    /// Starting units.
    #[serde(default)]
    pub units: Vec<UnitSpawn>,
    /// Order schedule.
    #[serde(default)]
    pub orders: Vec<ScheduledOrder>,
    /// Directory relative prototype files resolve against.
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

/// A scenario turned into a live simulation.
pub struct Setup {
    /// The simulation, at tick zero.
    pub sim: Simulation,
    /// Unit labels.
    pub labels: BTreeMap<String, ObjectId>,
}

impl Scenario {
    /// Load a scenario from a RON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ScenarioError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ScenarioError::FileNotFound(path.display().to_string()));
        }
        let contents = std::fs::read_to_string(path)?;
        let mut scenario = Self::from_ron_str(&contents)?;
        scenario.base_dir = path.parent().map(Path::to_path_buf);
        Ok(scenario)
    }

    /// Parse a scenario from RON text.
    pub fn from_ron_str(s: &str) -> Result<Self, ScenarioError> {
        Ok(ron::from_str(s)?)
    }

    /// Build the terrain.
    pub fn terrain(&self) -> Result<Terrain, ScenarioError> {
        Ok(self.map.build()?)
    }

    /// Resolve the prototype table.
    pub fn prototype_table(&self) -> Result<PrototypeTable, ScenarioError> {
        let table = match &self.prototypes {
            PrototypeSource::Inline(prototypes) => PrototypeTable::new(prototypes.clone())?,
            PrototypeSource::File(path) => {
                let path = match &self.base_dir {
                    Some(dir) if path.is_relative() => dir.join(path),
                    _ => path.clone(),
                };
                PrototypeTable::load(&path)?
            }
        };
        Ok(table)
    }

    /// Check labels and order references without building anything.
    pub fn validate(&self) -> Result<(), ScenarioError> {
        let mut seen = BTreeSet::new();
        for unit in &self.units {
            if !seen.insert(unit.label.as_str()) {
                return Err(ScenarioError::DuplicateLabel(unit.label.clone()));
            }
        }
        for order in &self.orders {
            if let Some(label) = order.labels().find(|l| !seen.contains(l)) {
                return Err(ScenarioError::UnknownUnit {
                    tick: order.tick,
                    label: label.to_string(),
                });
            }
        }
        self.config.validate()?;
        Ok(())
    }

    /// Build the simulation and spawn every unit, in listed order.
    pub fn setup(&self) -> Result<Setup, ScenarioError> {
        self.validate()?;
        let prototypes = self.prototype_table()?;
        let mut sim = Simulation::new(self.terrain()?, prototypes, self.config)?;
        let mut labels = BTreeMap::new();
        for unit in &self.units {
            let type_index =
                sim.prototypes()
                    .index_of(&unit.prototype)
                    .ok_or_else(|| ScenarioError::UnknownPrototype {
                        unit: unit.label.clone(),
                        prototype: unit.prototype.clone(),
                    })?;
            let position = CellPos::new(unit.cell.0, unit.cell.1).center();
            let id = sim.spawn_object(SpawnParams {
                yaw: unit.yaw,
                ..SpawnParams::new(PlayerId(unit.player), type_index, position)
            })?;
            labels.insert(unit.label.clone(), id);
        }
        tracing::debug!(scenario = %self.name, units = labels.len(), "Scenario set up");
        Ok(Setup { sim, labels })
    }
}
