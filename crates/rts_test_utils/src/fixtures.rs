//! Test fixtures and helpers.
//!
//! Pre-built terrains, prototype tables and battle setups for consistent
//! testing.

use fixed::types::I32F32;
use rts_sim::commands::CommandKind;
use rts_sim::config::SimConfig;
use rts_sim::math::Vec2Fixed;
use rts_sim::objects::{ObjectId, PlayerId};
use rts_sim::prototype::{PrototypeTable, TypeIndex};
use rts_sim::simulation::{Simulation, SpawnParams};
use rts_sim::terrain::{CellPos, Terrain};

/// Create a fixed-point number from an integer.
#[must_use]
pub fn fixed(n: i32) -> I32F32 {
    I32F32::from_num(n)
}

/// Create a fixed-point number from a float (for tests only).
///
/// Note: In real simulation code, never use floats.
/// This is only for convenient test setup.
#[must_use]
pub fn fixed_f(n: f64) -> I32F32 {
    I32F32::from_num(n)
}

/// Ground position at the center of a cell.
#[must_use]
pub fn at(x: u32, y: u32) -> Vec2Fixed {
    CellPos::new(x, y).center()
}

/// Prototype table shared by the fixtures. Indices match the constants
/// below.
pub const STANDARD_PROTOTYPES: &str = r#"
PrototypeTable(
    prototypes: [
        GameObjectPrototype(
            name: "soldier",
            mobility: Ground,
            speed: 2.0,
            turn_speed: 8.0,
            footprint: Circle(radius: 0.3),
            action_cost: 1,
            health: 100,
            fight: Some(FightStats(damage: 10, range: 2.0, reattack_ms: 250)),
        ),
        GameObjectPrototype(
            name: "tank",
            mobility: Ground,
            speed: 1.5,
            turn_speed: 3.0,
            footprint: Rect(half_length: 0.45, half_width: 0.3),
            body_height: 1.5,
            action_cost: 3,
            health: 300,
            fight: Some(FightStats(damage: 25, range: 4.0, reattack_ms: 700, en_route: true)),
        ),
        GameObjectPrototype(
            name: "tower",
            footprint: Rect(half_length: 0.45, half_width: 0.45),
            body_height: 3.0,
            health: 40,
            fight: Some(FightStats(damage: 5, range: 3.0, reattack_ms: 500)),
        ),
        GameObjectPrototype(
            name: "worker",
            mobility: Ground,
            speed: 1.0,
            turn_speed: 6.0,
            footprint: Circle(radius: 0.25),
            action_cost: 1,
            health: 30,
            work: Some(WorkStats(range: 1.5)),
        ),
        GameObjectPrototype(
            name: "ore",
            footprint: Circle(radius: 0.4),
            resource: true,
        ),
    ],
)
"#;

/// Mobile melee-range fighter.
pub const SOLDIER: TypeIndex = TypeIndex(0);
/// Slow en-route fighter.
pub const TANK: TypeIndex = TypeIndex(1);
/// Immobile, damageable, armed.
pub const TOWER: TypeIndex = TypeIndex(2);
/// Gatherer.
pub const WORKER: TypeIndex = TypeIndex(3);
/// Gatherable resource.
pub const ORE: TypeIndex = TypeIndex(4);

/// The standard prototype table.
///
/// # Panics
///
/// Panics if [`STANDARD_PROTOTYPES`] fails to parse.
#[must_use]
pub fn standard_prototypes() -> PrototypeTable {
    PrototypeTable::from_ron_str("fixtures", STANDARD_PROTOTYPES)
        .unwrap_or_else(|e| panic!("standard prototypes must parse: {e}"))
}

/// Flat terrain at height zero.
///
/// # Panics
///
/// Panics on zero dimensions.
#[must_use]
pub fn flat_terrain(width: u32, height: u32) -> Terrain {
    Terrain::flat(width, height, I32F32::ZERO)
        .unwrap_or_else(|e| panic!("invalid fixture terrain: {e}"))
}

/// Flat terrain cut in two by a raised wall along column `width / 2`.
///
/// Cells left of the wall and right of it end up on different islands.
///
/// # Panics
///
/// Panics on zero dimensions.
#[must_use]
pub fn split_terrain(width: u32, height: u32) -> Terrain {
    let mut terrain = flat_terrain(width, height);
    let wall = width / 2;
    for y in 0..height {
        terrain
            .raise_cell(CellPos::new(wall, y), fixed(4))
            .unwrap_or_else(|e| panic!("wall out of bounds: {e}"));
    }
    terrain
}

/// Flat terrain with a wall along column `width / 2` that has a one-cell
/// gap at row `gap`.
///
/// # Panics
///
/// Panics on zero dimensions or a gap outside the grid.
#[must_use]
pub fn gapped_wall_terrain(width: u32, height: u32, gap: u32) -> Terrain {
    assert!(gap < height, "gap row {gap} outside a {height} row terrain");
    let mut terrain = flat_terrain(width, height);
    let wall = width / 2;
    for y in (0..height).filter(|&y| y != gap) {
        terrain
            .raise_cell(CellPos::new(wall, y), fixed(4))
            .unwrap_or_else(|e| panic!("wall out of bounds: {e}"));
    }
    terrain
}

/// Gentle rolling hills built from shared vertex heights; fully connected.
///
/// # Panics
///
/// Panics on zero dimensions.
#[must_use]
pub fn rolling_terrain(width: u32, height: u32) -> Terrain {
    let vertices: Vec<I32F32> = (0..=height)
        .flat_map(|y| (0..=width).map(move |x| fixed_f(f64::from((x + 2 * y) % 5) * 0.25)))
        .collect();
    Terrain::from_vertex_heights(width, height, &vertices)
        .unwrap_or_else(|e| panic!("invalid fixture terrain: {e}"))
}

/// A simulation over `terrain` with the standard prototypes and default
/// config.
///
/// # Panics
///
/// Panics if the default config is rejected.
#[must_use]
pub fn simulation(terrain: Terrain) -> Simulation {
    Simulation::new(terrain, standard_prototypes(), SimConfig::default())
        .unwrap_or_else(|e| panic!("fixture simulation: {e}"))
}

/// Spawn an object at the center of a cell, facing east.
///
/// # Panics
///
/// Panics if the spawn is rejected.
pub fn spawn(sim: &mut Simulation, player: u8, type_index: TypeIndex, x: u32, y: u32) -> ObjectId {
    sim.spawn_object(SpawnParams::new(PlayerId(player), type_index, at(x, y)))
        .unwrap_or_else(|e| panic!("fixture spawn at ({x}, {y}): {e}"))
}

/// Two lines of soldiers facing each other across a flat field, each
/// soldier ordered to attack its opposite number.
///
/// # Panics
///
/// Panics if `per_side` soldiers do not fit on a 32-row field.
#[must_use]
pub fn battle_scenario(per_side: u32) -> Simulation {
    assert!(per_side > 0 && per_side <= 15, "1..=15 soldiers per side fit the field");
    let mut sim = simulation(flat_terrain(32, 32));
    let mut pairs = Vec::new();
    for i in 0..per_side {
        let row = 1 + 2 * i;
        let west = spawn(&mut sim, 0, SOLDIER, 4, row);
        let east = spawn(&mut sim, 1, SOLDIER, 27, row);
        pairs.push((west, east));
    }
    for (west, east) in pairs {
        sim.issue_command(PlayerId(0), vec![west], CommandKind::ObjectToObject(east))
            .unwrap_or_else(|e| panic!("fixture command: {e}"));
        sim.issue_command(PlayerId(1), vec![east], CommandKind::ObjectToObject(west))
            .unwrap_or_else(|e| panic!("fixture command: {e}"));
    }
    sim
}

/// Soldiers spread over a field, all sent to the same far corner so their
/// routes cross and collide.
///
/// # Panics
///
/// Panics if `count` soldiers do not fit in the first rows of the field.
#[must_use]
pub fn crowd_scenario(count: u32) -> Simulation {
    assert!(count > 0 && count <= 64, "1..=64 soldiers fit the field");
    let mut sim = simulation(rolling_terrain(48, 48));
    let mut ids = Vec::new();
    for i in 0..count {
        ids.push(spawn(&mut sim, 0, SOLDIER, 2 + (i % 16) * 2, 2 + (i / 16) * 2));
    }
    for id in ids {
        sim.issue_command(PlayerId(0), vec![id], CommandKind::ObjectToTerrain(CellPos::new(44, 44)))
            .unwrap_or_else(|e| panic!("fixture command: {e}"));
    }
    sim
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_prototypes_parse() {
        let table = standard_prototypes();
        assert_eq!(table.len(), 5);
        assert_eq!(table.index_of("soldier"), Some(SOLDIER));
        assert_eq!(table.index_of("ore"), Some(ORE));
        assert!(table.of(TANK).fight.is_some_and(|f| f.en_route));
        assert!(!table.of(TOWER).is_mobile());
        assert!(table.of(ORE).resource);
        assert_eq!(table.of(TOWER).body_height, fixed(3));
    }

    #[test]
    fn test_split_terrain_has_separate_islands() {
        let terrain = split_terrain(16, 8);
        let index = rts_sim::spatial::SpatialIndex::build(&terrain);
        assert!(!index.same_island(CellPos::new(1, 1), CellPos::new(14, 1)));
        assert!(index.same_island(CellPos::new(1, 1), CellPos::new(6, 7)));
    }

    #[test]
    fn test_gapped_wall_connects() {
        let terrain = gapped_wall_terrain(16, 8, 3);
        let index = rts_sim::spatial::SpatialIndex::build(&terrain);
        assert!(index.same_island(CellPos::new(1, 1), CellPos::new(14, 1)));
    }

    #[test]
    fn test_battle_scenario_queues_commands() {
        let sim = battle_scenario(3);
        assert_eq!(sim.objects().len(), 6);
        assert_eq!(sim.commands().len(), 6);
    }
}
