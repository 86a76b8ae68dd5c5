//! Whole-simulation scenarios: determinism, persistence, throttling,
//! gathering and the query surface.

use rts_sim::config::ActionPointConfig;
use rts_sim::prelude::*;
use rts_test_utils::determinism::{
    find_first_divergence, run_parallel_simulations, verify_determinism, verify_snapshot_determinism,
};
use rts_test_utils::fixtures::{
    at, battle_scenario, crowd_scenario, flat_terrain, gapped_wall_terrain, rolling_terrain, simulation,
    spawn, standard_prototypes, ORE, SOLDIER, WORKER,
};

#[test]
fn crowd_is_deterministic() {
    verify_determinism(
        3,
        600,
        || crowd_scenario(24),
        |sim| {
            sim.tick();
        },
        Simulation::state_hash,
    )
    .assert_deterministic();
}

#[test]
fn battle_is_deterministic_across_threads() {
    run_parallel_simulations(|| battle_scenario(6), 4, 800).assert_deterministic();
    assert_eq!(find_first_divergence(|| battle_scenario(4), 300), None);
}

#[test]
fn battle_ends_with_one_side_losing_units() {
    let mut sim = battle_scenario(4);
    let mut destroyed = Vec::new();
    for _ in 0..3000 {
        destroyed.extend(sim.tick().destroyed());
    }
    assert!(!destroyed.is_empty());
    for (victim, killer) in &destroyed {
        assert!(sim.object(*victim).is_none());
        assert_ne!(victim, killer);
    }
    // Every object is destroyed at most once.
    let mut victims: Vec<ObjectId> = destroyed.iter().map(|(v, _)| *v).collect();
    victims.sort_unstable();
    victims.dedup();
    assert_eq!(victims.len(), destroyed.len());
}

#[test]
fn snapshot_round_trips_mid_crowd() {
    assert!(verify_snapshot_determinism(|| crowd_scenario(16), 120, 400));
}

#[test]
fn snapshot_rejects_foreign_terrain() {
    let mut sim = crowd_scenario(8);
    for _ in 0..10 {
        sim.tick();
    }
    let snapshot = sim.snapshot();
    // Objects sit outside a 4x4 grid.
    let restored = Simulation::restore(flat_terrain(4, 4), standard_prototypes(), SimConfig::default(), snapshot);
    assert!(matches!(restored, Err(GameError::InvalidState(_))));
}

#[test]
fn commands_wait_for_action_points() {
    let config = SimConfig {
        action_points: ActionPointConfig {
            rate_per_second: 10,
            capacity: 2,
            initial: 0,
        },
        ..SimConfig::default()
    };
    let mut sim = Simulation::new(flat_terrain(16, 16), standard_prototypes(), config).unwrap();
    let soldier = spawn(&mut sim, 0, SOLDIER, 1, 1);
    for x in [4, 8, 12] {
        sim.issue_command(PlayerId(0), vec![soldier], CommandKind::ObjectToTerrain(CellPos::new(x, 1)))
            .unwrap();
    }

    // One point every ten ticks.
    for _ in 0..9 {
        sim.tick();
    }
    assert_eq!(sim.commands().len(), 3);
    assert!(!sim.movement().has_route(soldier));

    sim.tick();
    assert_eq!(sim.commands().len(), 2);
    assert_eq!(sim.movement().route(soldier).unwrap().target(), CellPos::new(4, 1));

    for _ in 0..10 {
        sim.tick();
    }
    assert_eq!(sim.commands().len(), 1);
    assert_eq!(sim.movement().route(soldier).unwrap().target(), CellPos::new(8, 1));
}

#[test]
fn commands_of_removed_objects_are_retired() {
    let config = SimConfig {
        action_points: ActionPointConfig {
            rate_per_second: 0,
            capacity: 5,
            initial: 1,
        },
        ..SimConfig::default()
    };
    let mut sim = Simulation::new(flat_terrain(16, 16), standard_prototypes(), config).unwrap();
    let doomed = spawn(&mut sim, 0, SOLDIER, 1, 1);
    let other = spawn(&mut sim, 0, SOLDIER, 1, 5);
    sim.issue_command(PlayerId(0), vec![doomed], CommandKind::ObjectToTerrain(CellPos::new(9, 1)))
        .unwrap();
    sim.issue_command(PlayerId(0), vec![other], CommandKind::ObjectToTerrain(CellPos::new(9, 5)))
        .unwrap();
    sim.remove_object(doomed).unwrap();

    sim.tick();
    assert!(sim.commands().is_empty());
    assert!(sim.movement().has_route(other));
}

#[test]
fn worker_gathers_until_moved() {
    let mut sim = simulation(flat_terrain(16, 8));
    let worker = spawn(&mut sim, 0, WORKER, 1, 1);
    let ore = spawn(&mut sim, 2, ORE, 7, 1);
    sim.issue_command(PlayerId(0), vec![worker], CommandKind::ObjectToObject(ore))
        .unwrap();

    sim.tick();
    assert_eq!(sim.work().phase_of(worker), WorkPhase::Approach);
    assert_eq!(sim.movement().route(worker).unwrap().issuer(), Issuer::Work);

    for _ in 0..800 {
        sim.tick();
    }
    assert_eq!(sim.work().phase_of(worker), WorkPhase::Working);
    let position = sim.object(worker).unwrap().pose.position();
    assert!(position.distance(at(7, 1)) <= Fixed::from_num(1.5));

    sim.issue_command(PlayerId(0), vec![worker], CommandKind::ObjectToTerrain(CellPos::new(1, 6)))
        .unwrap();
    let events = sim.tick().events;
    assert_eq!(sim.work().phase_of(worker), WorkPhase::None);
    assert!(events.contains(&SimEvent::WorkStateChanged {
        object: worker,
        phase: WorkPhase::None,
    }));
}

#[test]
fn move_to_own_cell_stops_work() {
    let mut sim = simulation(flat_terrain(16, 8));
    let worker = spawn(&mut sim, 0, WORKER, 6, 1);
    let ore = spawn(&mut sim, 2, ORE, 7, 1);
    sim.issue_command(PlayerId(0), vec![worker], CommandKind::ObjectToObject(ore))
        .unwrap();
    sim.tick();
    assert_eq!(sim.work().phase_of(worker), WorkPhase::Working);

    sim.issue_command(PlayerId(0), vec![worker], CommandKind::ObjectToTerrain(CellPos::new(6, 1)))
        .unwrap();
    let events = sim.tick().events;
    assert_eq!(sim.work().phase_of(worker), WorkPhase::None);
    assert!(events.contains(&SimEvent::WorkStateChanged {
        object: worker,
        phase: WorkPhase::None,
    }));
    assert!(!sim.movement().has_route(worker));
}

#[test]
fn removing_the_resource_idles_the_worker() {
    let mut sim = simulation(flat_terrain(16, 8));
    let worker = spawn(&mut sim, 0, WORKER, 6, 1);
    let ore = spawn(&mut sim, 2, ORE, 7, 1);
    sim.issue_command(PlayerId(0), vec![worker], CommandKind::ObjectToObject(ore))
        .unwrap();
    sim.tick();
    assert_eq!(sim.work().phase_of(worker), WorkPhase::Working);

    sim.remove_object(ore).unwrap();
    assert_eq!(sim.work().phase_of(worker), WorkPhase::None);
}

#[test]
fn units_route_through_a_wall_gap() {
    let mut sim = simulation(gapped_wall_terrain(16, 12, 9));
    let soldier = spawn(&mut sim, 0, SOLDIER, 2, 2);
    sim.issue_command(PlayerId(0), vec![soldier], CommandKind::ObjectToTerrain(CellPos::new(13, 2)))
        .unwrap();
    let mut through_gap = false;
    for _ in 0..2000 {
        sim.tick();
        let cell = sim.terrain().clamped_cell_at(sim.object(soldier).unwrap().pose.position());
        through_gap |= cell == CellPos::new(8, 9);
    }
    assert!(through_gap);
    assert_eq!(sim.object(soldier).unwrap().pose.position(), at(13, 2));
}

#[test]
fn queries_follow_objects() {
    let mut sim = simulation(rolling_terrain(24, 24));
    let soldier = spawn(&mut sim, 0, SOLDIER, 2, 2);
    assert_eq!(sim.object_at_cell(CellPos::new(2, 2)), Some(soldier));

    let culler = Culler::new(2).unwrap();
    let near = Frustum::ground_rect(Vec2Fixed::ZERO, Vec2Fixed::from_ints(6, 6));
    let far = Frustum::ground_rect(Vec2Fixed::from_ints(16, 16), Vec2Fixed::from_ints(24, 24));
    assert_eq!(sim.visible_objects(&culler, &near), vec![soldier]);
    assert!(sim.visible_objects(&culler, &far).is_empty());

    sim.issue_command(PlayerId(0), vec![soldier], CommandKind::ObjectToTerrain(CellPos::new(20, 20)))
        .unwrap();
    for _ in 0..2000 {
        sim.tick();
    }
    assert_eq!(sim.object_at_cell(CellPos::new(2, 2)), None);
    assert_eq!(sim.object_at_cell(CellPos::new(20, 20)), Some(soldier));
    assert_eq!(sim.visible_objects(&culler, &far), vec![soldier]);

    let pose = sim.object(soldier).unwrap().pose;
    let aabb = sim.get_transformed_bounding_box(soldier).unwrap();
    assert!(aabb.min.z <= pose.height());
    assert!(aabb.max.z >= pose.height() + Fixed::ONE);
    assert!(aabb.min.x < pose.position().x && pose.position().x < aabb.max.x);
    assert_eq!(sim.path_finding_height(&pose), sim.terrain().height_at(at(20, 20)));
}

#[test]
fn cached_index_matches_fresh_index() {
    let dir = tempfile::tempdir().unwrap();
    let terrain = rolling_terrain(20, 12);
    let cached = SpatialIndex::build_cached(&terrain, dir.path()).unwrap();
    let reloaded = SpatialIndex::build_cached(&terrain, dir.path()).unwrap();
    assert_eq!(cached.node_count(), reloaded.node_count());

    let mut a = Simulation::with_index(terrain.clone(), reloaded, standard_prototypes(), SimConfig::default())
        .unwrap();
    let mut b = simulation(terrain);
    for sim in [&mut a, &mut b] {
        let id = spawn(sim, 0, SOLDIER, 1, 1);
        sim.issue_command(PlayerId(0), vec![id], CommandKind::ObjectToTerrain(CellPos::new(18, 10)))
            .unwrap();
        for _ in 0..300 {
            sim.tick();
        }
    }
    assert_eq!(a.state_hash(), b.state_hash());
}

#[test]
fn with_index_rejects_mismatched_index() {
    let index = SpatialIndex::build(&flat_terrain(8, 8));
    let result = Simulation::with_index(flat_terrain(9, 8), index, standard_prototypes(), SimConfig::default());
    assert!(matches!(result, Err(GameError::InvalidState(_))));
}

#[test]
fn config_loads_from_ron_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sim.ron");
    std::fs::write(
        &path,
        "SimConfig(tick_duration_ms: 20, action_points: (rate_per_second: 5, capacity: 10, initial: 3))",
    )
    .unwrap();
    let config = SimConfig::load(&path).unwrap();
    assert_eq!(config.tick_duration_ms, 20);
    assert_eq!(config.ticks_per_second(), 50);
    assert_eq!(config.action_points.initial, 3);

    let mut sim = Simulation::new(flat_terrain(4, 4), standard_prototypes(), config).unwrap();
    sim.tick();
    assert_eq!(sim.time_ms(), 20);

    std::fs::write(&path, "SimConfig(tick_duration_ms: 7)").unwrap();
    assert!(SimConfig::load(&path).is_err());
    assert!(matches!(
        SimConfig::load(&dir.path().join("missing.ron")),
        Err(GameError::Io { .. })
    ));
}
