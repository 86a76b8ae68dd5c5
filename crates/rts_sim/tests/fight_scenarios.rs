//! Combat scenarios driven through the full simulation.
//!
//! These tests issue commands the way a player would and observe the
//! result through tick events, listeners and queries.

use std::cell::RefCell;
use std::rc::Rc;

use proptest::prelude::*;
use rts_sim::prelude::*;
use rts_test_utils::determinism::strategies::{arb_damage, arb_reattack_ms, arb_tick_ms};
use rts_test_utils::fixtures::{
    at, flat_terrain, simulation, spawn, split_terrain, SOLDIER, TANK, TOWER,
};

/// Records every event it is handed.
#[derive(Default)]
struct Recorder {
    events: RefCell<Vec<SimEvent>>,
}

impl SimListener for Recorder {
    fn on_event(&self, event: &SimEvent) {
        self.events.borrow_mut().push(*event);
    }
}

fn attack(sim: &mut Simulation, player: u8, attacker: ObjectId, target: ObjectId) {
    sim.issue_command(PlayerId(player), vec![attacker], CommandKind::ObjectToObject(target))
        .unwrap();
}

fn fight_events(events: &[SimEvent], object: ObjectId) -> Vec<AttackPhase> {
    events
        .iter()
        .filter_map(|e| match *e {
            SimEvent::FightStateChanged { object: o, phase } if o == object => Some(phase),
            _ => None,
        })
        .collect()
}

/// An immobile gun facing east and a wall with a deep health pool.
fn gunnery_range(damage: u32, reattack_ms: u32) -> (Simulation, ObjectId, ObjectId) {
    let mut gun = GameObjectPrototype::named("gun");
    gun.health = 1;
    gun.fight = Some(FightStats {
        damage,
        range: Fixed::from_num(3),
        reattack_ms,
        en_route: false,
    });
    let mut wall = GameObjectPrototype::named("wall");
    wall.health = 1_000_000_000;
    let prototypes = PrototypeTable::new(vec![gun, wall]).unwrap();
    let mut sim = Simulation::new(flat_terrain(8, 4), prototypes, SimConfig::default()).unwrap();
    let gun = sim
        .spawn_object(SpawnParams::new(PlayerId(0), TypeIndex(0), at(1, 1)))
        .unwrap();
    let wall = sim
        .spawn_object(SpawnParams::new(PlayerId(1), TypeIndex(1), at(3, 1)))
        .unwrap();
    (sim, gun, wall)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Damage dealt depends only on elapsed time, never on how the time was
    /// cut into ticks.
    #[test]
    fn damage_rate_ignores_tick_jitter(
        damage in arb_damage(),
        reattack_ms in arb_reattack_ms(),
        ticks in proptest::collection::vec(arb_tick_ms(), 100..800),
    ) {
        let (mut sim, gun, wall) = gunnery_range(damage, reattack_ms);
        attack(&mut sim, 0, gun, wall);
        for &ms in &ticks {
            sim.tick_with(ms);
        }

        let elapsed: u64 = ticks.iter().map(|&ms| u64::from(ms)).sum();
        prop_assert_eq!(sim.time_ms(), elapsed);
        let hits = elapsed / u64::from(reattack_ms);
        let health = sim.fight().state_of(sim.objects(), wall).unwrap().health;
        prop_assert_eq!(u64::from(1_000_000_000 - health), hits * u64::from(damage));
        prop_assert_eq!(sim.fight().phase_of(sim.objects(), gun), AttackPhase::Attack);
    }
}

#[test]
fn damage_per_second_is_exact_over_long_runs() {
    let (mut sim, gun, wall) = gunnery_range(7, 300);
    attack(&mut sim, 0, gun, wall);
    // 60 simulated seconds in ticks of 9 and 11 ms.
    for i in 0..6000 {
        sim.tick_with(if i % 2 == 0 { 9 } else { 11 });
    }
    let health = sim.fight().state_of(sim.objects(), wall).unwrap().health;
    assert_eq!(1_000_000_000 - health, 7 * 60_000 / 300);
}

#[test]
fn opposite_islands_never_engage() {
    let mut sim = simulation(split_terrain(16, 8));
    let west = spawn(&mut sim, 0, SOLDIER, 2, 3);
    let east = spawn(&mut sim, 1, SOLDIER, 13, 3);
    attack(&mut sim, 0, west, east);
    attack(&mut sim, 1, east, west);

    let mut events = Vec::new();
    for _ in 0..300 {
        events.extend(sim.tick().events);
        assert_eq!(sim.fight().phase_of(sim.objects(), west), AttackPhase::None);
        assert_eq!(sim.fight().phase_of(sim.objects(), east), AttackPhase::None);
    }
    assert!(fight_events(&events, west).is_empty());
    assert!(fight_events(&events, east).is_empty());
    assert!(!sim.movement().has_route(west));
    assert!(!sim.movement().has_route(east));
}

#[test]
fn move_order_cancels_attack() {
    let mut sim = simulation(flat_terrain(12, 12));
    let soldier = spawn(&mut sim, 0, SOLDIER, 2, 2);
    let tower = spawn(&mut sim, 1, TOWER, 3, 2);
    attack(&mut sim, 0, soldier, tower);
    sim.tick();
    assert_eq!(sim.fight().phase_of(sim.objects(), soldier), AttackPhase::Attack);
    let health = sim.fight().state_of(sim.objects(), tower).unwrap().health;

    sim.issue_command(PlayerId(0), vec![soldier], CommandKind::ObjectToTerrain(CellPos::new(2, 8)))
        .unwrap();
    let events = sim.tick().events;
    assert_eq!(sim.fight().phase_of(sim.objects(), soldier), AttackPhase::None);
    assert_eq!(fight_events(&events, soldier), vec![AttackPhase::None]);
    assert!(events.contains(&SimEvent::RouteAdded {
        object: soldier,
        issuer: Issuer::Command,
    }));

    let route = sim.movement().route(soldier).unwrap();
    assert_eq!(route.target(), CellPos::new(2, 8));
    assert_eq!(route.issuer(), Issuer::Command);

    for _ in 0..500 {
        sim.tick();
    }
    assert_eq!(sim.object(soldier).unwrap().pose.position(), at(2, 8));
    assert_eq!(sim.fight().state_of(sim.objects(), tower).unwrap().health, health);
}

#[test]
fn move_order_without_a_route_still_cancels_attack() {
    let mut sim = simulation(split_terrain(16, 8));
    let soldier = spawn(&mut sim, 0, SOLDIER, 5, 3);
    let tower = spawn(&mut sim, 1, TOWER, 6, 3);

    // Its own cell, then a cell on the far side of the wall.
    for target in [CellPos::new(5, 3), CellPos::new(12, 3)] {
        attack(&mut sim, 0, soldier, tower);
        sim.tick();
        assert_eq!(sim.fight().phase_of(sim.objects(), soldier), AttackPhase::Attack);
        let health = sim.fight().state_of(sim.objects(), tower).unwrap().health;

        sim.issue_command(PlayerId(0), vec![soldier], CommandKind::ObjectToTerrain(target))
            .unwrap();
        let events = sim.tick().events;
        assert_eq!(fight_events(&events, soldier), vec![AttackPhase::None]);
        assert!(!sim.movement().has_route(soldier));

        for _ in 0..50 {
            sim.tick();
        }
        assert_eq!(sim.fight().phase_of(sim.objects(), soldier), AttackPhase::None);
        assert_eq!(sim.fight().state_of(sim.objects(), tower).unwrap().health, health);
        assert_eq!(sim.object(soldier).unwrap().pose.position(), at(5, 3));
    }
}

#[test]
fn target_death_is_reported_once() {
    let mut sim = simulation(flat_terrain(12, 12));
    let recorder = Rc::new(Recorder::default());
    let listener: Rc<dyn SimListener> = recorder.clone();
    assert!(sim.add_listener_once(EventKind::Existence, listener.clone()));
    assert!(!sim.add_listener_once(EventKind::Existence, listener.clone()));

    let soldier = spawn(&mut sim, 0, SOLDIER, 2, 2);
    let helper = spawn(&mut sim, 0, SOLDIER, 3, 3);
    let tower = spawn(&mut sim, 1, TOWER, 3, 2);
    attack(&mut sim, 0, soldier, tower);
    attack(&mut sim, 0, helper, tower);

    let mut destroyed = Vec::new();
    for _ in 0..400 {
        destroyed.extend(sim.tick().destroyed());
    }

    assert_eq!(destroyed.len(), 1);
    assert_eq!(destroyed[0].0, tower);
    assert!(sim.object(tower).is_none());
    assert_eq!(sim.fight().phase_of(sim.objects(), soldier), AttackPhase::None);
    assert_eq!(sim.fight().phase_of(sim.objects(), helper), AttackPhase::None);

    let seen = recorder.events.borrow();
    let reported = seen
        .iter()
        .filter(|e| matches!(e, SimEvent::ObjectDestroyed { object, .. } if *object == tower))
        .count();
    assert_eq!(reported, 1);
    assert!(seen.contains(&SimEvent::ObjectRemoved(tower)));
    drop(seen);

    assert!(sim.remove_listener(EventKind::Existence, &listener));
    let before = recorder.events.borrow().len();
    spawn(&mut sim, 0, SOLDIER, 8, 8);
    assert_eq!(recorder.events.borrow().len(), before);
}

#[test]
fn en_route_attacker_turns_in_place() {
    let mut sim = simulation(flat_terrain(12, 12));
    let tank = sim
        .spawn_object(SpawnParams {
            yaw: rts_sim::math::PI,
            ..SpawnParams::new(PlayerId(0), TANK, at(2, 2))
        })
        .unwrap();
    let tower = spawn(&mut sim, 1, TOWER, 5, 2);
    attack(&mut sim, 0, tank, tower);

    let mut phases = Vec::new();
    for _ in 0..200 {
        phases.extend(fight_events(&sim.tick().events, tank));
    }
    assert_eq!(phases.first(), Some(&AttackPhase::Turning));
    assert!(phases.contains(&AttackPhase::Attack));
    assert!(!sim.movement().has_route(tank));
    assert_eq!(sim.object(tank).unwrap().pose.position(), at(2, 2));
    assert!(sim.fight().state_of(sim.objects(), tower).unwrap().health < 40);
}

#[test]
fn out_of_range_attacker_approaches() {
    let mut sim = simulation(flat_terrain(16, 8));
    let soldier = spawn(&mut sim, 0, SOLDIER, 1, 4);
    let tower = spawn(&mut sim, 1, TOWER, 12, 4);
    attack(&mut sim, 0, soldier, tower);

    let first = sim.tick();
    assert_eq!(fight_events(&first.events, soldier), vec![AttackPhase::Approach]);
    assert_eq!(sim.movement().route(soldier).unwrap().issuer(), Issuer::Fight);

    let mut destroyed = Vec::new();
    for _ in 0..1500 {
        destroyed.extend(sim.tick().destroyed());
    }
    assert_eq!(destroyed, vec![(tower, soldier)]);
    let position = sim.object(soldier).unwrap().pose.position();
    assert!(position.distance(at(12, 4)) <= Fixed::from_num(2.5));
}
