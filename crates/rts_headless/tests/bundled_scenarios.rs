//! Runs the scenarios shipped in `scenarios/`.

use std::path::PathBuf;

use rts_headless::{run_scenario, verify_scenario, Scenario, ScenarioRun};
use rts_sim::prelude::*;

fn scenario(name: &str) -> Scenario {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../scenarios")
        .join(name);
    Scenario::load(path).unwrap()
}

#[test]
fn every_bundled_scenario_sets_up() {
    for name in ["skirmish.ron", "gathering.ron", "hills.ron"] {
        let scenario = scenario(name);
        let setup = scenario.setup().unwrap();
        assert_eq!(setup.labels.len(), scenario.units.len(), "{name}");
    }
}

#[test]
fn skirmish_is_deterministic_through_a_save() {
    let verification = verify_scenario(&scenario("skirmish.ron"), 3, Some(1500), Some(700)).unwrap();
    assert!(verification.is_deterministic(), "{verification:?}");
}

#[test]
fn skirmish_produces_casualties() {
    let summary = run_scenario(&scenario("skirmish.ron"), None).unwrap();
    assert_eq!(summary.ticks, 4000);
    assert!(!summary.kills.is_empty());
    assert_eq!(summary.events["object_destroyed"], summary.kills.len() as u64);
    let alive: u32 = summary.survivors.values().sum();
    assert_eq!(alive as usize + summary.kills.len(), 7);
}

#[test]
fn gathering_workers_reach_the_ore() {
    let scenario = scenario("gathering.ron");
    let mut run = ScenarioRun::new(&scenario).unwrap();
    run.run_until(1900);
    let miner1 = run.unit("miner1").unwrap();
    let miner2 = run.unit("miner2").unwrap();
    assert_eq!(run.simulation().work().phase_of(miner1), WorkPhase::Working);
    assert_eq!(run.simulation().work().phase_of(miner2), WorkPhase::Working);

    run.run_until(2001);
    assert_eq!(run.simulation().work().phase_of(miner1), WorkPhase::Working);
    assert_eq!(run.simulation().work().phase_of(miner2), WorkPhase::None);

    let summary = run.summary();
    assert_eq!(summary.orders_issued, 4);
    assert_eq!(summary.orders_rejected, 0);
}

#[test]
fn hills_tank_destroys_the_tower() {
    let summary = run_scenario(&scenario("hills.ron"), None).unwrap();
    assert_eq!(summary.kills.len(), 1);
    assert_eq!(summary.kills[0].victim, "tower");
    assert_eq!(summary.kills[0].killer, "tank");
}
