//! Scenario execution.
//!
//! [`ScenarioRun`] drives a simulation through a scenario's order schedule
//! one tick at a time. Orders due at tick `t` are issued before tick `t`
//! runs. Orders whose units have all died are counted as rejected rather
//! than failing the run.

use std::collections::BTreeMap;
use std::rc::Rc;

use rayon::prelude::*;
use rts_sim::prelude::*;
use std::result::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::metrics::{EventTally, Kill, RunSummary, TALLIED_KINDS};
use crate::scenario::{OrderAction, Scenario, ScenarioError, ScheduledOrder};

/// A scenario in progress.
pub struct ScenarioRun<'a> {
    scenario: &'a Scenario,
    sim: Simulation,
    labels: BTreeMap<String, ObjectId>,
    names: BTreeMap<ObjectId, String>,
    orders: Vec<&'a ScheduledOrder>,
    next_order: usize,
    tally: Rc<EventTally>,
    kills: Vec<Kill>,
    issued: u64,
    rejected: u64,
}

impl<'a> ScenarioRun<'a> {
    /// Set up a scenario at tick zero.
    pub fn new(scenario: &'a Scenario) -> Result<Self, ScenarioError> {
        let setup = scenario.setup()?;
        let names = setup.labels.iter().map(|(label, &id)| (id, label.clone())).collect();
        let mut orders: Vec<&ScheduledOrder> = scenario.orders.iter().collect();
        // Stable, so same-tick orders keep their listed order.
        orders.sort_by_key(|o| o.tick);

        let mut run = Self {
            scenario,
            sim: setup.sim,
            labels: setup.labels,
            names,
            orders,
            next_order: 0,
            tally: Rc::new(EventTally::default()),
            kills: Vec::new(),
            issued: 0,
            rejected: 0,
        };
        let listener: Rc<dyn SimListener> = run.tally.clone();
        for kind in TALLIED_KINDS {
            run.sim.add_listener_once(kind, listener.clone());
        }
        Ok(run)
    }

    /// Continue a scenario from bytes written by [`ScenarioRun::save`].
    ///
    /// Orders scheduled before the saved tick are considered issued.
    pub fn resume(scenario: &'a Scenario, bytes: &[u8]) -> Result<Self, ScenarioError> {
        let mut run = Self::new(scenario)?;
        let sim = Simulation::from_bytes(
            scenario.terrain()?,
            scenario.prototype_table()?,
            scenario.config,
            bytes,
        )?;
        run.sim = sim;
        let listener: Rc<dyn SimListener> = run.tally.clone();
        for kind in TALLIED_KINDS {
            run.sim.add_listener_once(kind, listener.clone());
        }
        let tick = run.sim.current_tick();
        run.next_order = run.orders.partition_point(|o| o.tick < tick);
        info!(scenario = %scenario.name, tick, "Resumed scenario");
        Ok(run)
    }

    /// The simulation being driven.
    pub fn simulation(&self) -> &Simulation {
        &self.sim
    }

    /// Object carrying a label, if it is still alive.
    pub fn unit(&self, label: &str) -> Option<ObjectId> {
        self.labels.get(label).copied().filter(|&id| self.sim.object(id).is_some())
    }

    /// Serialize the simulation state.
    pub fn save(&self) -> Result<Vec<u8>, ScenarioError> {
        Ok(self.sim.to_bytes()?)
    }

    /// Issue due orders, then advance one tick.
    pub fn step(&mut self) {
        let tick = self.sim.current_tick();
        while let Some(&order) = self.orders.get(self.next_order) {
            if order.tick > tick {
                break;
            }
            self.next_order += 1;
            self.issue(order);
        }

        let events = self.sim.tick();
        for (victim, killer) in events.destroyed() {
            let kill = Kill {
                tick: events.tick,
                victim: self.name_of(victim),
                killer: self.name_of(killer),
            };
            debug!(tick = kill.tick, victim = %kill.victim, killer = %kill.killer, "Unit destroyed");
            self.kills.push(kill);
        }
    }

    /// Step until the simulation reaches `tick`.
    pub fn run_until(&mut self, tick: u64) {
        while self.sim.current_tick() < tick {
            self.step();
        }
    }

    /// Report on the run so far.
    pub fn summary(&self) -> RunSummary {
        let mut survivors: BTreeMap<u8, u32> = self.scenario.units.iter().map(|u| (u.player, 0)).collect();
        for object in self.sim.objects().sorted_ids().into_iter().filter_map(|id| self.sim.object(id)) {
            *survivors.entry(object.player.0).or_default() += 1;
        }
        RunSummary {
            scenario: self.scenario.name.clone(),
            ticks: self.sim.current_tick(),
            time_ms: self.sim.time_ms(),
            final_state_hash: self.sim.state_hash(),
            orders_issued: self.issued,
            orders_rejected: self.rejected,
            events: self.tally.counts(),
            kills: self.kills.clone(),
            survivors,
        }
    }

    fn name_of(&self, id: ObjectId) -> String {
        self.names.get(&id).cloned().unwrap_or_else(|| format!("#{}", id.0))
    }

    fn issue(&mut self, order: &ScheduledOrder) {
        let sources: Vec<ObjectId> = order.units.iter().filter_map(|label| self.unit(label)).collect();
        let kind = match &order.action {
            OrderAction::MoveTo(x, y) => Some(CommandKind::ObjectToTerrain(CellPos::new(*x, *y))),
            OrderAction::Attack(target) | OrderAction::Gather(target) => {
                self.unit(target).map(CommandKind::ObjectToObject)
            }
        };
        let Some(kind) = kind.filter(|_| !sources.is_empty()) else {
            debug!(tick = order.tick, action = ?order.action, "Skipping order for dead units");
            self.rejected += 1;
            return;
        };
        match self.sim.issue_command(PlayerId(order.player), sources, kind) {
            Ok(id) => {
                debug!(tick = order.tick, command = ?id, "Issued order");
                self.issued += 1;
            }
            Err(e) => {
                warn!(tick = order.tick, error = %e, "Order rejected");
                self.rejected += 1;
            }
        }
    }
}

/// Run a scenario to completion. `ticks` overrides the scenario's length.
pub fn run_scenario(scenario: &Scenario, ticks: Option<u64>) -> Result<RunSummary, ScenarioError> {
    let mut run = ScenarioRun::new(scenario)?;
    run.run_until(ticks.unwrap_or(scenario.ticks));
    let summary = run.summary();
    info!(
        scenario = %summary.scenario,
        ticks = summary.ticks,
        kills = summary.kills.len(),
        hash = summary.final_state_hash,
        "Scenario finished"
    );
    Ok(summary)
}

/// Outcome of a determinism check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verification {
    /// Scenario name.
    pub scenario: String,
    /// Final hash of every independent run.
    pub hashes: Vec<u64>,
    /// Final hash after saving and resuming mid-run, if checked.
    pub resumed_hash: Option<u64>,
}

impl Verification {
    /// Whether every run, resumed or not, ended in the same state.
    pub fn is_deterministic(&self) -> bool {
        let first = self.hashes.first().copied();
        self.hashes.iter().all(|&h| Some(h) == first) && self.resumed_hash.map_or(true, |h| Some(h) == first)
    }
}

/// Run a scenario `runs` times in parallel and, with `split`, once more
/// through a save and resume at that tick.
pub fn verify_scenario(
    scenario: &Scenario,
    runs: usize,
    ticks: Option<u64>,
    split: Option<u64>,
) -> Result<Verification, ScenarioError> {
    let end = ticks.unwrap_or(scenario.ticks);
    // Simulations hold listeners by `Rc`; each worker builds its own.
    let hashes = (0..runs)
        .into_par_iter()
        .map(|_| run_scenario(scenario, Some(end)).map(|s| s.final_state_hash))
        .collect::<Result<Vec<_>, _>>()?;

    let resumed_hash = match split {
        Some(split) => {
            let mut first = ScenarioRun::new(scenario)?;
            first.run_until(split.min(end));
            let bytes = first.save()?;
            let mut second = ScenarioRun::resume(scenario, &bytes)?;
            second.run_until(end);
            Some(second.simulation().state_hash())
        }
        None => None,
    };

    let verification = Verification {
        scenario: scenario.name.clone(),
        hashes,
        resumed_hash,
    };
    if verification.is_deterministic() {
        info!(scenario = %verification.scenario, runs, "Runs agree");
    } else {
        warn!(scenario = %verification.scenario, hashes = ?verification.hashes, "Runs diverged");
    }
    Ok(verification)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SKIRMISH: &str = r#"
        Scenario(
            name: "Skirmish",
            map: Wall(width: 20, height: 10, column: 10, gap: Some(5)),
            prototypes: Inline([
                (name: "soldier", mobility: Ground, speed: 2.0, turn_speed: 8.0, action_cost: 1, health: 60,
                 fight: Some((damage: 10, range: 2.0, reattack_ms: 250))),
                (name: "tower", health: 40, fight: Some((damage: 5, range: 3.0, reattack_ms: 500))),
            ]),
            ticks: 2500,
            units: [
                (label: "a1", player: 0, prototype: "soldier", cell: (2, 2)),
                (label: "a2", player: 0, prototype: "soldier", cell: (2, 6)),
                (label: "t", player: 1, prototype: "tower", cell: (17, 5)),
            ],
            orders: [
                (tick: 0, player: 0, units: ["a1", "a2"], action: Attack("t")),
                (tick: 2400, player: 0, units: ["a1"], action: Attack("t")),
            ],
        )
    "#;

    fn skirmish() -> Scenario {
        Scenario::from_ron_str(SKIRMISH).unwrap()
    }

    #[test]
    fn skirmish_destroys_the_tower() {
        let summary = run_scenario(&skirmish(), None).unwrap();
        assert_eq!(summary.ticks, 2500);
        assert_eq!(summary.time_ms, 25_000);
        assert_eq!(summary.orders_issued, 1);
        // The second order targets a dead tower.
        assert_eq!(summary.orders_rejected, 1);
        assert_eq!(summary.kills.len(), 1);
        assert_eq!(summary.kills[0].victim, "t");
        assert!(summary.kills[0].killer.starts_with('a'));
        assert_eq!(summary.survivors[&1], 0);
        assert_eq!(summary.standing_players(), vec![0]);
        assert_eq!(summary.events["object_destroyed"], 1);
        assert_eq!(summary.events["object_removed"], 1);
    }

    #[test]
    fn orders_wait_for_their_tick() {
        let mut scenario = skirmish();
        scenario.orders[0].tick = 10;
        let mut run = ScenarioRun::new(&scenario).unwrap();
        run.run_until(10);
        let a1 = run.unit("a1").unwrap();
        assert!(!run.simulation().movement().has_route(a1));
        run.step();
        assert!(run.simulation().movement().has_route(a1));
    }

    #[test]
    fn verification_covers_resume() {
        let verification = verify_scenario(&skirmish(), 3, Some(600), Some(250)).unwrap();
        assert_eq!(verification.hashes.len(), 3);
        assert!(verification.resumed_hash.is_some());
        assert!(verification.is_deterministic());
    }

    #[test]
    fn resume_skips_issued_orders() {
        let scenario = skirmish();
        let mut run = ScenarioRun::new(&scenario).unwrap();
        run.run_until(50);
        let bytes = run.save().unwrap();

        let mut resumed = ScenarioRun::resume(&scenario, &bytes).unwrap();
        assert_eq!(resumed.simulation().current_tick(), 50);
        resumed.step();
        assert_eq!(resumed.summary().orders_issued, 0);
        run.step();
        assert_eq!(run.simulation().state_hash(), resumed.simulation().state_hash());
    }
}
