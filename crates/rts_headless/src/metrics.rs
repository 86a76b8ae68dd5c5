//! Run metrics.
//!
//! [`EventTally`] subscribes to the simulation's event bus and counts what
//! it sees; [`RunSummary`] is the JSON report a run produces.

use std::cell::RefCell;
use std::collections::BTreeMap;

use rts_sim::prelude::*;
use serde::{Deserialize, Serialize};

/// Event kinds a tally subscribes to.
pub const TALLIED_KINDS: [EventKind; 5] = [
    EventKind::Existence,
    EventKind::Pose,
    EventKind::Fight,
    EventKind::Work,
    EventKind::Route,
];

/// Counts events by name.
#[derive(Debug, Default)]
pub struct EventTally {
    counts: RefCell<BTreeMap<&'static str, u64>>,
}

impl EventTally {
    /// Snapshot of the counts so far.
    pub fn counts(&self) -> BTreeMap<String, u64> {
        self.counts
            .borrow()
            .iter()
            .map(|(name, count)| ((*name).to_string(), *count))
            .collect()
    }
}

fn event_name(event: &SimEvent) -> &'static str {
    match event {
        SimEvent::ObjectAdded(_) => "object_added",
        SimEvent::ObjectRemoved(_) => "object_removed",
        SimEvent::ObjectDestroyed { .. } => "object_destroyed",
        SimEvent::PoseChanged(_) => "pose_changed",
        SimEvent::FightStateChanged { .. } => "fight_state_changed",
        SimEvent::WorkStateChanged { .. } => "work_state_changed",
        SimEvent::RouteAdded { .. } => "route_added",
        SimEvent::RouteRemoved { .. } => "route_removed",
    }
}

impl SimListener for EventTally {
    fn on_event(&self, event: &SimEvent) {
        *self.counts.borrow_mut().entry(event_name(event)).or_default() += 1;
    }
}

/// One destroyed unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Kill {
    /// Tick the unit died on.
    pub tick: u64,
    /// Label of the destroyed unit.
    pub victim: String,
    /// Label of the unit that landed the last hit.
    pub killer: String,
}

/// Report of a finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Scenario name.
    pub scenario: String,
    /// Tick count at the end of the run.
    pub ticks: u64,
    /// Simulated time at the end of the run.
    pub time_ms: u64,
    /// Final simulation state hash (for determinism validation).
    pub final_state_hash: u64,
    /// Orders the simulation accepted.
    pub orders_issued: u64,
    /// Orders skipped or rejected, usually because a unit had died.
    pub orders_rejected: u64,
    /// Event counts by name.
    pub events: BTreeMap<String, u64>,
    /// Destroyed units, in order.
    pub kills: Vec<Kill>,
    /// Surviving objects per player.
    pub survivors: BTreeMap<u8, u32>,
}

impl RunSummary {
    /// Players that still own at least one object.
    pub fn standing_players(&self) -> Vec<u8> {
        self.survivors
            .iter()
            .filter(|(_, &count)| count > 0)
            .map(|(&player, _)| player)
            .collect()
    }
}
