//! Resource gathering.
//!
//! Shaped like the fight subsystem: a worker walks into range of a resource
//! and then works it until told otherwise. Gathering itself yields nothing
//! yet; the subsystem only tracks where each worker is in that cycle.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::SimContext;
use crate::events::{Issuer, RouteEndReason, SimEvent};
use crate::math::Fixed;
use crate::movement::{MovementSubsystem, RouteRequest};
use crate::objects::{ObjectId, ObjectTable};

/// Work progress of one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum WorkPhase {
    /// Idle.
    #[default]
    None,
    /// Walking to the resource.
    Approach,
    /// In range of the resource.
    Working,
}

/// Work data of one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkState {
    /// Resource being worked.
    pub target: ObjectId,
    /// Progress.
    pub phase: WorkPhase,
}

/// Tracks workers.
#[derive(Debug, Clone, Default)]
pub struct WorkSubsystem {
    states: BTreeMap<ObjectId, WorkState>,
}

impl WorkSubsystem {
    /// Create an empty subsystem.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted states.
    #[must_use]
    pub fn from_states(states: impl IntoIterator<Item = (ObjectId, WorkState)>) -> Self {
        Self {
            states: states.into_iter().collect(),
        }
    }

    /// All active workers in id order.
    pub fn states(&self) -> impl Iterator<Item = (ObjectId, WorkState)> + '_ {
        self.states.iter().map(|(&id, &state)| (id, state))
    }

    /// Phase of an object.
    #[must_use]
    pub fn phase_of(&self, id: ObjectId) -> WorkPhase {
        self.states.get(&id).map_or(WorkPhase::None, |s| s.phase)
    }

    /// Order `worker` to work `target`. Returns false if the worker cannot
    /// work, the target is not a resource or cannot be reached.
    pub fn work(
        &mut self,
        ctx: &SimContext<'_>,
        objects: &ObjectTable,
        movement: &mut MovementSubsystem,
        out: &mut Vec<SimEvent>,
        worker: ObjectId,
        target: ObjectId,
    ) -> bool {
        let (Some(object), Some(resource)) = (objects.get(worker), objects.get(target)) else {
            return false;
        };
        if worker == target || !ctx.prototypes.of(resource.type_index).resource {
            return false;
        }
        if ctx.prototypes.of(object.type_index).work.is_none() {
            return false;
        }
        self.stop(worker, out);
        match approach(ctx, objects, movement, out, worker, target) {
            Some(phase) => {
                self.states.insert(
                    worker,
                    WorkState {
                        target,
                        phase: WorkPhase::None,
                    },
                );
                self.set_phase(worker, phase, out);
                true
            }
            None => {
                debug!(worker = worker.0, target = target.0, "Work refused");
                false
            }
        }
    }

    /// Advance every worker.
    pub fn tick(
        &mut self,
        ctx: &SimContext<'_>,
        objects: &ObjectTable,
        movement: &mut MovementSubsystem,
        out: &mut Vec<SimEvent>,
    ) {
        let workers: Vec<(ObjectId, WorkState)> = self.states().collect();
        for (worker, state) in workers {
            if !objects.contains(worker) || !objects.contains(state.target) {
                self.stop(worker, out);
                continue;
            }
            let next = match state.phase {
                WorkPhase::Approach if movement.has_route(worker) => continue,
                WorkPhase::None => continue,
                WorkPhase::Approach | WorkPhase::Working if in_range(ctx, objects, worker, state.target) => {
                    Some(WorkPhase::Working)
                }
                WorkPhase::Approach | WorkPhase::Working => {
                    approach(ctx, objects, movement, out, worker, state.target)
                }
            };
            match next {
                Some(phase) => self.set_phase(worker, phase, out),
                None => self.stop(worker, out),
            }
        }
    }

    /// Stop `worker` gathering. Returns whether it had a work order.
    pub fn cancel(&mut self, worker: ObjectId, out: &mut Vec<SimEvent>) -> bool {
        let active = self.states.contains_key(&worker);
        self.stop(worker, out);
        active
    }

    /// React to events raised elsewhere.
    pub fn on_event(&mut self, out: &mut Vec<SimEvent>, event: &SimEvent) {
        match *event {
            SimEvent::RouteAdded { object, issuer }
            | SimEvent::RouteRemoved {
                object,
                reason: RouteEndReason::Aborted,
                issuer,
            } if issuer != Issuer::Work => self.stop(object, out),
            SimEvent::ObjectRemoved(removed) => {
                self.states.remove(&removed);
                let idle: Vec<ObjectId> = self
                    .states
                    .iter()
                    .filter(|(_, s)| s.target == removed)
                    .map(|(&id, _)| id)
                    .collect();
                for worker in idle {
                    self.stop(worker, out);
                }
            }
            _ => {}
        }
    }

    fn set_phase(&mut self, worker: ObjectId, phase: WorkPhase, out: &mut Vec<SimEvent>) {
        let Some(state) = self.states.get_mut(&worker) else {
            return;
        };
        if state.phase != phase {
            debug!(worker = worker.0, from = ?state.phase, to = ?phase, "Work phase");
            state.phase = phase;
            out.push(SimEvent::WorkStateChanged { object: worker, phase });
        }
    }

    fn stop(&mut self, worker: ObjectId, out: &mut Vec<SimEvent>) {
        if let Some(state) = self.states.remove(&worker) {
            if state.phase != WorkPhase::None {
                debug!(worker = worker.0, "Work stopped");
                out.push(SimEvent::WorkStateChanged {
                    object: worker,
                    phase: WorkPhase::None,
                });
            }
        }
    }
}

fn work_range(ctx: &SimContext<'_>, objects: &ObjectTable, worker: ObjectId) -> Fixed {
    let object = objects.expect_object(worker);
    ctx.prototypes
        .of(object.type_index)
        .work
        .map_or(Fixed::ZERO, |w| w.range)
}

fn in_range(ctx: &SimContext<'_>, objects: &ObjectTable, worker: ObjectId, target: ObjectId) -> bool {
    let range = work_range(ctx, objects, worker);
    let a = objects.expect_object(worker).pose.position();
    let b = objects.expect_object(target).pose.position();
    a.distance_squared(b) <= range * range
}

fn approach(
    ctx: &SimContext<'_>,
    objects: &ObjectTable,
    movement: &mut MovementSubsystem,
    out: &mut Vec<SimEvent>,
    worker: ObjectId,
    target: ObjectId,
) -> Option<WorkPhase> {
    if in_range(ctx, objects, worker, target) {
        return Some(WorkPhase::Working);
    }
    let position = objects.expect_object(target).pose.position();
    let request = RouteRequest::new(Issuer::Work).within(work_range(ctx, objects, worker));
    let goal = ctx.terrain.clamped_cell_at(position);
    movement
        .create_route(ctx, objects, out, worker, goal, request)
        .then_some(WorkPhase::Approach)
}
