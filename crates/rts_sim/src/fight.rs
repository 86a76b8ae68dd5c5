//! Combat state machine.
//!
//! Every object that can attack or be damaged owns a [`FightState`] in a
//! [`FightPool`]; game objects refer to it by [`FightIndex`]. An attacker
//! moves through
//!
//! ```text
//! None -> Approach -> (Turning ->) Attack -> None
//! ```
//!
//! `Turning` is only used by en-route attackers, which can fire while
//! following a route. Everyone else is turned towards the target by an
//! orientation route during `Approach`.
//!
//! Hits use integer millisecond timestamps: each hit advances the last
//! attack time by exactly one cooldown, so the damage rate does not depend
//! on how tick boundaries fall.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::context::SimContext;
use crate::events::{Issuer, RouteEndReason, SimEvent};
use crate::math::Fixed;
use crate::movement::{MovementSubsystem, RouteRequest};
use crate::objects::{GameObject, ObjectId, ObjectTable};
use crate::pose::OrientationTarget;
use crate::prototype::{FightStats, GameObjectPrototype};

/// Slot of a [`FightState`] in the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FightIndex(pub u32);

/// Attack progress of one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AttackPhase {
    /// Not attacking.
    #[default]
    None,
    /// Walking into range, or being turned by an orientation route.
    Approach,
    /// En-route attacker turning in place to face the target.
    Turning,
    /// Firing on cooldown.
    Attack,
}

/// Combat data of one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FightState {
    /// Object this state belongs to.
    pub owner: ObjectId,
    /// Remaining health.
    pub health: u32,
    /// Current attack target.
    pub target: Option<ObjectId>,
    /// Attack progress.
    pub phase: AttackPhase,
    /// Simulation time of the last hit, in milliseconds.
    pub last_attack_ms: u64,
}

/// Dense storage of fight states with slot recycling.
///
/// Freeing a slot never moves other states, so indices held by game
/// objects stay valid.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FightPool {
    slots: Vec<Option<FightState>>,
    free: Vec<u32>,
}

impl FightPool {
    /// Create an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a state, reusing a freed slot if there is one.
    pub fn insert(&mut self, state: FightState) -> FightIndex {
        if let Some(slot) = self.free.pop() {
            self.slots[slot as usize] = Some(state);
            return FightIndex(slot);
        }
        let slot = u32::try_from(self.slots.len()).unwrap_or_else(|_| panic!("fight pool is full"));
        self.slots.push(Some(state));
        FightIndex(slot)
    }

    /// Free a slot.
    pub fn remove(&mut self, index: FightIndex) -> Option<FightState> {
        let state = self.slots.get_mut(index.0 as usize)?.take()?;
        self.free.push(index.0);
        Some(state)
    }

    /// State in a slot.
    #[must_use]
    pub fn get(&self, index: FightIndex) -> Option<&FightState> {
        self.slots.get(index.0 as usize)?.as_ref()
    }

    /// Mutable state in a slot.
    pub fn get_mut(&mut self, index: FightIndex) -> Option<&mut FightState> {
        self.slots.get_mut(index.0 as usize)?.as_mut()
    }

    /// Occupied slots in index order.
    pub fn iter(&self) -> impl Iterator<Item = (FightIndex, &FightState)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|s| (FightIndex(i as u32), s)))
    }

    /// Number of live states.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Check if no state is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn expect_mut(&mut self, index: FightIndex) -> &mut FightState {
        self.get_mut(index)
            .unwrap_or_else(|| panic!("fight slot {index:?} is empty"))
    }
}

fn set_phase(state: &mut FightState, phase: AttackPhase, out: &mut Vec<SimEvent>) {
    if state.phase == phase {
        return;
    }
    debug!(object = state.owner.0, from = ?state.phase, to = ?phase, "Fight phase");
    state.phase = phase;
    if phase == AttackPhase::None {
        state.target = None;
    }
    out.push(SimEvent::FightStateChanged {
        object: state.owner,
        phase,
    });
}

/// Timing of the tick being processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickClock {
    /// Simulation time at the end of the tick, in milliseconds.
    pub end_ms: u64,
    /// Length of the tick, in milliseconds.
    pub elapsed_ms: u32,
}

/// Owns fight states and drives attacks.
#[derive(Debug, Default)]
pub struct FightSubsystem {
    pool: FightPool,
}

impl FightSubsystem {
    /// Create an empty subsystem.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from a persisted pool.
    #[must_use]
    pub fn from_pool(pool: FightPool) -> Self {
        Self { pool }
    }

    /// The state pool.
    #[must_use]
    pub fn pool(&self) -> &FightPool {
        &self.pool
    }

    /// Allocate a state for a new object if its type fights or can be hurt.
    pub fn add_object(&mut self, owner: ObjectId, proto: &GameObjectPrototype) -> Option<FightIndex> {
        proto.has_fight_state().then(|| {
            self.pool.insert(FightState {
                owner,
                health: proto.health,
                target: None,
                phase: AttackPhase::None,
                last_attack_ms: 0,
            })
        })
    }

    /// Free the state of a removed object.
    pub fn remove_object(&mut self, index: Option<FightIndex>) {
        if let Some(index) = index {
            self.pool.remove(index);
        }
    }

    /// Fight state of an object.
    #[must_use]
    pub fn state_of(&self, objects: &ObjectTable, id: ObjectId) -> Option<&FightState> {
        self.pool.get(objects.get(id)?.fight?)
    }

    /// Phase of an object; objects without fight state are always `None`.
    #[must_use]
    pub fn phase_of(&self, objects: &ObjectTable, id: ObjectId) -> AttackPhase {
        self.state_of(objects, id).map_or(AttackPhase::None, |s| s.phase)
    }

    /// Order `attacker` to attack `target`.
    ///
    /// Returns false, leaving the attacker idle, when either object is
    /// missing, the attacker has no weapon, the target cannot be damaged or
    /// no approach route exists.
    pub fn attack(
        &mut self,
        ctx: &SimContext<'_>,
        objects: &ObjectTable,
        movement: &mut MovementSubsystem,
        out: &mut Vec<SimEvent>,
        attacker: ObjectId,
        target: ObjectId,
        clock: TickClock,
    ) -> bool {
        if attacker == target || !is_damageable(ctx, objects, target) {
            return false;
        }
        let Some(object) = objects.get(attacker) else {
            return false;
        };
        let (Some(stats), Some(slot)) = (ctx.prototypes.of(object.type_index).fight, object.fight) else {
            return false;
        };

        self.stand_down(slot, attacker, movement, out);
        match engage(ctx, objects, movement, out, attacker, target, stats) {
            Some(phase) => {
                let state = self.pool.expect_mut(slot);
                state.target = Some(target);
                enter(state, phase, stats, clock, out);
                true
            }
            None => {
                debug!(attacker = attacker.0, target = target.0, "Attack refused");
                false
            }
        }
    }

    /// Stop any attack `id` is carrying out, as a plain move order does.
    /// Returns whether it was attacking.
    pub fn cancel(
        &mut self,
        objects: &ObjectTable,
        movement: &mut MovementSubsystem,
        out: &mut Vec<SimEvent>,
        id: ObjectId,
    ) -> bool {
        let Some(slot) = objects.get(id).and_then(|o| o.fight) else {
            return false;
        };
        if self.pool.get(slot).map_or(true, |s| s.phase == AttackPhase::None) {
            return false;
        }
        self.stand_down(slot, id, movement, out);
        true
    }

    /// Advance every active attacker, in id order.
    pub fn tick(
        &mut self,
        ctx: &SimContext<'_>,
        objects: &mut ObjectTable,
        movement: &mut MovementSubsystem,
        out: &mut Vec<SimEvent>,
        clock: TickClock,
    ) {
        let mut active: Vec<(ObjectId, FightIndex)> = self
            .pool
            .iter()
            .filter(|(_, s)| s.phase != AttackPhase::None)
            .map(|(i, s)| (s.owner, i))
            .collect();
        active.sort_unstable();

        for (attacker, slot) in active {
            // Earlier attackers may have destroyed this one.
            if !objects.contains(attacker) {
                continue;
            }
            let Some(target) = self.pool.get(slot).map(|s| s.target) else {
                continue;
            };
            let target = match target {
                Some(target) if is_damageable(ctx, objects, target) => target,
                _ => {
                    self.stand_down(slot, attacker, movement, out);
                    continue;
                }
            };
            self.step(ctx, objects, movement, out, slot, attacker, target, clock);
        }
    }

    /// React to events raised elsewhere. Route changes this subsystem made
    /// itself are ignored.
    pub fn on_event(
        &mut self,
        objects: &ObjectTable,
        movement: &mut MovementSubsystem,
        out: &mut Vec<SimEvent>,
        event: &SimEvent,
    ) {
        match *event {
            SimEvent::RouteAdded { object, issuer }
            | SimEvent::RouteRemoved {
                object,
                reason: RouteEndReason::Aborted,
                issuer,
            } if issuer != Issuer::Fight => {
                if let Some(state) = objects.get(object).and_then(|o| o.fight).and_then(|i| self.pool.get_mut(i)) {
                    set_phase(state, AttackPhase::None, out);
                }
            }
            SimEvent::ObjectRemoved(removed) => {
                let hunters: Vec<(FightIndex, ObjectId)> = self
                    .pool
                    .iter()
                    .filter(|(_, s)| s.phase != AttackPhase::None && s.target == Some(removed))
                    .map(|(i, s)| (i, s.owner))
                    .collect();
                for (slot, owner) in hunters {
                    self.stand_down(slot, owner, movement, out);
                }
            }
            _ => {}
        }
    }

    /// Return to idle and drop the approach route, if this subsystem made it.
    fn stand_down(&mut self, slot: FightIndex, owner: ObjectId, movement: &mut MovementSubsystem, out: &mut Vec<SimEvent>) {
        set_phase(self.pool.expect_mut(slot), AttackPhase::None, out);
        if movement.route(owner).is_some_and(|r| r.issuer() == Issuer::Fight) {
            movement.abort_route(owner, Issuer::Fight, out);
        }
    }

    fn step(
        &mut self,
        ctx: &SimContext<'_>,
        objects: &mut ObjectTable,
        movement: &mut MovementSubsystem,
        out: &mut Vec<SimEvent>,
        slot: FightIndex,
        attacker: ObjectId,
        target: ObjectId,
        clock: TickClock,
    ) {
        let object = objects.expect_object(attacker);
        let Some(stats) = ctx.prototypes.of(object.type_index).fight else {
            self.stand_down(slot, attacker, movement, out);
            return;
        };
        let target_position = objects.expect_object(target).pose.position();
        let distance2 = object.pose.position().distance_squared(target_position);
        let in_range = distance2 <= stats.range * stats.range;
        let reach = stats.range + ctx.config.fight.range_hysteresis;
        let in_reach = distance2 <= reach * reach;
        let facing = object.pose.turn_to(OrientationTarget::Point(target_position)).abs()
            <= ctx.config.fight.angle_tolerance;
        let routed = movement.has_route(attacker);
        let phase = self.pool.expect_mut(slot).phase;

        let next = match phase {
            AttackPhase::None => return,
            AttackPhase::Approach if stats.en_route && in_range => Some(AttackPhase::Turning),
            AttackPhase::Approach if routed => return,
            AttackPhase::Approach if in_reach && (stats.en_route || facing) => {
                Some(if stats.en_route { AttackPhase::Turning } else { AttackPhase::Attack })
            }
            AttackPhase::Approach => engage(ctx, objects, movement, out, attacker, target, stats),
            AttackPhase::Turning | AttackPhase::Attack if !in_reach => {
                engage(ctx, objects, movement, out, attacker, target, stats)
            }
            AttackPhase::Turning if routed => Some(AttackPhase::Attack),
            AttackPhase::Turning => {
                let aim = OrientationTarget::Point(target_position);
                let aligned = movement.turn_in_place(ctx, objects, out, attacker, aim, clock.elapsed_ms);
                Some(if aligned { AttackPhase::Attack } else { AttackPhase::Turning })
            }
            AttackPhase::Attack if !stats.en_route && !facing && !routed => {
                engage(ctx, objects, movement, out, attacker, target, stats)
            }
            AttackPhase::Attack => Some(AttackPhase::Attack),
        };

        let Some(next) = next else {
            debug!(attacker = attacker.0, target = target.0, "Target out of reach");
            self.stand_down(slot, attacker, movement, out);
            return;
        };
        enter(self.pool.expect_mut(slot), next, stats, clock, out);
        if next == AttackPhase::Attack {
            self.fire(objects, movement, out, slot, target, stats, clock);
        }
    }

    /// Land every hit due by the end of the tick.
    fn fire(
        &mut self,
        objects: &mut ObjectTable,
        movement: &mut MovementSubsystem,
        out: &mut Vec<SimEvent>,
        slot: FightIndex,
        target: ObjectId,
        stats: FightStats,
        clock: TickClock,
    ) {
        let reattack = u64::from(stats.reattack_ms);
        let target_slot = objects
            .expect_object(target)
            .fight
            .unwrap_or_else(|| panic!("damageable object {target:?} has no fight state"));
        loop {
            let state = self.pool.expect_mut(slot);
            if state.last_attack_ms + reattack > clock.end_ms {
                return;
            }
            state.last_attack_ms += reattack;
            let attacker = state.owner;

            let victim = self.pool.expect_mut(target_slot);
            victim.health = victim.health.saturating_sub(stats.damage);
            trace!(attacker = attacker.0, target = target.0, health = victim.health, "Hit");
            if victim.health == 0 {
                self.destroy(objects, movement, out, target, attacker);
                self.stand_down(slot, attacker, movement, out);
                return;
            }
        }
    }

    fn destroy(
        &mut self,
        objects: &mut ObjectTable,
        movement: &mut MovementSubsystem,
        out: &mut Vec<SimEvent>,
        victim: ObjectId,
        by: ObjectId,
    ) {
        debug!(object = victim.0, by = by.0, "Object destroyed");
        out.push(SimEvent::ObjectDestroyed { object: victim, by });
        movement.remove_object(victim, out);
        let removed: Option<GameObject> = objects.remove(victim);
        self.remove_object(removed.and_then(|o| o.fight));
        out.push(SimEvent::ObjectRemoved(victim));
    }
}

/// Whether `id` exists and can take damage.
fn is_damageable(ctx: &SimContext<'_>, objects: &ObjectTable, id: ObjectId) -> bool {
    objects
        .get(id)
        .is_some_and(|o| o.fight.is_some() && ctx.prototypes.of(o.type_index).health > 0)
}

/// Pick the phase that gets `attacker` firing at `target`, creating the
/// routes it needs. `None` when the target cannot be reached.
fn engage(
    ctx: &SimContext<'_>,
    objects: &ObjectTable,
    movement: &mut MovementSubsystem,
    out: &mut Vec<SimEvent>,
    attacker: ObjectId,
    target: ObjectId,
    stats: FightStats,
) -> Option<AttackPhase> {
    let object = objects.expect_object(attacker);
    let target_object = objects.expect_object(target);
    let target_position = target_object.pose.position();
    let aim = OrientationTarget::Point(target_position);
    let in_range = object.pose.position().distance_squared(target_position) <= stats.range * stats.range;

    if in_range {
        if stats.en_route {
            return Some(AttackPhase::Turning);
        }
        if object.pose.turn_to(aim).abs() <= ctx.config.fight.angle_tolerance {
            movement.abort_route(attacker, Issuer::Fight, out);
            return Some(AttackPhase::Attack);
        }
        let here = ctx.terrain.clamped_cell_at(object.pose.position());
        let request = RouteRequest::new(Issuer::Fight).facing(aim);
        return movement
            .create_route(ctx, objects, out, attacker, here, request)
            .then_some(AttackPhase::Approach);
    }

    let approach = (stats.range - ctx.config.fight.range_hysteresis).max(Fixed::ZERO);
    let mut request = RouteRequest::new(Issuer::Fight).within(approach);
    if !stats.en_route {
        request = request.facing(aim);
    }
    let goal = ctx.terrain.clamped_cell_at(target_position);
    movement
        .create_route(ctx, objects, out, attacker, goal, request)
        .then_some(AttackPhase::Approach)
}

/// Switch phase; entering `Attack` arms the cooldown so the first hit lands
/// no earlier than one cooldown after the previous one.
fn enter(state: &mut FightState, phase: AttackPhase, stats: FightStats, clock: TickClock, out: &mut Vec<SimEvent>) {
    if phase == AttackPhase::Attack && state.phase != AttackPhase::Attack {
        let earliest = clock.end_ms.saturating_sub(u64::from(stats.reattack_ms));
        state.last_attack_ms = state.last_attack_ms.max(earliest);
    }
    set_phase(state, phase, out);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(owner: u32) -> FightState {
        FightState {
            owner: ObjectId(owner),
            health: 10,
            target: None,
            phase: AttackPhase::None,
            last_attack_ms: 0,
        }
    }

    #[test]
    fn test_pool_recycles_without_moving() {
        let mut pool = FightPool::new();
        let a = pool.insert(state(1));
        let b = pool.insert(state(2));
        let c = pool.insert(state(3));
        assert_eq!(pool.remove(b).unwrap().owner, ObjectId(2));
        assert!(pool.remove(b).is_none());
        assert_eq!(pool.get(a).unwrap().owner, ObjectId(1));
        assert_eq!(pool.get(c).unwrap().owner, ObjectId(3));
        assert_eq!(pool.len(), 2);
        let d = pool.insert(state(4));
        assert_eq!(d, b);
        assert_eq!(pool.iter().map(|(_, s)| s.owner.0).collect::<Vec<_>>(), vec![1, 4, 3]);
    }

    #[test]
    fn test_entering_attack_respects_previous_hit() {
        let stats = FightStats {
            damage: 1,
            range: Fixed::ONE,
            reattack_ms: 500,
            en_route: false,
        };
        let mut out = Vec::new();
        let mut s = state(1);
        enter(&mut s, AttackPhase::Attack, stats, TickClock { end_ms: 2000, elapsed_ms: 10 }, &mut out);
        assert_eq!(s.last_attack_ms, 1500);
        s.last_attack_ms = 1900;
        s.phase = AttackPhase::Approach;
        enter(&mut s, AttackPhase::Attack, stats, TickClock { end_ms: 2010, elapsed_ms: 10 }, &mut out);
        assert_eq!(s.last_attack_ms, 1900);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_none_clears_target() {
        let mut out = Vec::new();
        let mut s = state(1);
        s.target = Some(ObjectId(2));
        s.phase = AttackPhase::Attack;
        set_phase(&mut s, AttackPhase::None, &mut out);
        assert_eq!(s.target, None);
        assert_eq!(
            out,
            vec![SimEvent::FightStateChanged {
                object: ObjectId(1),
                phase: AttackPhase::None
            }]
        );
    }
}
