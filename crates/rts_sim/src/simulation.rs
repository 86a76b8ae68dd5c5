//! Simulation model.
//!
//! Owns the world and one instance of each subsystem, and advances them in
//! a fixed order once per tick:
//!
//! 1. release affordable commands
//! 2. dispatch them to movement, fight or work
//! 3. tick movement, then fight, then work
//!
//! Events raised along the way are handed to the fight and work subsystems'
//! hooks and then to the registered listeners before the next step runs.
//!
//! # Determinism
//!
//! - All arithmetic is fixed-point
//! - Objects, routes, attackers and players are visited in id order
//! - Ids are never reused
//!
//! # Example
//!
//! ```
//! use rts_sim::prelude::*;
//!
//! let terrain = Terrain::flat(16, 16, Fixed::ZERO).unwrap();
//! let mut walker = GameObjectPrototype::named("walker");
//! walker.mobility = Mobility::Ground;
//! walker.speed = Fixed::from_num(2);
//! walker.turn_speed = Fixed::from_num(6);
//! walker.action_cost = 1;
//! let prototypes = PrototypeTable::new(vec![walker]).unwrap();
//!
//! let mut sim = Simulation::new(terrain, prototypes, SimConfig::default()).unwrap();
//! let unit = sim
//!     .spawn_object(SpawnParams::new(PlayerId(0), TypeIndex(0), CellPos::new(1, 1).center()))
//!     .unwrap();
//! sim.issue_command(PlayerId(0), vec![unit], CommandKind::ObjectToTerrain(CellPos::new(5, 1)))
//!     .unwrap();
//! for _ in 0..300 {
//!     sim.tick();
//! }
//! assert_eq!(sim.object(unit).unwrap().pose.position(), CellPos::new(5, 1).center());
//! ```

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeSet, VecDeque};
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::commands::{Command, CommandId, CommandKind, CommandQueue, CommandSource};
use crate::config::SimConfig;
use crate::context::SimContext;
use crate::error::{GameError, Result};
use crate::events::{EventBus, EventKind, Issuer, SimEvent, SimListener};
use crate::fight::{FightPool, FightSubsystem, TickClock};
use crate::math::{fixed_serde, Fixed, Vec2Fixed, Vec3Fixed};
use crate::movement::{MovementSubsystem, RouteRequest};
use crate::node_map::Footprint;
use crate::objects::{GameObject, ObjectId, ObjectTable, PlayerId};
use crate::pose::Pose;
use crate::prototype::{PrototypeTable, TypeIndex};
use crate::route::Route;
use crate::spatial::{Aabb, CullHit, CullOutput, CullParams, Culler, Frustum, SpatialIndex};
use crate::terrain::{CellPos, Terrain};
use crate::work::{WorkState, WorkSubsystem};

/// Parameters for spawning an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnParams {
    /// Owner.
    pub player: PlayerId,
    /// Prototype.
    pub type_index: TypeIndex,
    /// Ground position.
    pub position: Vec2Fixed,
    /// Heading in radians.
    #[serde(with = "fixed_serde")]
    pub yaw: Fixed,
}

impl SpawnParams {
    /// Spawn facing east.
    #[must_use]
    pub fn new(player: PlayerId, type_index: TypeIndex, position: Vec2Fixed) -> Self {
        Self {
            player,
            type_index,
            position,
            yaw: Fixed::ZERO,
        }
    }
}

/// Events produced by one tick, in delivery order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickEvents {
    /// Index of the tick that produced them.
    pub tick: u64,
    /// The events.
    pub events: Vec<SimEvent>,
}

impl TickEvents {
    /// `(destroyed, attacker)` pairs.
    pub fn destroyed(&self) -> impl Iterator<Item = (ObjectId, ObjectId)> + '_ {
        self.events.iter().filter_map(|e| match *e {
            SimEvent::ObjectDestroyed { object, by } => Some((object, by)),
            _ => None,
        })
    }

    /// Check if the tick changed nothing observable.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Persisted form of one object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRecord {
    /// Identifier.
    pub id: ObjectId,
    /// Owner.
    pub player: PlayerId,
    /// Prototype.
    pub type_index: TypeIndex,
    /// Ground position.
    pub position: Vec2Fixed,
    /// Heading.
    #[serde(with = "fixed_serde")]
    pub yaw: Fixed,
    /// Fight pool slot.
    pub fight: Option<crate::fight::FightIndex>,
}

/// Flat records of the whole mutable state. Terrain, index, prototypes and
/// config are persisted separately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimSnapshot {
    /// Ticks run so far.
    pub tick: u64,
    /// Simulated milliseconds so far.
    pub time_ms: u64,
    /// Next object id to hand out.
    pub next_object_id: u32,
    /// Objects in id order.
    pub objects: Vec<ObjectRecord>,
    /// Routes in object order.
    pub routes: Vec<Route>,
    /// Fight states.
    pub fight_pool: FightPool,
    /// Work states in object order.
    pub work: Vec<(ObjectId, WorkState)>,
    /// Pending commands and budgets.
    pub commands: CommandQueue,
}

/// The simulation.
#[derive(Debug)]
pub struct Simulation {
    terrain: Terrain,
    index: SpatialIndex,
    prototypes: PrototypeTable,
    config: SimConfig,
    objects: ObjectTable,
    movement: MovementSubsystem,
    fight: FightSubsystem,
    work: WorkSubsystem,
    commands: CommandQueue,
    bus: EventBus,
    tick: u64,
    time_ms: u64,
}

/// Borrow the read-only world of a simulation field by field, so the
/// subsystems stay mutably borrowable.
macro_rules! context {
    ($sim:expr) => {
        SimContext {
            terrain: &$sim.terrain,
            index: &$sim.index,
            prototypes: &$sim.prototypes,
            config: &$sim.config,
        }
    };
}

impl Simulation {
    /// Create an empty simulation, building the spatial index.
    ///
    /// # Errors
    ///
    /// Returns the error of [`SimConfig::validate`].
    pub fn new(terrain: Terrain, prototypes: PrototypeTable, config: SimConfig) -> Result<Self> {
        let index = SpatialIndex::build(&terrain);
        Self::with_index(terrain, index, prototypes, config)
    }

    /// Create an empty simulation around a prebuilt (e.g. cached) index.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::InvalidState`] if the index does not match the
    /// terrain size, or the error of [`SimConfig::validate`].
    pub fn with_index(
        terrain: Terrain,
        index: SpatialIndex,
        prototypes: PrototypeTable,
        config: SimConfig,
    ) -> Result<Self> {
        config.validate()?;
        if index.width() != terrain.width() || index.height() != terrain.height() {
            return Err(GameError::InvalidState(format!(
                "index is {}x{} but terrain is {}x{}",
                index.width(),
                index.height(),
                terrain.width(),
                terrain.height()
            )));
        }
        Ok(Self {
            commands: CommandQueue::new(config.action_points, config.ticks_per_second()),
            terrain,
            index,
            prototypes,
            config,
            objects: ObjectTable::new(),
            movement: MovementSubsystem::new(),
            fight: FightSubsystem::new(),
            work: WorkSubsystem::new(),
            bus: EventBus::new(),
            tick: 0,
            time_ms: 0,
        })
    }

    /// Ticks run so far.
    #[must_use]
    pub const fn current_tick(&self) -> u64 {
        self.tick
    }

    /// Simulated milliseconds so far.
    #[must_use]
    pub const fn time_ms(&self) -> u64 {
        self.time_ms
    }

    /// Terrain.
    #[must_use]
    pub fn terrain(&self) -> &Terrain {
        &self.terrain
    }

    /// Spatial index.
    #[must_use]
    pub fn index(&self) -> &SpatialIndex {
        &self.index
    }

    /// Prototype table.
    #[must_use]
    pub fn prototypes(&self) -> &PrototypeTable {
        &self.prototypes
    }

    /// Configuration.
    #[must_use]
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// All live objects.
    #[must_use]
    pub fn objects(&self) -> &ObjectTable {
        &self.objects
    }

    /// One object.
    #[must_use]
    pub fn object(&self, id: ObjectId) -> Option<&GameObject> {
        self.objects.get(id)
    }

    /// Movement subsystem.
    #[must_use]
    pub fn movement(&self) -> &MovementSubsystem {
        &self.movement
    }

    /// Fight subsystem.
    #[must_use]
    pub fn fight(&self) -> &FightSubsystem {
        &self.fight
    }

    /// Work subsystem.
    #[must_use]
    pub fn work(&self) -> &WorkSubsystem {
        &self.work
    }

    /// Command queue.
    #[must_use]
    pub fn commands(&self) -> &CommandQueue {
        &self.commands
    }

    /// Subscribe a listener to a kind of event. Registering the same
    /// instance twice has no effect; returns whether it was added.
    pub fn add_listener_once(&mut self, kind: EventKind, listener: Rc<dyn SimListener>) -> bool {
        self.bus.add_listener_once(kind, listener)
    }

    /// Unsubscribe a listener.
    pub fn remove_listener(&mut self, kind: EventKind, listener: &Rc<dyn SimListener>) -> bool {
        self.bus.remove_listener(kind, listener)
    }

    /// Add an object to the world.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::UnknownPrototype`] for a bad type index, or
    /// [`GameError::CellOutOfBounds`] when the position is off the terrain.
    pub fn spawn_object(&mut self, params: SpawnParams) -> Result<ObjectId> {
        let proto = self.prototypes.get(params.type_index)?;
        if self.terrain.cell_at(params.position).is_none() {
            return Err(GameError::CellOutOfBounds {
                x: params.position.x.to_num::<i64>(),
                y: params.position.y.to_num::<i64>(),
                width: self.terrain.width(),
                height: self.terrain.height(),
            });
        }
        let id = self.objects.allocate_id();
        let object = GameObject {
            id,
            player: params.player,
            type_index: params.type_index,
            pose: Pose::on_terrain(&self.terrain, params.position, params.yaw),
            fight: self.fight.add_object(id, proto),
        };
        self.movement.add_object(&context!(self), &object);
        self.objects.insert(object);
        debug!(object = id.0, player = params.player.0, name = %proto.name, "Object spawned");

        let mut log = Vec::new();
        self.deliver(vec![SimEvent::ObjectAdded(id)], &mut log);
        Ok(id)
    }

    /// Remove an object, e.g. on behalf of game-end logic.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::ObjectNotFound`] if the object does not exist.
    pub fn remove_object(&mut self, id: ObjectId) -> Result<()> {
        let Some(object) = self.objects.remove(id) else {
            return Err(GameError::ObjectNotFound(id.0));
        };
        let mut raised = Vec::new();
        self.movement.remove_object(id, &mut raised);
        self.fight.remove_object(object.fight);
        raised.push(SimEvent::ObjectRemoved(id));
        debug!(object = id.0, "Object removed");

        let mut log = Vec::new();
        self.deliver(raised, &mut log);
        Ok(())
    }

    /// Queue a command for `sources`, all owned by `player`.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::InvalidCommand`] for an empty or foreign source
    /// list or a self-targeting command, [`GameError::ObjectNotFound`] for
    /// missing objects and [`GameError::CellOutOfBounds`] for a target cell
    /// off the terrain.
    pub fn issue_command(&mut self, player: PlayerId, sources: Vec<ObjectId>, kind: CommandKind) -> Result<CommandId> {
        if sources.is_empty() {
            return Err(GameError::InvalidCommand("command has no sources".into()));
        }
        let mut cost: u32 = 0;
        for &source in &sources {
            let object = self.objects.get(source).ok_or(GameError::ObjectNotFound(source.0))?;
            if object.player != player {
                return Err(GameError::InvalidCommand(format!(
                    "object {} does not belong to player {}",
                    source.0, player.0
                )));
            }
            cost = cost.saturating_add(self.prototypes.of(object.type_index).action_cost);
        }
        match kind {
            CommandKind::ObjectToObject(target) => {
                if !self.objects.contains(target) {
                    return Err(GameError::ObjectNotFound(target.0));
                }
                if sources.contains(&target) {
                    return Err(GameError::InvalidCommand("object cannot target itself".into()));
                }
            }
            CommandKind::ObjectToTerrain(cell) => self.terrain.check_cell(cell)?,
        }
        Ok(self.commands.push(player, sources, kind, cost))
    }

    /// Run one tick of the configured duration.
    pub fn tick(&mut self) -> TickEvents {
        self.tick_with(self.config.tick_duration_ms)
    }

    /// Run one tick lasting `elapsed_ms`.
    pub fn tick_with(&mut self, elapsed_ms: u32) -> TickEvents {
        let clock = TickClock {
            end_ms: self.time_ms + u64::from(elapsed_ms),
            elapsed_ms,
        };
        let mut log = Vec::new();

        let objects = &self.objects;
        let released = self
            .commands
            .release(self.tick, |c| c.sources.iter().any(|&s| objects.contains(s)));
        for command in released {
            self.dispatch(&command, clock, &mut log);
        }

        let mut raised = Vec::new();
        self.movement
            .tick(&context!(self), &mut self.objects, &mut raised, elapsed_ms);
        self.deliver(raised, &mut log);

        let mut raised = Vec::new();
        self.fight.tick(
            &context!(self),
            &mut self.objects,
            &mut self.movement,
            &mut raised,
            clock,
        );
        self.deliver(raised, &mut log);

        let mut raised = Vec::new();
        self.work
            .tick(&context!(self), &self.objects, &mut self.movement, &mut raised);
        self.deliver(raised, &mut log);

        let tick = self.tick;
        self.tick += 1;
        self.time_ms = clock.end_ms;

        #[cfg(debug_assertions)]
        {
            let hash = self.state_hash();
            tracing::debug!(tick, state_hash = hash, "Simulation state hash");
        }

        TickEvents { tick, events: log }
    }

    fn dispatch(&mut self, command: &Command, clock: TickClock, log: &mut Vec<SimEvent>) {
        match command.source {
            CommandSource::GameObject => {}
        }
        for &source in &command.sources {
            let Some(object) = self.objects.get(source) else {
                continue;
            };
            let proto = self.prototypes.of(object.type_index);
            let mut raised = Vec::new();
            match command.kind {
                CommandKind::ObjectToTerrain(cell) => {
                    // A move order ends any attack or work even when no
                    // route results from it.
                    self.fight
                        .cancel(&self.objects, &mut self.movement, &mut raised, source);
                    self.work.cancel(source, &mut raised);
                    self.movement.create_route(
                        &context!(self),
                        &self.objects,
                        &mut raised,
                        source,
                        cell,
                        RouteRequest::new(Issuer::Command),
                    );
                }
                CommandKind::ObjectToObject(target) => {
                    let resource = self
                        .objects
                        .get(target)
                        .is_some_and(|t| self.prototypes.of(t.type_index).resource);
                    if resource && proto.work.is_some() {
                        self.work.work(
                            &context!(self),
                            &self.objects,
                            &mut self.movement,
                            &mut raised,
                            source,
                            target,
                        );
                    } else if proto.fight.is_some() {
                        self.fight.attack(
                            &context!(self),
                            &self.objects,
                            &mut self.movement,
                            &mut raised,
                            source,
                            target,
                            clock,
                        );
                    }
                }
            }
            self.deliver(raised, log);
        }
    }

    /// Hand events to the subsystem hooks and the listeners, following up
    /// on whatever the hooks raise in turn.
    fn deliver(&mut self, raised: Vec<SimEvent>, log: &mut Vec<SimEvent>) {
        let mut queue: VecDeque<SimEvent> = raised.into();
        while let Some(event) = queue.pop_front() {
            let mut more = Vec::new();
            self.fight
                .on_event(&self.objects, &mut self.movement, &mut more, &event);
            self.work.on_event(&mut more, &event);
            self.bus.publish(&event);
            log.push(event);
            queue.extend(more);
        }
    }

    /// The object covering a cell, lowest id first. `None` off the terrain.
    #[must_use]
    pub fn object_at_cell(&self, cell: CellPos) -> Option<ObjectId> {
        if !self.index.in_bounds(cell) {
            return None;
        }
        let leaf = self.index.leaf_for_cell(cell);
        self.movement.node_map().objects_in_node(leaf).first().copied()
    }

    /// Objects covering any node or cell the culler finds visible, sorted.
    #[must_use]
    pub fn visible_objects(&self, culler: &Culler, frustum: &Frustum) -> Vec<ObjectId> {
        let params = CullParams {
            output: CullOutput::Nodes,
            ..CullParams::default()
        };
        let node_map = self.movement.node_map();
        let mut visible = BTreeSet::new();
        for hit in culler.cull(&self.index, frustum, params) {
            match hit {
                CullHit::Node(node) => {
                    for leaf in self.index.leaves_of(node) {
                        visible.extend(node_map.objects_in_node(leaf).iter().copied());
                    }
                }
                CullHit::Cell(cell) => {
                    visible.extend(node_map.objects_in_node(self.index.leaf_for_cell(cell)).iter().copied());
                }
            }
        }
        visible.into_iter().collect()
    }

    /// World-space box around an object: its footprint bounds, from the
    /// lowest terrain under them up to body height above the highest.
    #[must_use]
    pub fn get_transformed_bounding_box(&self, id: ObjectId) -> Option<Aabb> {
        let object = self.objects.get(id)?;
        let proto = self.prototypes.of(object.type_index);
        let (min, max) = Footprint::new(&object.pose, proto.footprint).bounds();
        let corners = [
            min,
            Vec2Fixed::new(max.x, min.y),
            Vec2Fixed::new(min.x, max.y),
            max,
        ];
        let heights = corners.map(|c| self.terrain.height_at(c));
        let low = heights.iter().copied().fold(object.pose.height(), Fixed::min);
        let high = heights.iter().copied().fold(object.pose.height(), Fixed::max);
        Some(Aabb {
            min: Vec3Fixed::new(min.x, min.y, low),
            max: Vec3Fixed::new(max.x, max.y, high + proto.body_height),
        })
    }

    /// Height route planning sees under a pose.
    #[must_use]
    pub fn path_finding_height(&self, pose: &Pose) -> Fixed {
        self.movement.path_finding_height(&context!(self), pose)
    }

    /// Hash of the mutable state, for desync checks.
    #[must_use]
    pub fn state_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.tick.hash(&mut hasher);
        self.time_ms.hash(&mut hasher);
        for id in self.objects.sorted_ids() {
            let object = self.objects.expect_object(id);
            id.hash(&mut hasher);
            object.player.hash(&mut hasher);
            object.type_index.hash(&mut hasher);
            object.pose.hash(&mut hasher);
            if let Some(state) = object.fight.and_then(|i| self.fight.pool().get(i)) {
                state.health.hash(&mut hasher);
                state.target.hash(&mut hasher);
                state.phase.hash(&mut hasher);
                state.last_attack_ms.hash(&mut hasher);
            }
            if let Some(route) = self.movement.route(id) {
                route.target().hash(&mut hasher);
                route.cursor().hash(&mut hasher);
                route.steps().hash(&mut hasher);
                route.orientation().hash(&mut hasher);
            }
            self.work.phase_of(id).hash(&mut hasher);
        }
        self.commands.next_id().hash(&mut hasher);
        self.commands.len().hash(&mut hasher);
        hasher.finish()
    }

    /// Capture the mutable state.
    #[must_use]
    pub fn snapshot(&self) -> SimSnapshot {
        let objects = self
            .objects
            .sorted_ids()
            .into_iter()
            .map(|id| {
                let object = self.objects.expect_object(id);
                ObjectRecord {
                    id,
                    player: object.player,
                    type_index: object.type_index,
                    position: object.pose.position(),
                    yaw: object.pose.yaw(),
                    fight: object.fight,
                }
            })
            .collect();
        SimSnapshot {
            tick: self.tick,
            time_ms: self.time_ms,
            next_object_id: self.objects.next_id(),
            objects,
            routes: self.movement.routes().cloned().collect(),
            fight_pool: self.fight.pool().clone(),
            work: self.work.states().collect(),
            commands: self.commands.clone(),
        }
    }

    /// Rebuild a simulation from a snapshot. Poses and node mappings are
    /// re-derived from the terrain.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::UnknownPrototype`] or [`GameError::InvalidState`]
    /// if the snapshot does not fit the terrain, prototypes or itself.
    pub fn restore(terrain: Terrain, prototypes: PrototypeTable, config: SimConfig, snapshot: SimSnapshot) -> Result<Self> {
        let mut sim = Self::new(terrain, prototypes, config)?;
        sim.objects = ObjectTable::with_next_id(snapshot.next_object_id);
        for record in snapshot.objects {
            sim.prototypes.get(record.type_index)?;
            if record.id.0 >= snapshot.next_object_id || sim.objects.contains(record.id) {
                return Err(GameError::InvalidState(format!("bad object id {}", record.id.0)));
            }
            if sim.terrain.cell_at(record.position).is_none() {
                return Err(GameError::InvalidState(format!("object {} is off the terrain", record.id.0)));
            }
            if let Some(slot) = record.fight {
                if snapshot.fight_pool.get(slot).map(|s| s.owner) != Some(record.id) {
                    return Err(GameError::InvalidState(format!(
                        "fight slot {} does not belong to object {}",
                        slot.0, record.id.0
                    )));
                }
            }
            let object = GameObject {
                id: record.id,
                player: record.player,
                type_index: record.type_index,
                pose: Pose::on_terrain(&sim.terrain, record.position, record.yaw),
                fight: record.fight,
            };
            sim.movement.add_object(&context!(sim), &object);
            sim.objects.insert(object);
        }
        for route in snapshot.routes {
            if !sim.objects.contains(route.object()) || sim.movement.has_route(route.object()) {
                return Err(GameError::InvalidState(format!("bad route for object {}", route.object().0)));
            }
            sim.movement.restore_route(route);
        }
        sim.fight = FightSubsystem::from_pool(snapshot.fight_pool);
        sim.work = WorkSubsystem::from_states(snapshot.work);
        sim.commands = snapshot.commands;
        sim.tick = snapshot.tick;
        sim.time_ms = snapshot.time_ms;
        Ok(sim)
    }

    /// Serialize the mutable state with bincode.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::Serialization`] if encoding fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(&self.snapshot()).map_err(|e| GameError::Serialization(e.to_string()))
    }

    /// Rebuild from bytes written by [`Simulation::to_bytes`].
    ///
    /// # Errors
    ///
    /// Returns [`GameError::Serialization`] on malformed bytes, otherwise as
    /// [`Simulation::restore`].
    pub fn from_bytes(terrain: Terrain, prototypes: PrototypeTable, config: SimConfig, bytes: &[u8]) -> Result<Self> {
        let snapshot: SimSnapshot =
            bincode::deserialize(bytes).map_err(|e| GameError::Serialization(e.to_string()))?;
        Self::restore(terrain, prototypes, config, snapshot)
    }
}
