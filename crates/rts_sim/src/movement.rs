//! Route following.
//!
//! The movement subsystem owns every route and is the only writer of the
//! object-to-node mapping. Each tick it walks routed objects towards their
//! next waypoint, turning first and then translating, and spends the tick's
//! time across as many sub-steps as it covers.
//!
//! Every sub-step is applied speculatively: the new pose is written to the
//! node map and, if that makes the object collide where it did not before,
//! pose, mapping and route cursor are rolled back and the object waits for
//! the next tick.

use std::collections::BTreeMap;

use tracing::{debug, trace};

use crate::context::SimContext;
use crate::events::{Issuer, RouteEndReason, SimEvent};
use crate::math::{fixed_atan2, wrap_angle, Fixed, Vec2Fixed};
use crate::node_map::{policy_for, Footprint, ObjectNodeMap};
use crate::objects::{GameObject, ObjectId, ObjectTable, PlayerId};
use crate::pathfinding::PathFinder;
use crate::pose::{rotate_towards, OrientationTarget, Pose};
use crate::prototype::{Mobility, PrototypeTable};
use crate::route::Route;
use crate::terrain::CellPos;

/// Heading error below which an object counts as facing its waypoint.
const ALIGNED: Fixed = Fixed::from_bits(1 << 19);

/// Parameters of a route request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteRequest {
    /// Stop as soon as the object is this close to the target.
    pub max_distance: Option<Fixed>,
    /// Facing to turn to after the last waypoint.
    pub orientation: Option<OrientationTarget>,
    /// Subsystem asking for the route.
    pub issuer: Issuer,
}

impl RouteRequest {
    /// Walk to the target cell.
    #[must_use]
    pub const fn new(issuer: Issuer) -> Self {
        Self {
            max_distance: None,
            orientation: None,
            issuer,
        }
    }

    /// Stop within `distance` of the target.
    #[must_use]
    pub const fn within(mut self, distance: Fixed) -> Self {
        self.max_distance = Some(distance);
        self
    }

    /// Turn to `orientation` at the end.
    #[must_use]
    pub const fn facing(mut self, orientation: OrientationTarget) -> Self {
        self.orientation = Some(orientation);
        self
    }
}

/// Result of stepping one route.
#[derive(Debug, Clone, Copy, Default)]
struct StepOutcome {
    moved: bool,
    finished: bool,
}

/// Owns routes and the object-to-node mapping.
#[derive(Debug, Default)]
pub struct MovementSubsystem {
    routes: BTreeMap<ObjectId, Route>,
    node_map: ObjectNodeMap,
    pathfinder: PathFinder,
}

/// Whether `other` blocks an object of `player` flying (or not).
fn blocks(
    prototypes: &PrototypeTable,
    objects: &ObjectTable,
    player: PlayerId,
    airborne: bool,
    ignore_allies: bool,
    other: ObjectId,
) -> bool {
    let Some(other) = objects.get(other) else {
        return false;
    };
    if ignore_allies && other.player == player {
        return false;
    }
    (prototypes.of(other.type_index).mobility == Mobility::Air) == airborne
}

/// Turn towards `desired`, spending at most `time` seconds. Returns the new
/// yaw, whether `desired` was reached and the seconds used.
fn turn_step(yaw: Fixed, desired: Fixed, turn_speed: Fixed, time: Fixed) -> (Fixed, bool, Fixed) {
    if turn_speed <= Fixed::ZERO {
        return (desired, true, Fixed::ZERO);
    }
    let (new_yaw, reached) = rotate_towards(yaw, desired, turn_speed * time);
    let used = if reached {
        wrap_angle(desired - yaw).abs() / turn_speed
    } else {
        time
    };
    (new_yaw, reached, used)
}

impl MovementSubsystem {
    /// Create an empty subsystem.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start mapping a newly spawned object.
    pub fn add_object(&mut self, ctx: &SimContext<'_>, object: &GameObject) {
        let proto = ctx.prototypes.of(object.type_index);
        let footprint = Footprint::new(&object.pose, proto.footprint);
        self.node_map
            .add_object(ctx.index, object.id, &footprint, policy_for(proto.mobility));
    }

    /// Forget an object: drop its route and its node mappings.
    pub fn remove_object(&mut self, id: ObjectId, out: &mut Vec<SimEvent>) {
        if self.routes.remove(&id).is_some() {
            debug!(object = id.0, "Route removed with its object");
            out.push(SimEvent::RouteRemoved {
                object: id,
                reason: RouteEndReason::ObjectRemoved,
                issuer: Issuer::System,
            });
        }
        self.node_map.remove_object(id);
    }

    /// Plan and install a route for `id` to `target`.
    ///
    /// Immobile objects are refused. Any current route is aborted first, so
    /// a failed request leaves the object without a route. Returns false
    /// when no path exists. A request that needs no movement and no turning
    /// succeeds without installing a route.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not in the object table.
    pub fn create_route(
        &mut self,
        ctx: &SimContext<'_>,
        objects: &ObjectTable,
        out: &mut Vec<SimEvent>,
        id: ObjectId,
        target: CellPos,
        request: RouteRequest,
    ) -> bool {
        let object = objects.expect_object(id);
        if !ctx.prototypes.of(object.type_index).is_mobile() {
            debug!(object = id.0, "Immobile object cannot take a route");
            return false;
        }
        self.abort_route(id, request.issuer, out);

        let source = ctx.terrain.clamped_cell_at(object.pose.position());
        let settings = ctx.config.pathfinding;
        let span = source.x.abs_diff(target.x).max(source.y.abs_diff(target.y));
        let path = if settings.hierarchical_block > 0 && span > settings.hierarchical_threshold {
            self.pathfinder.find_path_hierarchical(
                ctx.index,
                source,
                target,
                request.max_distance,
                settings.hierarchical_block,
            )
        } else {
            self.pathfinder
                .find_path(ctx.index, source, target, request.max_distance)
        };
        let Some(path) = path else {
            debug!(object = id.0, ?source, ?target, "No route");
            return false;
        };
        if path.is_empty() && request.orientation.is_none() {
            return true;
        }

        debug!(
            object = id.0,
            ?source,
            ?target,
            steps = path.len(),
            issuer = ?request.issuer,
            "Route created"
        );
        let route = Route::new(id, source, target, path, request.orientation, request.issuer);
        self.routes.insert(id, route);
        out.push(SimEvent::RouteAdded {
            object: id,
            issuer: request.issuer,
        });
        true
    }

    /// Drop the route of `id`, if any.
    pub fn abort_route(&mut self, id: ObjectId, issuer: Issuer, out: &mut Vec<SimEvent>) -> bool {
        if self.routes.remove(&id).is_none() {
            return false;
        }
        debug!(object = id.0, ?issuer, "Route aborted");
        out.push(SimEvent::RouteRemoved {
            object: id,
            reason: RouteEndReason::Aborted,
            issuer,
        });
        true
    }

    /// Whether `id` is following a route.
    #[must_use]
    pub fn has_route(&self, id: ObjectId) -> bool {
        self.routes.contains_key(&id)
    }

    /// The route of `id`.
    #[must_use]
    pub fn route(&self, id: ObjectId) -> Option<&Route> {
        self.routes.get(&id)
    }

    /// All routes in object order.
    pub fn routes(&self) -> impl Iterator<Item = &Route> {
        self.routes.values()
    }

    /// Reinstall a persisted route.
    ///
    /// # Panics
    ///
    /// Panics if the object already has a route.
    pub(crate) fn restore_route(&mut self, route: Route) {
        let previous = self.routes.insert(route.object(), route);
        assert!(previous.is_none(), "route restored twice");
    }

    /// The object-to-node mapping.
    #[must_use]
    pub fn node_map(&self) -> &ObjectNodeMap {
        &self.node_map
    }

    /// The pathfinder, for its statistics.
    #[must_use]
    pub fn pathfinder(&self) -> &PathFinder {
        &self.pathfinder
    }

    /// Whether `id` overlaps an object it cannot pass through.
    #[must_use]
    pub fn is_colliding(&self, ctx: &SimContext<'_>, objects: &ObjectTable, id: ObjectId) -> bool {
        let Some(object) = objects.get(id) else {
            return false;
        };
        let airborne = ctx.prototypes.of(object.type_index).mobility == Mobility::Air;
        let ignore_allies = ctx.config.collision.ignore_allies;
        self.node_map.is_colliding(id, |other| {
            blocks(ctx.prototypes, objects, object.player, airborne, ignore_allies, other)
        })
    }

    /// Height route planning uses for a pose: the surface height at the
    /// center of the cell the pose stands in.
    #[must_use]
    pub fn path_finding_height(&self, ctx: &SimContext<'_>, pose: &Pose) -> Fixed {
        let cell = ctx.terrain.clamped_cell_at(pose.position());
        ctx.terrain.height_at(cell.center())
    }

    /// Turn a routeless object in place towards `target` for `elapsed_ms`.
    /// Returns whether it faces the target within the fight angle tolerance.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not in the object table.
    pub fn turn_in_place(
        &mut self,
        ctx: &SimContext<'_>,
        objects: &mut ObjectTable,
        out: &mut Vec<SimEvent>,
        id: ObjectId,
        target: OrientationTarget,
        elapsed_ms: u32,
    ) -> bool {
        let object = objects.expect_object(id);
        let pose = object.pose;
        let tolerance = ctx.config.fight.angle_tolerance;
        if pose.turn_to(target).abs() <= tolerance {
            return true;
        }
        let turn_speed = ctx.prototypes.of(object.type_index).turn_speed;
        let desired = target.yaw_from(pose.position(), pose.yaw());
        let (yaw, _, _) = turn_step(pose.yaw(), desired, turn_speed, seconds(elapsed_ms));
        let turned = Pose::on_terrain(ctx.terrain, pose.position(), yaw);
        if !self.try_place(ctx, objects, id, turned) {
            return false;
        }
        out.push(SimEvent::PoseChanged(id));
        turned.turn_to(target).abs() <= tolerance
    }

    /// Advance every route by `elapsed_ms`.
    pub fn tick(&mut self, ctx: &SimContext<'_>, objects: &mut ObjectTable, out: &mut Vec<SimEvent>, elapsed_ms: u32) {
        let ids: Vec<ObjectId> = self.routes.keys().copied().collect();
        for id in ids {
            let Some(mut route) = self.routes.remove(&id) else {
                continue;
            };
            let outcome = self.step_route(ctx, objects, &mut route, seconds(elapsed_ms));
            if outcome.moved {
                out.push(SimEvent::PoseChanged(id));
            }
            if outcome.finished {
                debug!(object = id.0, target = ?route.target(), "Route ended");
                out.push(SimEvent::RouteRemoved {
                    object: id,
                    reason: RouteEndReason::Ended,
                    issuer: route.issuer(),
                });
            } else {
                self.routes.insert(id, route);
            }
        }
    }

    fn step_route(
        &mut self,
        ctx: &SimContext<'_>,
        objects: &mut ObjectTable,
        route: &mut Route,
        mut time: Fixed,
    ) -> StepOutcome {
        let id = route.object();
        let proto = ctx.prototypes.of(objects.expect_object(id).type_index);
        let (speed, turn_speed) = (proto.speed, proto.turn_speed);
        let mut outcome = StepOutcome::default();

        loop {
            let pose = objects.expect_object(id).pose;
            let desired = if let Some(step) = route.next_step() {
                let waypoint = step.cell.center();
                let delta = waypoint - pose.position();
                if delta == Vec2Fixed::ZERO {
                    route.advance();
                    continue;
                }
                let desired = fixed_atan2(delta.y, delta.x);
                if wrap_angle(desired - pose.yaw()).abs() <= ALIGNED {
                    if time <= Fixed::ZERO {
                        break;
                    }
                    let distance = delta.length();
                    let reach = speed * time;
                    let cursor = route.cursor();
                    let (position, used) = if distance <= reach {
                        route.advance();
                        (waypoint, distance / speed)
                    } else {
                        (pose.position() + delta.scale(reach / distance), time)
                    };
                    let moved = Pose::on_terrain(ctx.terrain, position, pose.yaw());
                    if !self.try_place(ctx, objects, id, moved) {
                        route.rewind(cursor);
                        break;
                    }
                    outcome.moved = true;
                    time = (time - used).max(Fixed::ZERO);
                    continue;
                }
                desired
            } else if let Some(orientation) = route.orientation() {
                let desired = orientation.yaw_from(pose.position(), pose.yaw());
                if wrap_angle(desired - pose.yaw()).abs() <= ALIGNED {
                    outcome.finished = true;
                    break;
                }
                desired
            } else {
                outcome.finished = true;
                break;
            };

            if time <= Fixed::ZERO {
                break;
            }
            let (yaw, reached, used) = turn_step(pose.yaw(), desired, turn_speed, time);
            let turned = Pose::on_terrain(ctx.terrain, pose.position(), yaw);
            if !self.try_place(ctx, objects, id, turned) {
                break;
            }
            outcome.moved = true;
            time = (time - used).max(Fixed::ZERO);
            if !reached {
                break;
            }
        }
        outcome
    }

    /// Apply a new pose unless it walks the object into a collision.
    fn try_place(&mut self, ctx: &SimContext<'_>, objects: &mut ObjectTable, id: ObjectId, pose: Pose) -> bool {
        let object = objects.expect_object(id);
        let proto = ctx.prototypes.of(object.type_index);
        let policy = policy_for(proto.mobility);
        let (player, old) = (object.player, object.pose);
        let airborne = proto.mobility == Mobility::Air;
        let ignore_allies = ctx.config.collision.ignore_allies;
        let table: &ObjectTable = objects;
        let obstacle = |other| blocks(ctx.prototypes, table, player, airborne, ignore_allies, other);

        let was_colliding = self.node_map.is_colliding(id, obstacle);
        self.node_map
            .set_object(ctx.index, id, &Footprint::new(&pose, proto.footprint), policy);
        if !was_colliding && self.node_map.is_colliding(id, obstacle) {
            self.node_map
                .set_object(ctx.index, id, &Footprint::new(&old, proto.footprint), policy);
            trace!(object = id.0, position = ?pose.position(), "Step rolled back on collision");
            return false;
        }
        trace!(object = id.0, position = ?pose.position(), yaw = ?pose.yaw(), "Step");
        if let Some(object) = objects.get_mut(id) {
            object.pose = pose;
        }
        true
    }
}

fn seconds(ms: u32) -> Fixed {
    Fixed::from_num(ms) / Fixed::from_num(1000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;
    use crate::math::FRAC_PI_2;
    use crate::prototype::{FootprintShape, GameObjectPrototype, TypeIndex};
    use crate::spatial::SpatialIndex;
    use crate::terrain::Terrain;

    fn prototypes() -> PrototypeTable {
        PrototypeTable::new(vec![
            GameObjectPrototype {
                name: "walker".into(),
                mobility: Mobility::Ground,
                speed: Fixed::from_num(2),
                turn_speed: Fixed::from_num(4),
                footprint: FootprintShape::Circle {
                    radius: Fixed::from_num(0.4),
                },
                body_height: Fixed::ONE,
                action_cost: 1,
                health: 10,
                fight: None,
                work: None,
                resource: false,
            },
            GameObjectPrototype {
                name: "rock".into(),
                mobility: Mobility::Immobile,
                speed: Fixed::ZERO,
                turn_speed: Fixed::ZERO,
                footprint: FootprintShape::Circle {
                    radius: Fixed::from_num(0.4),
                },
                body_height: Fixed::ONE,
                action_cost: 0,
                health: 0,
                fight: None,
                work: None,
                resource: false,
            },
        ])
        .unwrap()
    }

    struct World {
        terrain: Terrain,
        index: SpatialIndex,
        prototypes: PrototypeTable,
        config: SimConfig,
        objects: ObjectTable,
        movement: MovementSubsystem,
        events: Vec<SimEvent>,
    }

    impl World {
        fn new(width: u32, height: u32) -> Self {
            let terrain = Terrain::flat(width, height, Fixed::ZERO).unwrap();
            let index = SpatialIndex::build(&terrain);
            Self {
                terrain,
                index,
                prototypes: prototypes(),
                config: SimConfig::default(),
                objects: ObjectTable::new(),
                movement: MovementSubsystem::new(),
                events: Vec::new(),
            }
        }

        fn spawn(&mut self, type_index: u16, cell: CellPos) -> ObjectId {
            let id = self.objects.allocate_id();
            let object = GameObject {
                id,
                player: PlayerId(0),
                type_index: TypeIndex(type_index),
                pose: Pose::on_terrain(&self.terrain, cell.center(), Fixed::ZERO),
                fight: None,
            };
            let ctx = SimContext {
                terrain: &self.terrain,
                index: &self.index,
                prototypes: &self.prototypes,
                config: &self.config,
            };
            self.movement.add_object(&ctx, &object);
            self.objects.insert(object);
            id
        }

        fn route(&mut self, id: ObjectId, target: CellPos, request: RouteRequest) -> bool {
            let ctx = SimContext {
                terrain: &self.terrain,
                index: &self.index,
                prototypes: &self.prototypes,
                config: &self.config,
            };
            self.movement
                .create_route(&ctx, &self.objects, &mut self.events, id, target, request)
        }

        fn tick(&mut self, ms: u32) {
            let ctx = SimContext {
                terrain: &self.terrain,
                index: &self.index,
                prototypes: &self.prototypes,
                config: &self.config,
            };
            self.movement
                .tick(&ctx, &mut self.objects, &mut self.events, ms);
        }

        fn position(&self, id: ObjectId) -> Vec2Fixed {
            self.objects.expect_object(id).pose.position()
        }
    }

    #[test]
    fn test_walks_to_target_and_ends() {
        let mut world = World::new(8, 8);
        let id = world.spawn(0, CellPos::new(0, 0));
        assert!(world.route(id, CellPos::new(3, 0), RouteRequest::new(Issuer::Command)));
        assert_eq!(
            world.events,
            vec![SimEvent::RouteAdded {
                object: id,
                issuer: Issuer::Command
            }]
        );
        // 3 cells at 2 cells/s, already facing east.
        for _ in 0..200 {
            world.tick(10);
        }
        assert_eq!(world.position(id), CellPos::new(3, 0).center());
        assert!(!world.movement.has_route(id));
        assert!(world.events.contains(&SimEvent::RouteRemoved {
            object: id,
            reason: RouteEndReason::Ended,
            issuer: Issuer::Command,
        }));
        assert_eq!(
            world.movement.node_map().nodes_of(id),
            &[world.index.leaf_for_cell(CellPos::new(3, 0))]
        );
    }

    #[test]
    fn test_speed_limits_progress() {
        let mut world = World::new(8, 8);
        let id = world.spawn(0, CellPos::new(0, 0));
        world.route(id, CellPos::new(5, 0), RouteRequest::new(Issuer::Command));
        world.tick(250);
        let x = world.position(id).x;
        assert_eq!(x, Fixed::from_num(1));
        assert!(world.movement.has_route(id));
    }

    #[test]
    fn test_turns_before_moving() {
        let mut world = World::new(8, 8);
        let id = world.spawn(0, CellPos::new(0, 0));
        world.route(id, CellPos::new(0, 3), RouteRequest::new(Issuer::Command));
        // A quarter turn at 4 rad/s takes ~393 ms.
        world.tick(100);
        assert_eq!(world.position(id), CellPos::new(0, 0).center());
        assert!(world.objects.expect_object(id).pose.yaw() > Fixed::ZERO);
        world.tick(1000);
        assert!(world.position(id).y > CellPos::new(0, 0).center().y);
    }

    #[test]
    fn test_immobile_refused() {
        let mut world = World::new(4, 4);
        let rock = world.spawn(1, CellPos::new(1, 1));
        assert!(!world.route(rock, CellPos::new(2, 2), RouteRequest::new(Issuer::Command)));
        assert!(world.events.is_empty());
    }

    #[test]
    fn test_failed_route_aborts_previous() {
        let mut terrain = Terrain::flat(6, 6, Fixed::ZERO).unwrap();
        terrain.raise_cell(CellPos::new(5, 5), Fixed::from_num(3)).unwrap();
        let mut world = World::new(6, 6);
        world.index = SpatialIndex::build(&terrain);
        world.terrain = terrain;
        let id = world.spawn(0, CellPos::new(0, 0));
        assert!(world.route(id, CellPos::new(3, 3), RouteRequest::new(Issuer::Command)));
        assert!(!world.route(id, CellPos::new(5, 5), RouteRequest::new(Issuer::Fight)));
        assert!(!world.movement.has_route(id));
        assert_eq!(
            world.events.last(),
            Some(&SimEvent::RouteRemoved {
                object: id,
                reason: RouteEndReason::Aborted,
                issuer: Issuer::Fight,
            })
        );
    }

    #[test]
    fn test_same_cell_needs_no_route() {
        let mut world = World::new(4, 4);
        let id = world.spawn(0, CellPos::new(2, 2));
        assert!(world.route(id, CellPos::new(2, 2), RouteRequest::new(Issuer::Command)));
        assert!(!world.movement.has_route(id));
        assert!(world.events.is_empty());
    }

    #[test]
    fn test_orientation_only_route() {
        let mut world = World::new(4, 4);
        let id = world.spawn(0, CellPos::new(1, 1));
        let request = RouteRequest::new(Issuer::Fight).facing(OrientationTarget::Yaw(FRAC_PI_2));
        assert!(world.route(id, CellPos::new(1, 1), request));
        assert!(world.movement.has_route(id));
        world.tick(1000);
        assert!(!world.movement.has_route(id));
        assert_eq!(world.objects.expect_object(id).pose.yaw(), FRAC_PI_2);
        assert_eq!(world.position(id), CellPos::new(1, 1).center());
    }

    #[test]
    fn test_collision_rolls_back() {
        let mut world = World::new(8, 3);
        let id = world.spawn(0, CellPos::new(0, 1));
        let rock = world.spawn(1, CellPos::new(3, 1));
        // Straight east along row 1 runs into the rock.
        assert!(world.route(id, CellPos::new(2, 1), RouteRequest::new(Issuer::Command)));
        for _ in 0..200 {
            world.tick(10);
        }
        assert_eq!(world.position(id), CellPos::new(2, 1).center());
        assert!(world.route(id, CellPos::new(3, 1), RouteRequest::new(Issuer::Command)));
        for _ in 0..100 {
            world.tick(10);
        }
        let x = world.position(id).x;
        assert!(x < Fixed::from_num(3), "walked into the rock at x = {x}");
        assert!(world.movement.has_route(id));
        let ctx = SimContext {
            terrain: &world.terrain,
            index: &world.index,
            prototypes: &world.prototypes,
            config: &world.config,
        };
        assert!(!world.movement.is_colliding(&ctx, &world.objects, id));
        assert!(world.objects.contains(rock));
    }

    #[test]
    fn test_remove_object_drops_route_and_mapping() {
        let mut world = World::new(6, 6);
        let id = world.spawn(0, CellPos::new(0, 0));
        world.route(id, CellPos::new(4, 4), RouteRequest::new(Issuer::Work));
        world.events.clear();
        world.movement.remove_object(id, &mut world.events);
        assert!(!world.movement.has_route(id));
        assert!(!world.movement.node_map().contains(id));
        assert_eq!(
            world.events,
            vec![SimEvent::RouteRemoved {
                object: id,
                reason: RouteEndReason::ObjectRemoved,
                issuer: Issuer::System,
            }]
        );
    }
}
