//! # RTS Sim
//!
//! Deterministic gameplay simulation core of a heightfield RTS engine.
//!
//! This crate advances game-object state (position, combat, routes) once per
//! fixed tick and contains **only** deterministic logic:
//! - No rendering
//! - No system randomness
//! - No floating-point math (uses fixed-point)
//! - No IO apart from the neighbor-table cache and the RON loaders
//!
//! ## Crate Structure
//!
//! - [`terrain`] - Heightfield grid and cell geometry
//! - [`spatial`] - Quadtree index, connectivity islands and culling
//! - [`node_map`] - Object to node mapping used for collision
//! - [`pathfinding`] - A* over the index with an exact distance metric
//! - [`route`] - Per-object cursor-tracked paths
//! - [`movement`] - Route following with collision rollback
//! - [`fight`] - Combat state machine
//! - [`work`] - Resource gathering state machine
//! - [`commands`] - Command queue and action point admission
//! - [`events`] - Change notifications and listener registry
//! - [`simulation`] - The model that ties it all together

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod commands;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod fight;
pub mod math;
pub mod movement;
pub mod node_map;
pub mod objects;
pub mod pathfinding;
pub mod pose;
pub mod prototype;
pub mod route;
pub mod simulation;
pub mod spatial;
pub mod terrain;
pub mod work;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::commands::{Command, CommandId, CommandKind, CommandQueue};
    pub use crate::config::SimConfig;
    pub use crate::error::{GameError, Result};
    pub use crate::events::{EventKind, Issuer, RouteEndReason, SimEvent, SimListener};
    pub use crate::fight::{AttackPhase, FightState};
    pub use crate::math::{Fixed, Vec2Fixed, Vec3Fixed};
    pub use crate::objects::{GameObject, ObjectId, PlayerId};
    pub use crate::pose::{OrientationTarget, Pose};
    pub use crate::prototype::{
        FightStats, FootprintShape, GameObjectPrototype, Mobility, PrototypeTable, TypeIndex,
        WorkStats,
    };
    pub use crate::simulation::{SimSnapshot, Simulation, SpawnParams, TickEvents};
    pub use crate::spatial::{Aabb, Culler, Frustum, SpatialIndex};
    pub use crate::terrain::{CellPos, Terrain};
    pub use crate::work::WorkPhase;
}
