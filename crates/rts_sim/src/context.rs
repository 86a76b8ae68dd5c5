//! Read-only world data shared by the subsystems during a tick.

use crate::config::SimConfig;
use crate::prototype::PrototypeTable;
use crate::spatial::SpatialIndex;
use crate::terrain::Terrain;

/// Borrowed view of everything that does not change while ticking.
#[derive(Debug, Clone, Copy)]
pub struct SimContext<'a> {
    /// Height field.
    pub terrain: &'a Terrain,
    /// Spatial index built from `terrain`.
    pub index: &'a SpatialIndex,
    /// Object types.
    pub prototypes: &'a PrototypeTable,
    /// Tuning.
    pub config: &'a SimConfig,
}
