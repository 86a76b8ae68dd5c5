//! Object placement on the terrain.

use serde::{Deserialize, Serialize};

use crate::math::{fixed_atan2, fixed_cos, fixed_serde, fixed_sin, wrap_angle, Fixed, Vec2Fixed, Vec3Fixed};
use crate::terrain::Terrain;

/// Position and heading of an object.
///
/// Only the ground position and yaw are free; height, 3D direction and up
/// vector are derived from the terrain whenever either changes, so they can
/// never drift out of sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pose {
    position: Vec2Fixed,
    yaw: Fixed,
    height: Fixed,
    direction: Vec3Fixed,
    up: Vec3Fixed,
}

impl Pose {
    /// Place an object on the terrain.
    #[must_use]
    pub fn on_terrain(terrain: &Terrain, position: Vec2Fixed, yaw: Fixed) -> Self {
        let mut pose = Self {
            position,
            yaw: Fixed::ZERO,
            height: Fixed::ZERO,
            direction: Vec3Fixed::ZERO,
            up: Vec3Fixed::UP,
        };
        pose.place(terrain, position, yaw);
        pose
    }

    /// Move and turn, re-deriving everything else.
    pub fn place(&mut self, terrain: &Terrain, position: Vec2Fixed, yaw: Fixed) {
        let yaw = wrap_angle(yaw);
        let (cos, sin) = (fixed_cos(yaw), fixed_sin(yaw));
        let gradient = terrain.gradient_at(position);
        self.position = position;
        self.yaw = yaw;
        self.height = terrain.height_at(position);
        self.up = Vec3Fixed::new(-gradient.x, -gradient.y, Fixed::ONE).normalize();
        self.direction = Vec3Fixed::new(cos, sin, gradient.dot(Vec2Fixed::new(cos, sin))).normalize();
    }

    /// Ground position.
    #[must_use]
    pub const fn position(&self) -> Vec2Fixed {
        self.position
    }

    /// Heading in radians, in `(-π, π]`.
    #[must_use]
    pub const fn yaw(&self) -> Fixed {
        self.yaw
    }

    /// Terrain height under the object.
    #[must_use]
    pub const fn height(&self) -> Fixed {
        self.height
    }

    /// Unit forward vector following the slope.
    #[must_use]
    pub const fn direction(&self) -> Vec3Fixed {
        self.direction
    }

    /// Unit surface normal under the object.
    #[must_use]
    pub const fn up(&self) -> Vec3Fixed {
        self.up
    }

    /// Position in 3D.
    #[must_use]
    pub const fn position3(&self) -> Vec3Fixed {
        Vec3Fixed::new(self.position.x, self.position.y, self.height)
    }

    /// Unit heading on the ground plane.
    #[must_use]
    pub fn heading(&self) -> Vec2Fixed {
        Vec2Fixed::new(fixed_cos(self.yaw), fixed_sin(self.yaw))
    }

    /// Signed turn, in `(-π, π]`, from the current yaw to face a target.
    #[must_use]
    pub fn turn_to(&self, target: OrientationTarget) -> Fixed {
        wrap_angle(target.yaw_from(self.position, self.yaw) - self.yaw)
    }
}

/// Desired final facing of a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrientationTarget {
    /// Face a ground point.
    Point(Vec2Fixed),
    /// Face an absolute yaw.
    Yaw(#[serde(with = "fixed_serde")] Fixed),
}

impl OrientationTarget {
    /// Yaw that satisfies the target from `position`. Facing a point the
    /// object stands on keeps `current`.
    #[must_use]
    pub fn yaw_from(self, position: Vec2Fixed, current: Fixed) -> Fixed {
        match self {
            OrientationTarget::Yaw(yaw) => wrap_angle(yaw),
            OrientationTarget::Point(point) => {
                let delta = point - position;
                if delta == Vec2Fixed::ZERO {
                    current
                } else {
                    fixed_atan2(delta.y, delta.x)
                }
            }
        }
    }
}

/// Turn `yaw` by at most `max_step` towards `target`. Returns the new yaw
/// and whether the target was reached.
#[must_use]
pub fn rotate_towards(yaw: Fixed, target: Fixed, max_step: Fixed) -> (Fixed, bool) {
    let delta = wrap_angle(target - yaw);
    if delta.abs() <= max_step {
        (wrap_angle(target), true)
    } else if delta > Fixed::ZERO {
        (wrap_angle(yaw + max_step), false)
    } else {
        (wrap_angle(yaw - max_step), false)
    }
}
