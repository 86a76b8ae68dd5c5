//! Simulation configuration.
//!
//! Loaded from RON; every field has a default so a config file only needs
//! to name what it changes.
//!
//! ```ron
//! SimConfig(
//!     action_points: ActionPointConfig(rate_per_second: 25, capacity: 40),
//!     collision: CollisionConfig(ignore_allies: true),
//! )
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{GameError, Result};
use crate::math::{fixed_decimal_serde, Fixed};

/// Action point budget of each player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionPointConfig {
    /// Points regenerated per second.
    pub rate_per_second: u32,
    /// Upper bound of the budget.
    pub capacity: u32,
    /// Budget at the start of the game.
    pub initial: u32,
}

impl Default for ActionPointConfig {
    fn default() -> Self {
        Self {
            rate_per_second: 30,
            capacity: 60,
            initial: 60,
        }
    }
}

/// Combat tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FightConfig {
    /// Approach routes stop this far inside the weapon range.
    #[serde(with = "fixed_decimal_serde")]
    pub range_hysteresis: Fixed,
    /// Facing error, in radians, at which turning counts as done.
    #[serde(with = "fixed_decimal_serde")]
    pub angle_tolerance: Fixed,
}

impl Default for FightConfig {
    fn default() -> Self {
        Self {
            range_hysteresis: Fixed::from_num(0.5),
            angle_tolerance: Fixed::from_num(0.05),
        }
    }
}

/// Collision policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CollisionConfig {
    /// Objects of the same player pass through each other.
    pub ignore_allies: bool,
}

/// Pathfinding tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathfindingConfig {
    /// Block edge length of the hierarchical search; zero disables it.
    pub hierarchical_block: u32,
    /// Routes longer than this (Chebyshev cells) use the hierarchical search.
    pub hierarchical_threshold: u32,
}

impl Default for PathfindingConfig {
    fn default() -> Self {
        Self {
            hierarchical_block: 8,
            hierarchical_threshold: 48,
        }
    }
}

/// Complete simulation configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Length of one tick in milliseconds. Must divide 1000.
    pub tick_duration_ms: u32,
    /// Command admission budget.
    pub action_points: ActionPointConfig,
    /// Combat tuning.
    pub fight: FightConfig,
    /// Collision policy.
    pub collision: CollisionConfig,
    /// Pathfinding tuning.
    pub pathfinding: PathfindingConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            tick_duration_ms: 10,
            action_points: ActionPointConfig::default(),
            fight: FightConfig::default(),
            collision: CollisionConfig::default(),
            pathfinding: PathfindingConfig::default(),
        }
    }
}

impl SimConfig {
    /// Ticks per simulated second.
    #[must_use]
    pub const fn ticks_per_second(&self) -> u32 {
        1000 / self.tick_duration_ms
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::InvalidState`] describing the first bad value.
    pub fn validate(&self) -> Result<()> {
        if self.tick_duration_ms == 0 || 1000 % self.tick_duration_ms != 0 {
            return Err(GameError::InvalidState(format!(
                "tick duration {} ms does not divide one second",
                self.tick_duration_ms
            )));
        }
        if self.action_points.capacity == 0 {
            return Err(GameError::InvalidState("action point capacity is zero".into()));
        }
        if self.fight.range_hysteresis < Fixed::ZERO || self.fight.angle_tolerance < Fixed::ZERO {
            return Err(GameError::InvalidState("fight tolerances must not be negative".into()));
        }
        Ok(())
    }

    /// Parse and validate a config from RON text.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::DataParseError`] on malformed RON, or the error
    /// of [`SimConfig::validate`].
    pub fn from_ron_str(label: &str, text: &str) -> Result<Self> {
        let config: Self = ron::from_str(text).map_err(|e| GameError::ron(label, &e))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::Io`] if the file cannot be read, otherwise as
    /// [`SimConfig::from_ron_str`].
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| GameError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_ron_str(&path.display().to_string(), &text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SimConfig::default();
        assert_eq!(config.ticks_per_second(), 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_ron() {
        let config = SimConfig::from_ron_str(
            "inline",
            "SimConfig(action_points: ActionPointConfig(rate_per_second: 7), fight: FightConfig(range_hysteresis: 0.25))",
        )
        .unwrap();
        assert_eq!(config.action_points.rate_per_second, 7);
        assert_eq!(config.action_points.capacity, 60);
        assert_eq!(config.fight.range_hysteresis, Fixed::from_num(0.25));
        assert_eq!(config.tick_duration_ms, 10);
    }

    #[test]
    fn test_rejects_bad_tick() {
        assert!(SimConfig::from_ron_str("inline", "SimConfig(tick_duration_ms: 7)").is_err());
        assert!(SimConfig::from_ron_str("inline", "SimConfig(tick_duration_ms: 0)").is_err());
    }
}
