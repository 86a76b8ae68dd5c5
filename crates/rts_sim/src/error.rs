//! Error types for the game simulation.
//!
//! Only boundary failures live here: bad external data handed to the core
//! (unknown ids, out-of-bounds cells, malformed config). Broken internal
//! invariants panic instead, and expected gameplay outcomes such as "no path"
//! are plain `bool`/`Option` results.

use thiserror::Error;

/// Result type alias using [`GameError`].
pub type Result<T> = std::result::Result<T, GameError>;

/// Top-level error type for all game simulation errors.
#[derive(Debug, Error)]
pub enum GameError {
    /// Invalid or removed game object identifier.
    #[error("Game object not found: {0}")]
    ObjectNotFound(u32),

    /// Prototype type index not present in the prototype table.
    #[error("Unknown prototype type index: {0}")]
    UnknownPrototype(u16),

    /// Cell coordinates outside the terrain.
    #[error("Cell ({x}, {y}) is outside the {width}x{height} terrain")]
    CellOutOfBounds {
        /// Cell x coordinate.
        x: i64,
        /// Cell y coordinate.
        y: i64,
        /// Terrain width in cells.
        width: u32,
        /// Terrain height in cells.
        height: u32,
    },

    /// Terrain construction received inconsistent input.
    #[error("Invalid terrain: {0}")]
    InvalidTerrain(String),

    /// Data file parsing error.
    #[error("Failed to parse data file '{path}': {message}")]
    DataParseError {
        /// Path (or label) of the data that failed to parse.
        path: String,
        /// Error message.
        message: String,
    },

    /// Reading or writing a cache or data file failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        /// File path involved.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Binary (de)serialization failed.
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// A command was malformed (no sources, self-targeting, ...).
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// Invalid game state.
    #[error("Invalid game state: {0}")]
    InvalidState(String),
}

impl GameError {
    /// Build a [`GameError::DataParseError`] from a RON parse failure.
    pub(crate) fn ron(path: impl Into<String>, err: &ron::error::SpannedError) -> Self {
        Self::DataParseError {
            path: path.into(),
            message: err.to_string(),
        }
    }
}
