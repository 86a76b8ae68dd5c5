//! Headless scenario runner for CI verification.
//!
//! This crate loads RON scenarios, drives them through the simulation
//! without graphics and reports on the result. This enables:
//!
//! - **CI verification**: Automated testing of game logic and determinism
//! - **Save/resume checks**: A run split by a save ends in the same state
//!   as one that was never interrupted
//! - **Benchmarks**: Ticks per second on realistic maps
//!
//! # Example
//!
//! ```bash
//! # Run a scenario
//! cargo run -p rts_headless -- run --scenario scenarios/skirmish.ron
//!
//! # Verify determinism
//! cargo run -p rts_headless -- verify --scenario scenarios/skirmish.ron --runs 8
//! ```

pub mod metrics;
pub mod runner;
pub mod scenario;

pub use metrics::{EventTally, Kill, RunSummary};
pub use runner::{run_scenario, verify_scenario, ScenarioRun, Verification};
pub use scenario::{MapSpec, OrderAction, PrototypeSource, Scenario, ScenarioError, ScheduledOrder, UnitSpawn};
