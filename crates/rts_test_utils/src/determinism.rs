//! Determinism testing utilities.
//!
//! Provides a harness for verifying that the simulation
//! produces identical results given identical inputs.
//!
//! # Testing Strategy
//!
//! The simulation must be bit-for-bit reproducible so that lockstep peers,
//! replays and restored snapshots agree. Sources of non-determinism include:
//!
//! - **Floating-point math**: We use fixed-point arithmetic via
//!   [`rts_sim::math::Fixed`] and the exact `a + b·√2` path metric.
//!
//! - **HashMap iteration order**: Rust's default hasher is randomized.
//!   Objects, routes and attackers are always visited in id order.
//!
//! - **Thread scheduling**: Only frustum culling runs in parallel, and its
//!   output is merged in subtree order.
//!
//! # Test Levels
//!
//! 1. **Unit tests**: Individual subsystem behavior
//! 2. **Property tests**: Random terrains and commands still agree
//! 3. **Integration tests**: Full scenarios are reproducible
//! 4. **Parallel tests**: Running N simulations on N threads all match

use std::thread;

use rts_sim::simulation::Simulation;
use tracing::warn;

/// Result of a determinism test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeterminismResult {
    /// Whether all runs produced identical results.
    pub is_deterministic: bool,
    /// Hashes from each run.
    pub hashes: Vec<u64>,
    /// Number of ticks simulated.
    pub ticks: u64,
}

impl DeterminismResult {
    /// Get all unique hashes (should be 1 for deterministic simulation).
    #[must_use]
    pub fn unique_hashes(&self) -> Vec<u64> {
        let mut unique: Vec<u64> = self.hashes.clone();
        unique.sort_unstable();
        unique.dedup();
        unique
    }

    /// Assert that the simulation was deterministic, with a detailed error message.
    ///
    /// # Panics
    ///
    /// Panics if the simulation produced different hashes across runs.
    pub fn assert_deterministic(&self) {
        if !self.is_deterministic {
            let unique = self.unique_hashes();
            panic!(
                "Simulation is non-deterministic!\n\
                 Runs: {}\n\
                 Ticks: {}\n\
                 Unique hashes: {} (expected 1)\n\
                 All hashes: {:?}",
                self.hashes.len(),
                self.ticks,
                unique.len(),
                self.hashes
            );
        }
    }
}

/// Run a state machine multiple times and verify determinism.
///
/// # Arguments
///
/// * `runs` - Number of times to run
/// * `ticks` - Number of steps per run
/// * `setup` - Function to create the initial state
/// * `step` - Function to advance the state by one step
/// * `hash` - Function to compute a state hash
///
/// # Example
///
/// ```
/// use rts_test_utils::determinism::verify_determinism;
/// use rts_test_utils::fixtures::battle_scenario;
///
/// let result = verify_determinism(
///     3,
///     100,
///     || battle_scenario(2),
///     |sim| {
///         sim.tick();
///     },
///     |sim| sim.state_hash(),
/// );
/// result.assert_deterministic();
/// ```
pub fn verify_determinism<S, Setup, Step, HashFn>(
    runs: usize,
    ticks: u64,
    setup: Setup,
    step: Step,
    hash: HashFn,
) -> DeterminismResult
where
    Setup: Fn() -> S,
    Step: Fn(&mut S),
    HashFn: Fn(&S) -> u64,
{
    let mut hashes = Vec::with_capacity(runs);

    for _ in 0..runs {
        let mut state = setup();

        for _ in 0..ticks {
            step(&mut state);
        }

        hashes.push(hash(&state));
    }

    let is_deterministic = hashes.windows(2).all(|w| w[0] == w[1]);

    DeterminismResult {
        is_deterministic,
        hashes,
        ticks,
    }
}

/// Run a simulation twice with identical setup and compare final hashes.
pub fn verify_simulation_determinism<F>(setup_fn: F, num_ticks: u64) -> bool
where
    F: Fn() -> Simulation,
{
    verify_determinism(
        2,
        num_ticks,
        &setup_fn,
        |sim| {
            sim.tick();
        },
        Simulation::state_hash,
    )
    .is_deterministic
}

/// Run `num_sims` simulations, each built and ticked on its own thread,
/// and collect their final hashes in spawn order.
///
/// A simulation holds `Rc` listeners and never leaves the thread that
/// built it; only the setup function is shared.
///
/// # Panics
///
/// Panics if any simulation thread panics.
pub fn run_parallel_simulations<F>(setup_fn: F, num_sims: usize, num_ticks: u64) -> DeterminismResult
where
    F: Fn() -> Simulation + Sync,
{
    let hashes: Vec<u64> = thread::scope(|s| {
        let handles: Vec<_> = (0..num_sims)
            .map(|_| {
                s.spawn(|| {
                    let mut sim = setup_fn();
                    for _ in 0..num_ticks {
                        sim.tick();
                    }
                    sim.state_hash()
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|h| h.join().unwrap_or_else(|_| panic!("simulation thread panicked")))
            .collect()
    });

    DeterminismResult {
        is_deterministic: hashes.windows(2).all(|w| w[0] == w[1]),
        hashes,
        ticks: num_ticks,
    }
}

/// Compare two simulation runs tick-by-tick, finding first divergence.
///
/// # Returns
///
/// `None` if simulations are deterministic, `Some(tick)` if they diverge
/// at that tick.
pub fn find_first_divergence<F>(setup_fn: F, num_ticks: u64) -> Option<u64>
where
    F: Fn() -> Simulation,
{
    let mut sim1 = setup_fn();
    let mut sim2 = setup_fn();

    if sim1.state_hash() != sim2.state_hash() {
        return Some(0);
    }

    for tick in 1..=num_ticks {
        let events1 = sim1.tick();
        let events2 = sim2.tick();

        if sim1.state_hash() != sim2.state_hash() || events1 != events2 {
            warn!(tick, "Simulations diverged");
            return Some(tick);
        }
    }

    None
}

/// Verify that a snapshot round trip mid-run changes nothing: the restored
/// simulation must hash the same immediately and after `ticks_after` more
/// ticks on both sides.
///
/// # Panics
///
/// Panics if the snapshot fails to encode or decode.
pub fn verify_snapshot_determinism<F>(setup_fn: F, ticks_before: u64, ticks_after: u64) -> bool
where
    F: Fn() -> Simulation,
{
    let mut sim = setup_fn();
    for _ in 0..ticks_before {
        sim.tick();
    }

    let bytes = sim
        .to_bytes()
        .unwrap_or_else(|e| panic!("snapshot encode failed: {e}"));
    let mut restored = Simulation::from_bytes(
        sim.terrain().clone(),
        sim.prototypes().clone(),
        *sim.config(),
        &bytes,
    )
    .unwrap_or_else(|e| panic!("snapshot decode failed: {e}"));

    if restored.state_hash() != sim.state_hash() {
        return false;
    }
    for _ in 0..ticks_after {
        if sim.tick() != restored.tick() {
            return false;
        }
    }
    restored.state_hash() == sim.state_hash()
}

/// Proptest strategies for simulation testing.
///
/// These strategies generate random but reproducible inputs for
/// property-based testing.
pub mod strategies {
    use proptest::prelude::*;
    use rts_sim::math::Fixed;
    use rts_sim::terrain::{CellPos, Terrain};

    /// Generate a cell inside a `width × height` grid.
    pub fn arb_cell(width: u32, height: u32) -> impl Strategy<Value = CellPos> {
        (0..width, 0..height).prop_map(|(x, y)| CellPos::new(x, y))
    }

    /// Generate a small terrain of flat cells at one of `levels` heights.
    ///
    /// Neighbors at different levels are disconnected, so low level counts
    /// give large islands and high counts give fragmented maps.
    pub fn arb_stepped_terrain(max_size: u32, levels: u8) -> impl Strategy<Value = Terrain> {
        let levels = levels.max(1);
        (2..=max_size, 2..=max_size).prop_flat_map(move |(w, h)| {
            proptest::collection::vec(0..levels, (w * h) as usize).prop_map(move |heights| {
                let mut terrain = Terrain::flat(w, h, Fixed::ZERO)
                    .unwrap_or_else(|e| panic!("generated terrain: {e}"));
                for (i, level) in heights.into_iter().enumerate() {
                    let cell = terrain.cell_at_index(i);
                    terrain
                        .raise_cell(cell, Fixed::from_num(level))
                        .unwrap_or_else(|e| panic!("generated cell: {e}"));
                }
                terrain
            })
        })
    }

    /// Generate a tick duration jittered around 10 ms.
    pub fn arb_tick_ms() -> impl Strategy<Value = u32> {
        3u32..=17
    }

    /// Generate weapon damage.
    pub fn arb_damage() -> impl Strategy<Value = u32> {
        1u32..100u32
    }

    /// Generate a reattack duration in milliseconds.
    pub fn arb_reattack_ms() -> impl Strategy<Value = u32> {
        20u32..2000u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{battle_scenario, crowd_scenario, simulation, flat_terrain};

    #[test]
    fn test_verify_determinism_simple() {
        let result = verify_determinism(3, 100, || 0u64, |n| *n += 1, |n| *n);

        assert!(result.is_deterministic);
        assert_eq!(result.hashes, vec![100, 100, 100]);
    }

    #[test]
    fn test_empty_simulation_determinism() {
        assert!(verify_simulation_determinism(|| simulation(flat_terrain(8, 8)), 100));
    }

    #[test]
    fn test_battle_determinism() {
        let result = verify_determinism(
            3,
            400,
            || battle_scenario(4),
            |sim| {
                sim.tick();
            },
            Simulation::state_hash,
        );
        result.assert_deterministic();
    }

    #[test]
    fn test_find_divergence_on_deterministic_sim() {
        assert_eq!(find_first_divergence(|| crowd_scenario(12), 200), None);
    }

    #[test]
    fn test_parallel_simulations_agree() {
        let result = run_parallel_simulations(|| battle_scenario(3), 4, 300);
        assert_eq!(result.hashes.len(), 4);
        result.assert_deterministic();
    }

    #[test]
    fn test_snapshot_mid_battle() {
        assert!(verify_snapshot_determinism(|| battle_scenario(3), 150, 300));
    }
}
