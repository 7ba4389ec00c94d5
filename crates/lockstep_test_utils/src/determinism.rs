//! Determinism testing utilities.
//!
//! Provides a harness for verifying that the simulation produces
//! identical results given identical inputs.
//!
//! # Testing Strategy
//!
//! Lockstep simulations must be 100% deterministic. Sources of
//! non-determinism include:
//!
//! - **Floating-point math**: different CPUs can produce different
//!   results. The core uses fixed-point arithmetic throughout.
//! - **HashMap iteration order**: Rust's default hasher is randomized.
//!   Systems always iterate in sorted entity id order.
//! - **System randomness**: all "random" behavior is seeded from
//!   `(entity id, tick)`.
//!
//! # Test Levels
//!
//! 1. **Unit tests**: individual module determinism
//! 2. **Property tests**: random inputs must still produce
//!    deterministic outputs
//! 3. **Integration tests**: full scenarios are reproducible
//! 4. **Parallel tests**: N simulations run in parallel all match

use std::thread;

use lockstep_core::world::World;

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
    /// All unique hashes (should be 1 for a deterministic simulation).
    #[must_use]
    pub fn unique_hashes(&self) -> Vec<u64> {
        let mut unique: Vec<u64> = self.hashes.clone();
        unique.sort_unstable();
        unique.dedup();
        unique
    }

    /// Assert the simulation was deterministic, with a detailed message.
    ///
    /// # Panics
    ///
    /// Panics if the runs produced different hashes.
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

/// Run a simulation several times and verify determinism.
///
/// # Arguments
///
/// * `runs` - number of independent runs
/// * `ticks` - ticks to simulate per run
/// * `setup` - creates the initial state
/// * `step` - advances the state one tick
/// * `hash` - computes the state hash
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

    for run in 0..runs {
        let mut state = setup();
        for _ in 0..ticks {
            step(&mut state);
        }
        let state_hash = hash(&state);
        tracing::debug!(run, ticks, state_hash, "Determinism run finished");
        hashes.push(state_hash);
    }

    let is_deterministic = hashes.windows(2).all(|w| w[0] == w[1]);

    DeterminismResult {
        is_deterministic,
        hashes,
        ticks,
    }
}

/// Run a [`World`] scenario twice and verify the final hashes match.
pub fn verify_world_determinism<F>(setup: F, ticks: u64) -> bool
where
    F: Fn() -> World,
{
    verify_determinism(
        2,
        ticks,
        &setup,
        |world| {
            world.update(None);
        },
        World::state_hash,
    )
    .is_deterministic
}

/// Run N worlds in parallel and compare final hashes.
///
/// Catches non-determinism that only manifests under thread scheduling
/// variations or memory layout differences.
pub fn run_parallel_worlds<F>(setup: F, num_sims: usize, ticks: u64) -> DeterminismResult
where
    F: Fn() -> World + Send + Sync,
{
    let setup_ref = &setup;
    let hashes: Vec<u64> = thread::scope(|scope| {
        let handles: Vec<_> = (0..num_sims)
            .map(|_| {
                scope.spawn(move || {
                    let mut world = setup_ref();
                    for _ in 0..ticks {
                        world.update(None);
                    }
                    world.state_hash()
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("simulation thread panicked"))
            .collect()
    });

    let is_deterministic = hashes.windows(2).all(|w| w[0] == w[1]);

    DeterminismResult {
        is_deterministic,
        hashes,
        ticks,
    }
}
