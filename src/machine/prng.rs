//! Replicated pseudo random numbers.
//!
//! Handlers never touch OS randomness. Each write command gets a generator
//! seeded from the replicated seed and its position in the log, so every
//! replica draws the same sequence. Replicas of one cluster must run the same
//! `rand` release, its `StdRng` algorithm is not stable across versions.

use rand::rngs::StdRng;
use rand::SeedableRng;

const GOLDEN_GAMMA: u64 = 0x9E37_79B9_7F4A_7C15;

/// Generator handed to command handlers.
pub type CommandRng = StdRng;

/// SplitMix64 finalizer.
pub fn mix64(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Seed of the command at `position` of the entry at `index`.
pub fn command_seed(
    seed: i64,
    index: u64,
    position: usize,
) -> u64 {
    (seed as u64) ^ mix64(index.wrapping_mul(GOLDEN_GAMMA) ^ position as u64)
}

/// Generator for the command at `position` of the entry at `index`.
pub fn command_rng(
    seed: i64,
    index: u64,
    position: usize,
) -> CommandRng {
    StdRng::seed_from_u64(command_seed(seed, index, position))
}

/// Generator for a read, seeded from the local copy of the clock seed.
pub fn local_rng(seed: i64) -> CommandRng {
    StdRng::seed_from_u64(seed as u64)
}
