use serde::Deserialize;
use serde::Serialize;

use super::prng::mix64;

/// Replicated clock and PRNG seed.
///
/// Only [`Clock::advance`], driven by an applied tick, produces a new value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Clock {
    /// Timestamp of the first tick ever applied, 0 before it
    pub start: i64,
    /// Monotonic logical time in nanoseconds
    pub ts: i64,
    pub seed: i64,
}

impl Clock {
    pub fn is_initialized(&self) -> bool {
        self.start != 0
    }

    /// Next clock value for a tick proposing `(ts, seed)`.
    ///
    /// `ts` never goes backwards: a proposal at or below the current time
    /// becomes `ts + 1`. A proposed seed equal to the current one is remixed
    /// so consecutive seeds always differ.
    pub fn advance(
        &self,
        proposed_ts: i64,
        proposed_seed: i64,
    ) -> Clock {
        let ts = proposed_ts.max(self.ts.saturating_add(1));
        let mut seed = proposed_seed;
        if seed == self.seed {
            seed = mix64(seed as u64 ^ ts as u64) as i64;
            if seed == self.seed {
                seed = seed.wrapping_add(1);
            }
        }
        let start = if self.start == 0 { ts } else { self.start };
        Clock { start, ts, seed }
    }
}
