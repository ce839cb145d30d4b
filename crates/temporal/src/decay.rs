//! Memory-tier decay curves
//!
//! Exponential decay with per-tier half-lives. The score compounds
//! between accesses and resets to 1.0 on access. One module owns the
//! math so the inference decay sweep and the access tracker never
//! disagree about how fast a tier cools.

use nornic_core::{MemoryTier, TimestampMillis};
use serde::{Deserialize, Serialize};

/// Decay multiplier for `elapsed_secs` of inactivity in the given tier:
/// `0.5 ^ (elapsed / half_life)`, in `(0, 1]`.
pub fn decay_score(tier: MemoryTier, elapsed_secs: f64) -> f64 {
    if elapsed_secs <= 0.0 {
        return 1.0;
    }
    0.5f64.powf(elapsed_secs / tier.half_life_secs())
}

/// Compounding decay state carried by a record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecayState {
    /// Current score in `(0, 1]`.
    pub score: f64,
    /// Tier controlling the half-life.
    pub tier: MemoryTier,
    /// Last time the score was either reset or compounded (ms epoch).
    pub updated_at: TimestampMillis,
}

impl DecayState {
    /// Fresh state at full score.
    pub fn new(tier: MemoryTier, now: TimestampMillis) -> Self {
        DecayState {
            score: 1.0,
            tier,
            updated_at: now,
        }
    }

    /// Compound the decay for the time elapsed since the last update.
    pub fn advance(&mut self, now: TimestampMillis) -> f64 {
        let elapsed_secs = (now - self.updated_at).max(0) as f64 / 1000.0;
        self.score *= decay_score(self.tier, elapsed_secs);
        self.updated_at = now;
        self.score
    }

    /// An access resets the score to 1.0.
    pub fn touch(&mut self, now: TimestampMillis) {
        self.score = 1.0;
        self.updated_at = now;
    }
}
