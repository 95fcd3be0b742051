//! Deterministic multiplicative noise for observed numeric values.
//!
//! Observations degrade gracefully rather than lie randomly: the same
//! (turn, observer, target, variable) key perturbs the same value the same
//! way on every call, every run, and every platform. Each application
//! seeds a fresh [`SmallRng`] from a stable fold of the key -- never a
//! shared or thread-local generator -- so perturbations are independent
//! across variables, targets, and turns, yet perfectly replayable.

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::SmallRng;
use veil_types::{AgentId, ObserveTarget, Value};

/// FNV-1a 64-bit offset basis.
const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;

/// FNV-1a 64-bit prime.
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Component separator folded between key parts. UTF-8 never produces the
/// byte `0xff`, so distinct component splits can never collide.
const COMPONENT_SEPARATOR: u8 = 0xff;

/// Escape value for the all-zero state xorshift cannot leave.
const ZERO_STATE_ESCAPE: u64 = 0xfeed_beef_dead_c0de;

/// Seed components identifying one perturbation site.
#[derive(Debug, Clone, Copy)]
pub struct NoiseKey<'a> {
    /// The turn the observation is being built for.
    pub turn: u64,
    /// The observing agent.
    pub observer: &'a AgentId,
    /// The observed target.
    pub target: &'a ObserveTarget,
    /// The variable being perturbed.
    pub variable: &'a str,
}

impl NoiseKey<'_> {
    /// Fold the key into a 64-bit seed: FNV-1a over the components, then
    /// an xorshift scramble so near-identical keys land far apart.
    fn seed(&self) -> u64 {
        let mut hash = FNV_OFFSET;
        for byte in self.turn.to_le_bytes() {
            hash = fold(hash, byte);
        }
        hash = fold(hash, COMPONENT_SEPARATOR);
        for &byte in self.observer.as_str().as_bytes() {
            hash = fold(hash, byte);
        }
        hash = fold(hash, COMPONENT_SEPARATOR);
        for &byte in self.target.as_str().as_bytes() {
            hash = fold(hash, byte);
        }
        hash = fold(hash, COMPONENT_SEPARATOR);
        for &byte in self.variable.as_bytes() {
            hash = fold(hash, byte);
        }
        scramble(hash)
    }
}

/// One FNV-1a step.
const fn fold(hash: u64, byte: u8) -> u64 {
    (hash ^ (byte as u64)).wrapping_mul(FNV_PRIME)
}

/// Xorshift64 finalizer over the folded hash.
const fn scramble(folded: u64) -> u64 {
    let mut state = folded;
    if state == 0 {
        state = ZERO_STATE_ESCAPE;
    }
    state ^= state << 13;
    state ^= state >> 7;
    state ^= state << 17;
    state
}

/// Apply multiplicative noise to one observed value.
///
/// Numeric values become `value * (1 + delta)` with `delta` drawn uniformly
/// from `[-factor, +factor]`. A factor of zero (the matrix never produces a
/// negative one) and non-numeric values return the input unchanged,
/// bit-identical. Exact zeros stay exactly zero: multiplicative noise has
/// nothing to scale.
pub fn perturb(value: &Value, factor: f64, key: &NoiseKey<'_>) -> Value {
    let Some(number) = value.as_number() else {
        return value.clone();
    };
    if factor <= 0.0 {
        return value.clone();
    }

    let mut rng = SmallRng::seed_from_u64(key.seed());
    let delta = rng.random_range(-factor..=factor);
    Value::Number(number * (1.0 + delta))
}
