//! Engine random number source.

use core::cell::Cell;

// LCG constants (Knuth, MMIX)
const LCG_MULTIPLIER: u64 = 6364136223846793005;
const LCG_INCREMENT: u64 = 1442695040888963407;

pub const DEFAULT_SEED: u64 = 0x5DEE_CE66_D1CE_5EED;

/// Linear congruential generator with interior mutability.
///
/// `Cell` makes the generator (and every context holding it) `!Sync`, so
/// sharing one engine context between threads needs explicit synchronization.
#[derive(Debug, Clone)]
pub struct Rng {
    state: Cell<u64>,
}

impl Rng {
    pub fn new(seed: u64) -> Self {
        Self {
            state: Cell::new(seed),
        }
    }

    pub fn reseed(&self, seed: u64) {
        self.state.set(seed);
    }

    pub fn next_u64(&self) -> u64 {
        let next = self
            .state
            .get()
            .wrapping_mul(LCG_MULTIPLIER)
            .wrapping_add(LCG_INCREMENT);
        self.state.set(next);
        next
    }

    /// Uniform in `[0, 1)`, using the 24 high bits of the state.
    pub fn next_f32(&self) -> f32 {
        (self.next_u64() >> 40) as f32 / (1u32 << 24) as f32
    }
}

impl Default for Rng {
    fn default() -> Self {
        Self::new(DEFAULT_SEED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_stay_in_unit_interval() {
        let rng = Rng::new(1);
        for _ in 0..1000 {
            let x = rng.next_f32();
            assert!((0.0..1.0).contains(&x));
        }
    }

    #[test]
    fn same_seed_same_sequence() {
        let a = Rng::new(42);
        let b = Rng::new(42);
        assert_eq!(a.next_u64(), b.next_u64());
        b.reseed(7);
        assert_ne!(a.next_u64(), b.next_u64());
    }
}
