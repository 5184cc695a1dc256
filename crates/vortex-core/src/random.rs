//! Injectable randomness
//!
//! Every chaotic decision in the connection pool draws from a
//! [`RandomSource`], so tests can substitute a seeded generator or a fully
//! scripted one.

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Source of random draws for chaotic decisions
pub trait RandomSource: Send {
    /// Uniform draw in `[0, 1)`
    fn next_f64(&mut self) -> f64;

    /// Uniform index in `[0, len)`. `len` must be non-zero.
    fn next_index(&mut self, len: usize) -> usize;

    /// Uniform integer in `[low, high]` (inclusive)
    fn next_in_range(&mut self, low: u64, high: u64) -> u64;
}

impl RandomSource for StdRng {
    fn next_f64(&mut self) -> f64 {
        self.gen::<f64>()
    }

    fn next_index(&mut self, len: usize) -> usize {
        self.gen_range(0..len)
    }

    fn next_in_range(&mut self, low: u64, high: u64) -> u64 {
        self.gen_range(low..=high)
    }
}

/// A fresh entropy-seeded generator for production use
pub fn default_source() -> Box<dyn RandomSource> {
    Box::new(StdRng::from_entropy())
}

/// A reproducible generator for tests and simulations
pub fn seeded_source(seed: u64) -> Box<dyn RandomSource> {
    Box::new(StdRng::seed_from_u64(seed))
}

/// Replays queued values in order.
///
/// Each queue is consumed independently. When a queue runs dry the source
/// falls back to a neutral value: `0.5` for `next_f64`, `0` for
/// `next_index` and `low` for `next_in_range`.
#[derive(Debug, Default, Clone)]
pub struct ScriptedRandom {
    floats: VecDeque<f64>,
    indices: VecDeque<usize>,
    ranges: VecDeque<u64>,
}

impl ScriptedRandom {
    /// Create an empty script
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue values for `next_f64`
    pub fn with_floats(mut self, values: impl IntoIterator<Item = f64>) -> Self {
        self.floats.extend(values);
        self
    }

    /// Queue values for `next_index`
    pub fn with_indices(mut self, values: impl IntoIterator<Item = usize>) -> Self {
        self.indices.extend(values);
        self
    }

    /// Queue values for `next_in_range`
    pub fn with_ranges(mut self, values: impl IntoIterator<Item = u64>) -> Self {
        self.ranges.extend(values);
        self
    }
}

impl RandomSource for ScriptedRandom {
    fn next_f64(&mut self) -> f64 {
        self.floats.pop_front().unwrap_or(0.5)
    }

    fn next_index(&mut self, len: usize) -> usize {
        self.indices.pop_front().map(|i| i % len.max(1)).unwrap_or(0)
    }

    fn next_in_range(&mut self, low: u64, high: u64) -> u64 {
        self.ranges
            .pop_front()
            .map(|v| v.clamp(low, high))
            .unwrap_or(low)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_source_is_reproducible() {
        let mut a = seeded_source(42);
        let mut b = seeded_source(42);
        for _ in 0..100 {
            assert_eq!(a.next_f64(), b.next_f64());
            assert_eq!(a.next_index(7), b.next_index(7));
            assert_eq!(a.next_in_range(5, 500), b.next_in_range(5, 500));
        }
    }

    #[test]
    fn test_std_rng_bounds() {
        let mut rng = seeded_source(7);
        for _ in 0..1000 {
            let f = rng.next_f64();
            assert!((0.0..1.0).contains(&f));
            assert!(rng.next_index(3) < 3);
            let v = rng.next_in_range(1000, 5000);
            assert!((1000..=5000).contains(&v));
        }
    }

    #[test]
    fn test_scripted_replays_then_falls_back() {
        let mut rng = ScriptedRandom::new()
            .with_floats([0.1, 0.9])
            .with_indices([4])
            .with_ranges([9999]);

        assert_eq!(rng.next_f64(), 0.1);
        assert_eq!(rng.next_f64(), 0.9);
        assert_eq!(rng.next_f64(), 0.5);

        // Wrapped into range
        assert_eq!(rng.next_index(3), 1);
        assert_eq!(rng.next_index(3), 0);

        // Clamped into range
        assert_eq!(rng.next_in_range(5, 500), 500);
        assert_eq!(rng.next_in_range(5, 500), 5);
    }
}
