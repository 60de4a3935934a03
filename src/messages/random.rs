//! Injectable randomness for message splitting and typing pace.

use std::collections::VecDeque;

use parking_lot::Mutex;
use rand::Rng;

pub trait RandomSource: Send + Sync {
    /// `true` with probability `p` (clamped to `0.0..=1.0`).
    fn chance(&self, p: f64) -> bool;

    /// Uniform integer in `[low, high)`. Returns `low` when the range is empty.
    fn between(&self, low: u64, high: u64) -> u64;
}

/// Thread-local RNG from `rand`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn chance(&self, p: f64) -> bool {
        rand::thread_rng().gen_bool(p.clamp(0.0, 1.0))
    }

    fn between(&self, low: u64, high: u64) -> u64 {
        if high <= low {
            return low;
        }
        rand::thread_rng().gen_range(low..high)
    }
}

/// Replays fixed answers in order. Once a queue runs dry, `chance` answers
/// `false` and `between` answers `low`.
#[derive(Debug, Default)]
pub struct ScriptedRandom {
    coins: Mutex<VecDeque<bool>>,
    values: Mutex<VecDeque<u64>>,
}

impl ScriptedRandom {
    pub fn new(coins: impl IntoIterator<Item = bool>, values: impl IntoIterator<Item = u64>) -> Self {
        Self {
            coins: Mutex::new(coins.into_iter().collect()),
            values: Mutex::new(values.into_iter().collect()),
        }
    }
}

impl RandomSource for ScriptedRandom {
    fn chance(&self, _p: f64) -> bool {
        self.coins.lock().pop_front().unwrap_or(false)
    }

    fn between(&self, low: u64, high: u64) -> u64 {
        match self.values.lock().pop_front() {
            Some(v) if high > low => v.clamp(low, high - 1),
            _ => low,
        }
    }
}

/// Every coin lands `true`; every range yields its lower bound.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysRandom;

impl RandomSource for AlwaysRandom {
    fn chance(&self, _p: f64) -> bool {
        true
    }

    fn between(&self, low: u64, _high: u64) -> u64 {
        low
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_random_bounds() {
        let rng = ThreadRandom;
        for _ in 0..200 {
            let v = rng.between(120, 170);
            assert!((120..170).contains(&v));
        }
        assert_eq!(rng.between(5, 5), 5);
        assert!(!rng.chance(0.0));
        assert!(rng.chance(1.0));
        assert!(rng.chance(7.5));
    }

    #[test]
    fn test_scripted_random_replays_then_defaults() {
        let rng = ScriptedRandom::new([true, false], [150, 500]);
        assert!(rng.chance(0.5));
        assert!(!rng.chance(0.5));
        assert!(!rng.chance(0.5));
        assert_eq!(rng.between(120, 170), 150);
        assert_eq!(rng.between(120, 170), 169);
        assert_eq!(rng.between(120, 170), 120);
    }
}
