//! Injectable randomness for the simulation.
//!
//! Every probabilistic decision (connectivity flips, anomaly gate, sensor pick,
//! value generation) goes through a [`RandomSource`], so tests can replace the
//! seeded generator with a scripted one and force a specific branch.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Source of uniform samples shared by the scheduler and the controller.
pub trait RandomSource: Send + Sync {
    /// Uniform sample in `[0, 1)`.
    fn next_f64(&self) -> f64;

    /// Fair coin flip.
    fn next_bool(&self) -> bool {
        self.next_f64() < 0.5
    }

    /// Uniform index in `0..len`. `len` must be non-zero.
    fn next_index(&self, len: usize) -> usize {
        ((self.next_f64() * len as f64) as usize).min(len.saturating_sub(1))
    }

    /// Bernoulli trial with success probability `p`.
    fn chance(&self, p: f64) -> bool {
        self.next_f64() < p
    }
}

/// `StdRng` behind a mutex, seeded explicitly or from entropy.
pub struct SeededRandom {
    rng: Mutex<StdRng>,
    seed: Option<u64>,
}

impl SeededRandom {
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            seed: Some(seed),
        }
    }

    pub fn from_entropy() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
            seed: None,
        }
    }

    pub fn new(seed: Option<u64>) -> Self {
        match seed {
            Some(seed) => Self::from_seed(seed),
            None => Self::from_entropy(),
        }
    }

    /// Seed used at construction, `None` when seeded from entropy.
    pub fn seed(&self) -> Option<u64> {
        self.seed
    }
}

impl RandomSource for SeededRandom {
    fn next_f64(&self) -> f64 {
        self.rng.lock().gen::<f64>()
    }

    fn next_bool(&self) -> bool {
        self.rng.lock().gen_bool(0.5)
    }

    fn next_index(&self, len: usize) -> usize {
        self.rng.lock().gen_range(0..len)
    }
}
